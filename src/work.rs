use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::metainfo::Info;
use crate::{Result, SHA1_LEN};

/// Piece-download work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Work {
    /// Index of piece
    pub index: u32,
    /// Length of piece, shorter than the nominal piece length for the last one
    pub length: u32,
    /// SHA1 hash of piece
    pub hash: [u8; SHA1_LEN],
}

impl Work {
    /// Describe the download of one piece of the file
    pub fn from_info(info: &Info, index: u32) -> Result<Work> {
        Ok(Work {
            index,
            length: info.piece_len(index)?,
            hash: *info.piece(index)?,
        })
    }

    /// Work for every piece of the file, in index order
    pub fn all(info: &Info) -> Result<Vec<Work>> {
        (0..info.no_of_pieces() as u32)
            .map(|index| Work::from_info(info, index))
            .collect()
    }
}

struct SharedQueueInner(VecDeque<Work>);

/// Shared queue containing piece-download work
#[derive(Clone)]
pub struct SharedQueue {
    inner: Arc<Mutex<SharedQueueInner>>,
}

impl SharedQueue {
    /// Create shared queue from vector of work
    pub fn new(work: Vec<Work>) -> SharedQueue {
        let queue = VecDeque::from(work);
        SharedQueue {
            inner: Arc::new(Mutex::new(SharedQueueInner(queue))),
        }
    }

    /// Get work element from front of queue
    pub fn dequeue(&self) -> Option<Work> {
        self.lock().0.pop_front()
    }

    /// Put work element on back of queue
    pub fn enqueue(&self, work: Work) {
        self.lock().0.push_back(work)
    }

    pub fn len(&self) -> usize {
        self.lock().0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Queue operations never panic while holding the lock, so a poisoned
    // mutex still guards a consistent queue
    fn lock(&self) -> MutexGuard<'_, SharedQueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work(index: u32) -> Work {
        Work {
            index,
            length: 16,
            hash: [0x01; 20],
        }
    }

    #[test]
    fn work_for_last_piece_has_truncated_length() {
        let info = Info {
            name: "file".to_string(),
            length: 100,
            piece_length: 64,
            piece_hashes: vec![[0x01; 20], [0x02; 20]],
        };
        let all = Work::all(&info).unwrap();
        assert_eq!(
            all,
            vec![
                Work {
                    index: 0,
                    length: 64,
                    hash: [0x01; 20],
                },
                Work {
                    index: 1,
                    length: 36,
                    hash: [0x02; 20],
                },
            ]
        );
        assert!(Work::from_info(&info, 2).is_err());
    }

    #[test]
    fn requeued_work_goes_to_back_of_queue() {
        let queue = SharedQueue::new(vec![work(0), work(1)]);
        let first = queue.dequeue().unwrap();
        queue.enqueue(first);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().unwrap().index, 1);
        assert_eq!(queue.dequeue().unwrap().index, 0);
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue(), None);
    }

    #[tokio::test]
    async fn tasks_can_get_work_from_queue() {
        let indices = (0..16).collect::<Vec<u32>>();

        let work = indices.iter().map(|index| work(*index)).collect::<Vec<Work>>();
        let queue = SharedQueue::new(work);
        let queue_handle1 = queue.clone();
        let mut task_one_work_indices = Vec::new();
        let mut task_two_work_indices = Vec::new();

        let task_one_handle = tokio::spawn(async move {
            while let Some(work) = queue.dequeue() {
                task_one_work_indices.push(work.index);
                // Short sleep to enable interleaving of tasks
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
            task_one_work_indices
        });

        let task_two_handle = tokio::spawn(async move {
            while let Some(work) = queue_handle1.dequeue() {
                task_two_work_indices.push(work.index);
                tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
            }
            task_two_work_indices
        });

        let mut task_one_work_indices = task_one_handle.await.unwrap();
        let mut task_two_work_indices = task_two_handle.await.unwrap();
        task_one_work_indices.append(&mut task_two_work_indices);
        task_one_work_indices.sort();
        assert_eq!(indices, task_one_work_indices);
    }
}
