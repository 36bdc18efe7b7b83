use std::{
    error::Error,
    net::SocketAddr,
    path::{Path, PathBuf},
    process::ExitCode,
    time::Duration,
};

use bittorrent_client::{
    client::Client,
    download::{download, download_single_piece},
    init::init,
    metainfo::Metainfo,
    parse::parse,
    tracker::request_peers,
    BencodeType, Config,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

#[derive(Parser)]
#[command(about = "Minimal BitTorrent client")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Peer ID to announce and handshake with, exactly 20 bytes
    #[arg(long, global = true, allow_hyphen_values = true)]
    peer_id: Option<String>,

    /// Port reported to the tracker
    #[arg(long, global = true, default_value_t = 6881)]
    port: u16,

    /// Seconds to wait on any single peer read or write
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Number of peers to download from at once
    #[arg(long, global = true, default_value_t = 1)]
    max_parallel_peers: usize,

    /// Which peer of the tracker's list to download from
    #[arg(long, global = true, default_value_t = 0)]
    peer_index: usize,
}

#[derive(Subcommand)]
enum Command {
    /// Decode a bencoded value and print it as JSON
    Decode { value: String },

    /// Print the contents of a metainfo (`.torrent`) file
    Info { torrent: PathBuf },

    /// Ask the tracker for peers
    Peers { torrent: PathBuf },

    /// Handshake with a peer and print its peer ID
    Handshake {
        torrent: PathBuf,
        /// Address of peer as `ip:port`
        peer: SocketAddr,
    },

    /// Download and verify a single piece
    #[command(name = "download_piece")]
    DownloadPiece {
        /// Path to save downloaded piece
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },

    /// Download the whole file
    Download {
        /// Path to save downloaded file
        #[arg(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = config(&cli)?;
    match cli.command {
        Command::Decode { value } => {
            let decoded = parse(value.as_bytes())?;
            println!("{}", to_json(&decoded));
        }
        Command::Info { torrent } => {
            let metainfo = read_metainfo(&torrent)?;
            println!("Tracker URL: {}", metainfo.announce);
            println!("Length: {}", metainfo.info.length);
            println!("Info Hash: {}", hex::encode(metainfo.info_hash));
            println!("Piece Length: {}", metainfo.info.piece_length);
            println!("Piece Hashes:");
            for hash in metainfo.info.pieces() {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let metainfo = read_metainfo(&torrent)?;
            for peer in request_peers(&metainfo, &config).await? {
                println!("{}", peer);
            }
        }
        Command::Handshake { torrent, peer } => {
            let metainfo = read_metainfo(&torrent)?;
            let mut client = Client::dial(peer, &config).await?;
            let res = client.handshake(metainfo.info_hash).await;
            client.close().await;
            println!("Peer ID: {}", hex::encode(res?));
        }
        Command::DownloadPiece {
            output,
            torrent,
            index,
        } => {
            let torrent = init(read_metainfo(&torrent)?, &config).await?;
            let data = download_single_piece(&torrent, &config, index).await?;
            write_output(&output, &data)?;
            println!("Piece {} downloaded to {}.", index, output.display());
        }
        Command::Download { output, torrent } => {
            let path = torrent;
            let torrent = init(read_metainfo(&path)?, &config).await?;
            let data = download(&torrent, &config).await?;
            write_output(&output, &data)?;
            println!("Downloaded {} to {}.", path.display(), output.display());
        }
    }
    Ok(())
}

fn config(cli: &Cli) -> Result<Config, Box<dyn Error>> {
    let mut config = Config {
        port: cli.port,
        max_parallel_peers: cli.max_parallel_peers.max(1),
        peer_index: cli.peer_index,
        ..Config::default()
    };
    if let Some(peer_id) = &cli.peer_id {
        config = config.with_peer_id(peer_id)?;
    }
    if let Some(secs) = cli.timeout {
        config.io_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

fn read_metainfo(path: &Path) -> Result<Metainfo, Box<dyn Error>> {
    let bytes = std::fs::read(path)
        .map_err(|e| format!("Unable to read metainfo file {}: {}", path.display(), e))?;
    Ok(Metainfo::from_bytes(&bytes)?)
}

fn write_output(path: &Path, data: &[u8]) -> Result<(), Box<dyn Error>> {
    std::fs::write(path, data)
        .map_err(|e| format!("Unable to save data to output file {}: {}", path.display(), e))?;
    Ok(())
}

/// Byte strings print as text when they are valid UTF-8, otherwise as hex
fn to_json(value: &BencodeType) -> serde_json::Value {
    match value {
        BencodeType::Integer(val) => serde_json::Value::from(*val),
        BencodeType::ByteString(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => serde_json::Value::from(text),
            Err(_) => serde_json::Value::from(hex::encode(bytes)),
        },
        BencodeType::List(list) => list.iter().map(to_json).collect(),
        BencodeType::Dict(dict) => serde_json::Value::Object(
            dict.iter()
                .map(|(key, val)| (String::from_utf8_lossy(key).into_owned(), to_json(val)))
                .collect(),
        ),
    }
}
