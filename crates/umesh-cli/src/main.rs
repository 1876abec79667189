//! `umeshfw`: a thin binary driving the uMeshFw protocol stack over a
//! UDP test MAC, standing in for the real narrowband radio (§6, §9).

mod backend;
mod config;
mod identity;
mod mac_udp;
mod progress;
mod stack;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::cell::RefCell;
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use tracing_subscriber::EnvFilter;

use backend::{FsBackendFactory, FsFileBackend};
use config::Config;
use mac_udp::UdpMac;
use progress::TransferProgress;
use stack::Stack;
use umesh_keymgr::Identity;

/// uMeshFw: layer-2/layer-3 mesh protocol stack, CLI driver.
#[derive(Parser)]
#[command(name = "umeshfw", version, about)]
struct Cli {
    /// Path to the TOML config file (defaults to the platform config dir).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a fresh identity keypair (refuses to overwrite an existing one).
    Keygen,
    /// Print the configuration that would be used, without starting anything.
    ShowConfig,
    /// Run the node: discovery, key exchange, and file transfer over UDP.
    Run {
        /// Offer `file` for a peer to pull, once discovered and managed.
        #[arg(long)]
        serve: Option<PathBuf>,
        /// Peer TID to push `send_to` to, once a MANAGED session exists.
        #[arg(long, requires = "send_to")]
        peer: Option<u32>,
        /// Local file to send to `peer` once reachable.
        #[arg(long)]
        send_to: Option<PathBuf>,
        /// Ask `peer` for this file name, saving it under the share directory.
        #[arg(long, requires = "peer")]
        pull: Option<String>,
        /// How long to run before exiting; runs forever if unset.
        #[arg(long)]
        seconds: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match cli.command {
        Command::Keygen => run_keygen(&config),
        Command::ShowConfig => run_show_config(&config),
        Command::Run { serve, peer, send_to, pull, seconds } => {
            run_node(config, serve, peer, send_to, pull, seconds).await
        }
    }
}

fn run_keygen(config: &Config) -> anyhow::Result<()> {
    let (_sk, pk) = identity::generate(&config.node.identity_file)?;
    println!(
        "{} identity written to {}",
        style("created").green(),
        config.node.identity_file.display()
    );
    println!("public key: {}", hex::encode(pk));
    Ok(())
}

fn run_show_config(config: &Config) -> anyhow::Result<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn run_node(
    config: Config,
    serve: Option<PathBuf>,
    peer: Option<u32>,
    send_to: Option<PathBuf>,
    pull: Option<String>,
    seconds: Option<u64>,
) -> anyhow::Result<()> {
    let (isk, ipk) = identity::load_or_generate(&config.node.identity_file)?;
    let identity = Identity { isk, ipk };

    let peers: Vec<SocketAddr> = config.network.peers.clone();
    let mac = UdpMac::bind(config.network.listen_addr, peers)?;
    let bound_addr = mac.local_addr().unwrap_or(config.network.listen_addr);
    tracing::info!(addr = %bound_addr, "umeshfw: bound UDP test MAC");

    let factory = Rc::new(RefCell::new(FsBackendFactory::new(config.files.share_dir.clone())))
        as Rc<RefCell<dyn umesh_files::FileBackendFactory>>;

    let mut stack = Stack::new(&config, identity, mac, factory);
    stack.add_sensor(Box::new(UptimeSensor::default()));

    let mut outbound_progress: Option<TransferProgress> = None;
    if let (Some(peer_tid), Some(path)) = (peer, send_to.as_ref()) {
        let backend = FsFileBackend::open_for_send(path)?;
        let size = std::fs::metadata(path)?.len() as u32;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        stack.send_file(peer_tid, &file_name, size, Box::new(backend))?;
        tracing::info!(peer = peer_tid, file = %file_name, "umeshfw: queued outbound transfer");
        outbound_progress = Some(TransferProgress::new(u64::from(size), &file_name));
    }
    let _ = serve; // served files are resolved on demand via FsBackendFactory

    if let (Some(peer_tid), Some(name)) = (peer, pull.as_ref()) {
        let path = config.files.share_dir.join(name);
        let backend = FsFileBackend::open_for_receive(&path)?;
        stack.receive_file(peer_tid, name, Box::new(backend))?;
        tracing::info!(peer = peer_tid, file = %name, "umeshfw: queued inbound pull");
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(50));
    let deadline = seconds.map(|s| tokio::time::Instant::now() + Duration::from_secs(s));
    let mut last_status_print = tokio::time::Instant::now();

    loop {
        ticker.tick().await;
        stack.step(50);

        if let Some(peer_tid) = peer {
            let session = stack.file_sessions().into_iter().find(|s| s.peer_tid == peer_tid);
            if let (Some(bar), Some(s)) = (outbound_progress.as_ref(), session) {
                bar.update(u64::from(s.bytes_transferred));
                let finished = s.total_pieces > 0 && s.transferred_pieces >= s.total_pieces;
                if finished {
                    bar.finish_with_message("transfer complete".to_string());
                }
                if finished {
                    outbound_progress = None;
                }
            }
        }

        if last_status_print.elapsed() >= Duration::from_secs(5) {
            last_status_print = tokio::time::Instant::now();
            print_status(&stack);
        }

        if let Some(deadline) = deadline {
            if tokio::time::Instant::now() >= deadline {
                break;
            }
        }
    }

    Ok(())
}

/// Broadcasts wall-clock uptime as a status reading, standing in for a real
/// sensor (C11) since this node has no physical ones attached.
#[derive(Default)]
struct UptimeSensor {
    started: Option<tokio::time::Instant>,
}

impl umesh_core::status::ReadingSource for UptimeSensor {
    fn read(&mut self) -> Option<umesh_core::status::Reading> {
        let started = *self.started.get_or_insert_with(tokio::time::Instant::now);
        Some(umesh_core::status::Reading {
            name: "uptime".to_string(),
            unit: "s".to_string(),
            value: started.elapsed().as_secs_f32(),
        })
    }
}

fn print_status(stack: &Stack) {
    println!(
        "{} tid={}",
        style("umeshfw").cyan().bold(),
        stack.local_tid()
    );
    for n in stack.neighbours() {
        println!("  neighbour tid={} state={:?} rssi={}", n.tid, n.state, n.last_rssi_10dbm);
    }
    for s in stack.key_sessions() {
        println!("  keymgr peer={} state={:?}", s.peer_tid, s.state);
    }
    for s in stack.file_sessions() {
        println!(
            "  transfer peer={} file={} {}/{} pieces ({})",
            s.peer_tid,
            s.file_name,
            s.transferred_pieces,
            s.total_pieces,
            progress::format_bytes(u64::from(s.bytes_transferred))
        );
    }
}
