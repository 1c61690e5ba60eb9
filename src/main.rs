use arp_prober::{
    sink, ArpProber, Config, FileTargets, Probe, SnapshotSink, StaticTargets, TargetProvider,
};
use clap::Parser;
use log::{debug, error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const EXPORT_BUFFER: usize = 1000;

/// Checks link-layer reachability of targets with ARP
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to config.toml; built-in defaults are used when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to store the per-target metrics snapshot, overrides snapshot.path
    #[arg(long)]
    snapshot_path: Option<PathBuf>,

    /// Probe name, overrides probe.name
    #[arg(long)]
    name: Option<String>,
}

fn init_logging(level: &str) {
    // RUST_LOG takes priority over the configured level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("[ERROR] failed to load {}: {}", path.display(), err);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if let Some(name) = args.name {
        config.probe.name = name;
    }
    init_logging(&config.logging.level);

    if let Err(err) = run(config, args.snapshot_path).await {
        error!("Error running arprober: {}", err);
        std::process::exit(1);
    }
}

async fn run(config: Config, snapshot_path: Option<PathBuf>) -> arp_prober::Result<()> {
    let provider: Arc<dyn TargetProvider> = match &config.probe.targets_file {
        Some(path) => Arc::new(FileTargets::new(path)),
        None => Arc::new(StaticTargets::new(config.targets.clone())),
    };
    let prober = ArpProber::new(config.probe.receive_timeout);
    let mut probe = Probe::new(config.probe.clone(), prober, provider)?;

    let token = CancellationToken::new();
    let (data_tx, mut data_rx) = mpsc::channel(EXPORT_BUFFER);

    match snapshot_path.or_else(|| config.snapshot.path.clone()) {
        Some(path) => {
            config.snapshot.validate()?;
            let snapshot = Arc::new(SnapshotSink::from_config(&config.snapshot, path));
            info!("Writing metrics snapshot to {}", snapshot.path().display());
            tokio::spawn(Arc::clone(&snapshot).run(token.clone()));
            tokio::spawn(sink::surface(snapshot, data_rx));
        }
        None => {
            tokio::spawn(async move {
                while let Some(em) = data_rx.recv().await {
                    debug!("No snapshot configured, dropping {:?}", em.label("dst"));
                }
            });
        }
    }

    let mut terminate = signal(SignalKind::terminate())?;
    let shutdown = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!("Failed to listen for shutdown signal: {}", err);
                    return;
                }
                info!("Shutdown requested");
            }
            _ = terminate.recv() => info!("Terminate signal received"),
        }
        shutdown.cancel();
    });

    probe.start(token, data_tx).await;
    Ok(())
}
