//! DDoS Sentry - Main Entry Point
//!
//! Wires a packet source to the detection engine: load + validate the
//! configuration (the only fatal step), build the backend preference chain,
//! run the source to exhaustion, then shut down gracefully.

mod constants;
mod logic;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use logic::classifier::Classifier;
use logic::config::{BackendKind, EngineConfig};
use logic::engine::Engine;
use logic::mitigation::{IptablesBackend, MitigationBackend, NullBackend, XdpBackend};
use logic::source::{JsonlReplaySource, PacketSource, SyntheticSource};

#[derive(Parser)]
#[command(name = "ddos-sentry", version = constants::APP_VERSION, about = "Real-time DDoS detection & mitigation engine")]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Interface the XDP backend attaches to
    #[arg(short, long, default_value_t = constants::get_interface())]
    interface: String,

    /// Replay packets from a JSONL file instead of generating traffic
    #[arg(short, long)]
    replay: Option<PathBuf>,

    /// Synthetic run length in seconds (when not replaying)
    #[arg(long, default_value_t = 30)]
    synthetic_secs: u64,

    /// Synthetic attack rate in packets per second (0 = benign only)
    #[arg(long, default_value_t = 2000)]
    attack_pps: u32,

    /// Synthetic background rate in packets per second
    #[arg(long, default_value_t = 50)]
    background_pps: u32,

    /// Seed for reproducible synthetic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Persist detection events to the default data directory
    #[arg(long)]
    log_events: bool,
}

fn build_backends(config: &EngineConfig, interface: &str) -> Vec<Box<dyn MitigationBackend>> {
    let timeout = Duration::from_millis(config.backend_timeout_ms);
    config
        .backend_preference
        .iter()
        .map(|kind| -> Box<dyn MitigationBackend> {
            match kind {
                BackendKind::Xdp => Box::new(XdpBackend::new(interface, timeout)),
                BackendKind::Iptables => Box::new(IptablesBackend::new(timeout)),
                BackendKind::Null => Box::new(NullBackend),
            }
        })
        .collect()
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    log::info!("Starting {} v{}...", constants::APP_NAME, constants::APP_VERSION);

    // Configuration validation is the only fatal failure in the system
    let mut config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{}", e);
                std::process::exit(1);
            }
        },
        None => EngineConfig::default(),
    };
    if cli.log_events && config.event_log_dir.is_none() {
        config.event_log_dir = Some(logic::telemetry::EventSink::default_log_dir());
    }
    if let Err(e) = config.validate() {
        log::error!("{}", e);
        std::process::exit(1);
    }

    let backends = build_backends(&config, &cli.interface);
    log::info!(
        "Backend preference: {:?} (interface {})",
        config
            .backend_preference
            .iter()
            .map(|b| b.as_str())
            .collect::<Vec<_>>(),
        cli.interface
    );

    // No model scorer is wired on the command line; embedders construct the
    // engine with Classifier::from_config(&config, Some(scorer)).
    let classifier = Classifier::from_config(&config, None);
    let mut engine = match Engine::new(config, classifier, backends) {
        Ok(engine) => engine,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };
    engine.start_sweepers();

    let mut source: Box<dyn PacketSource> = match &cli.replay {
        Some(path) => match JsonlReplaySource::open(path) {
            Ok(source) => {
                log::info!("Replaying packets from {:?}", path);
                Box::new(source)
            }
            Err(e) => {
                log::error!("Cannot open replay file {:?}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => {
            log::info!(
                "Generating synthetic traffic for {}s (attack {} pps, background {} pps)",
                cli.synthetic_secs,
                cli.attack_pps,
                cli.background_pps
            );
            Box::new(SyntheticSource::new(
                chrono::Utc::now().timestamp_millis(),
                cli.synthetic_secs,
                cli.attack_pps,
                cli.background_pps,
                cli.seed,
            ))
        }
    };

    while let Some(pkt) = source.next_packet() {
        engine.process_packet(&pkt);
    }

    let stats = engine.shutdown();
    log::info!("Session summary:");
    log::info!("  Total packets:    {}", stats.total_packets);
    log::info!("  Total flows:      {}", stats.total_flows);
    log::info!("  Detections:       {}", stats.total_detections);
    log::info!("  Active blocks:    {}", stats.active_blocks);
    log::info!("  Capability:       {}", stats.backend_capability);
}
