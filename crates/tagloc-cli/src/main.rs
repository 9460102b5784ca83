//! `tagloc` – camera localization node.
//!
//! Reads detection batches as newline-delimited JSON (from a file or stdin),
//! localizes the camera against the origin marker and writes every published
//! pose event to stdout, one JSON object per line. Logs go to stderr.
//!
//! ```text
//! tagloc [--config <path>] [--write-config] [<detections.ndjson>]
//! ```
//!
//! 1. Loads `~/.tagloc/config.toml` (or `--config`), applying `TAGLOC_*`
//!    environment overrides.
//! 2. Optionally serves the pose stream over WebSocket (`ws_port`). Clients
//!    may push detection batches too, so with a WebSocket server running the
//!    node keeps going after the input ends, until Ctrl-C.
//! 3. Intercepts **Ctrl-C** to stop ingestion, drain the queue and exit.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use tagloc_middleware::{WsBridge, read_batches};
use tagloc_runtime::LocalizerNode;
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{error, info, warn};

/// Parsed command line.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config: Option<PathBuf>,
    input: Option<PathBuf>,
    write_config: bool,
    help: bool,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args, String> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().ok_or_else(|| format!("{arg} needs a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "--write-config" => parsed.write_config = true,
            "-h" | "--help" => parsed.help = true,
            "-" => parsed.input = None,
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            path => {
                if parsed.input.is_some() {
                    return Err("only one input file may be given".to_string());
                }
                parsed.input = Some(PathBuf::from(path));
            }
        }
    }
    Ok(parsed)
}

fn main() -> ExitCode {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"); TAGLOC_LOG_FORMAT=json switches to
    // NDJSON logs; OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _telemetry = tagloc_runtime::init_tracing("tagloc");

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}: {}", "Argument error".red(), e);
            print_usage();
            return ExitCode::FAILURE;
        }
    };
    if args.help {
        print_usage();
        return ExitCode::SUCCESS;
    }

    let path = args.config.clone().unwrap_or_else(config::config_path);

    if args.write_config {
        return match config::save_to(&config::Config::default(), &path) {
            Ok(()) => {
                eprintln!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    path.display().to_string().bold()
                );
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{}: {}", "Error saving config".red(), e);
                ExitCode::FAILURE
            }
        };
    }

    if args.config.is_some() && !path.exists() {
        eprintln!("{}: {} does not exist", "Config error".red(), path.display());
        return ExitCode::FAILURE;
    }
    let mut cfg = match config::load_or_default(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.validate() {
        eprintln!("{}: {}", "Config error".red(), e);
        return ExitCode::FAILURE;
    }

    print_banner(&cfg, &path);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start the async runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(cfg, args.input));

    // A blocking stdin read must not hold the process open.
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

async fn run(cfg: config::Config, input: Option<PathBuf>) -> ExitCode {
    let node = match LocalizerNode::new(cfg.node_config()) {
        Ok(node) => node,
        Err(e) => {
            error!(error = %e, "failed to build the localizer node");
            return ExitCode::FAILURE;
        }
    };

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &input {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot open detection input");
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    // ── Shutdown signal ───────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – draining and shutting down …".yellow().bold());
        let _ = shutdown_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Output: every published pose, one JSON line each ─────────────────
    let (done_tx, done_rx) = oneshot::channel();
    let printer = tokio::spawn(print_events(node.bus().subscribe(), done_rx));

    // ── WebSocket fan-out ─────────────────────────────────────────────────
    let (tx, rx) = mpsc::channel(node.queue_size());
    let ws = cfg.ws_port.map(|port| {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let bridge = WsBridge::with_ingest(node.bus().clone(), tx.clone());
        tokio::spawn(async move {
            if let Err(e) = bridge.run_ws_server(addr).await {
                error!(error = %e, "WebSocket server stopped");
            }
        })
    });

    // ── Ingest ────────────────────────────────────────────────────────────
    let source = cfg.detection_topic.clone();
    let ingest = tokio::spawn(async move {
        match read_batches(reader, tx).await {
            Ok(n) => info!(source = %source, batches = n, "detection input exhausted"),
            Err(e) => error!(source = %source, error = %e, "detection input failed"),
        }
    });

    let stats = node.run_until(rx, shutdown_rx).await;

    ingest.abort();
    if let Some(ws) = ws {
        ws.abort();
    }
    let _ = done_tx.send(());
    if let Err(e) = printer.await {
        warn!(error = %e, "pose printer task failed");
    }

    if !node.engine().is_localized() {
        warn!(
            origin = %cfg.origin_id,
            "origin marker was never observed; no poses were published"
        );
    }
    info!(
        batches = stats.batches,
        published = stats.published,
        "tagloc finished"
    );
    ExitCode::SUCCESS
}

/// Write events to stdout until `done` fires, then flush what is buffered.
async fn print_events(mut events: broadcast::Receiver<tagloc_types::Event>, mut done: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "stdout writer lagged; poses dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = &mut done => break,
        }
    }
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &tagloc_types::Event) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!(error = %e, "failed to serialize pose event"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner(cfg: &config::Config, path: &std::path::Path) {
    eprintln!();
    eprintln!("  {} {}", "tagloc".bold().cyan(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    eprintln!("  Fiducial camera localization");
    eprintln!();
    eprintln!("  Config   {}", path.display().to_string().dimmed());
    eprintln!("  Origin   {} (averaging {} observations)", cfg.origin_id.bold(), cfg.buffer_size);
    eprintln!("  Camera → {}", cfg.pub_topic.bold());
    for (key, channel) in &cfg.pub_topics {
        eprintln!("  Marker {} → {}", key.bold(), channel);
    }
    if let Some(port) = cfg.ws_port {
        eprintln!("  WebSocket on port {}", port.to_string().bold());
    }
    eprintln!();
}

fn print_usage() {
    eprintln!("Usage: tagloc [--config <path>] [--write-config] [<detections.ndjson> | -]");
    eprintln!();
    eprintln!("  -c, --config <path>  Config file (default ~/.tagloc/config.toml)");
    eprintln!("      --write-config   Write the default config to the config path and exit");
    eprintln!("  -h, --help           Show this help");
    eprintln!();
    eprintln!("Detections are read from the file, or from stdin when omitted.");
}
