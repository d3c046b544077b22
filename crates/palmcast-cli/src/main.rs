//! `palmcast` – stream hand poses from the tracking service as OSC over UDP.
//!
//! 1. Loads `~/.palmcast/config.toml` (written with defaults on first run).
//! 2. Connects to the tracking source (Ultraleap with the `leap` feature,
//!    the simulator otherwise) and sends
//!    `/hand/{left,right}/{position,orientation}` to the configured
//!    destination for every frame.
//! 3. Stops cleanly on Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::warn;

use palmcast_cli::config::{self, Config};
use palmcast_cli::shutdown::Shutdown;
use palmcast_cli::tracking;
use palmcast_middleware::OscUdpTransport;
use palmcast_runtime::{DispatchLoop, DispatchReport, init_tracing};
use palmcast_types::PalmError;

fn main() -> ExitCode {
    let telemetry = init_tracing("palmcast");

    print_banner();
    if telemetry.is_exporting() {
        println!("  {}", "Exporting spans over OTLP".dimmed());
    }
    let cfg = load_config();

    let shutdown = Shutdown::new();
    if let Err(e) = shutdown.install_ctrlc_handler() {
        warn!(error = %e, "failed to install Ctrl-C handler; stop the process another way");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {e}", "Failed to start async runtime".red());
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(stream(&cfg, &shutdown)) {
        Ok(report) => {
            print_report(&report);
            println!("{}", "  ✓ Exiting palmcast.".green());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("  {} {e}", "✗".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn stream(cfg: &Config, shutdown: &Shutdown) -> Result<DispatchReport, PalmError> {
    let destination = cfg.destination()?;
    let transport = Arc::new(OscUdpTransport::bind(destination).await?);
    println!(
        "  Sending OSC to {}  {}",
        destination.to_string().bold(),
        "(Ctrl-C to stop)".dimmed()
    );

    let source = tracking::tracking_source();
    println!("  Streaming from {}", tracking::describe(&source).bold());
    DispatchLoop::new(source, transport)
        .run(shutdown.subscribe())
        .await
}

fn load_config() -> Config {
    match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            let mut cfg = Config::default();
            match config::save(&cfg) {
                Ok(()) => println!(
                    "  {} Default config written to {}",
                    "✓".green().bold(),
                    config::config_path().display().to_string().bold()
                ),
                Err(e) => println!("{}: {e}", "Error saving config".red()),
            }
            config::apply_env_overrides(&mut cfg);
            cfg
        }
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            println!("  Using default configuration.");
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Output
// ────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "palmcast".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Hand tracking → OSC bridge");
    println!();
}

fn print_report(report: &DispatchReport) {
    println!();
    println!(
        "  {} frames, {} messages sent",
        report.frames.to_string().bold(),
        report.messages_sent.to_string().bold()
    );
    if report.send_failures > 0 {
        println!("  {} send failures", report.send_failures.to_string().yellow());
    }
    if report.rejected_hands > 0 {
        println!("  {} hands skipped", report.rejected_hands.to_string().yellow());
    }
    if report.device_failures > 0 {
        println!(
            "  {} devices could not be opened",
            report.device_failures.to_string().yellow()
        );
    }
    if report.dropped_events > 0 {
        println!(
            "  {} events dropped on a full queue",
            report.dropped_events.to_string().yellow()
        );
    }
}
