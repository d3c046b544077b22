//! `palmcast-monitor` – listen for palmcast datagrams and show the latest
//! pose of each hand.
//!
//! Binds every interface on the configured port, prints the board once per
//! second and logs anything that is not one of the four pose topics.

use std::process::ExitCode;
use std::time::Duration;

use colored::Colorize;
use tokio::sync::watch;
use tracing::{debug, warn};

use palmcast_cli::config;
use palmcast_cli::shutdown::Shutdown;
use palmcast_middleware::{HandPoseBoard, OscReceiver, ReceivedMessage};
use palmcast_runtime::init_tracing;
use palmcast_types::{HandSide, PalmError};

#[tokio::main]
async fn main() -> ExitCode {
    let _telemetry = init_tracing("palmcast-monitor");

    let cfg = match config::load_or_default() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {e}", "Config error".red());
            return ExitCode::FAILURE;
        }
    };

    let shutdown = Shutdown::new();
    if let Err(e) = shutdown.install_ctrlc_handler() {
        warn!(error = %e, "failed to install Ctrl-C handler");
    }

    match monitor(cfg.listen_addr(), shutdown.subscribe()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("  {} {e}", "✗".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn monitor(
    addr: std::net::SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), PalmError> {
    let mut receiver = OscReceiver::bind(addr).await?;
    println!(
        "  Listening on {}  {}",
        receiver.local_addr()?.to_string().bold(),
        "(Ctrl-C to stop)".dimmed()
    );

    let mut board = HandPoseBoard::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => print_board(&board),
            received = receiver.recv() => match received {
                Ok((from, messages)) => {
                    for message in messages {
                        match message {
                            ReceivedMessage::Pose(update) => board.apply(update),
                            ReceivedMessage::Unrecognized { addr, args } => {
                                warn!(%from, %addr, args = ?args, "unrecognized message");
                            }
                        }
                    }
                }
                Err(e) => debug!(error = %e, "datagram skipped"),
            }
        }
    }
    Ok(())
}

fn print_board(board: &HandPoseBoard) {
    for side in [HandSide::Left, HandSide::Right] {
        let Some(pose) = board.pose(side) else {
            continue;
        };
        let label = side.label().unwrap_or("?");
        let position = pose
            .position
            .map(|p| format!("({:8.2}, {:8.2}, {:8.2})", p.x, p.y, p.z))
            .unwrap_or_else(|| "-".to_string());
        let orientation = board
            .normalized_orientation(side)
            .map(|q| format!("[{:6.3}, {:6.3}, {:6.3}, {:6.3}]", q.w, q.x, q.y, q.z))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<5} {} {}  {}",
            label.bold(),
            position,
            orientation,
            format!("{} updates", pose.updates).dimmed()
        );
    }
}
