mod config;
mod daemon;
mod fault;
mod md01;
mod service;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::config::Config;
use crate::daemon::{DaemonController, DaemonState};

#[derive(Parser)]
#[command(name = "trackd")]
#[command(about = "MD01 tracking antenna daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a config file
    Validate {
        #[arg(short, long)]
        config: String,
    },
    /// Run the daemon until Ctrl-C
    Run {
        #[arg(short, long)]
        config: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => validate(&config),
        Commands::Run { config } => run(&config),
    }
}

fn validate(path: &str) -> ExitCode {
    match Config::from_file(path) {
        Ok(config) => {
            println!("Config is valid");
            println!("  ssid:    {}", config.ssid);
            println!("  device:  {} (poll {:?})", config.device.addr(), config.device.poll_rate);
            println!(
                "  limits:  az {:.3} deg/s, el {:.3} deg/s",
                config.device.az_thresh, config.device.el_thresh
            );
            println!(
                "  service: {} (watchdog {:?})",
                config.service.addr(),
                config.service.watchdog_interval
            );
            match config.session_dir() {
                Some(dir) => println!("  logs:    {}", dir.display()),
                None => println!("  logs:    disabled"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Config error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(path: &str) -> ExitCode {
    let config = match Config::from_file(path) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Config error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string(&*config) {
        Ok(json) => log::info!("Effective config: {}", json),
        Err(e) => log::warn!("Could not serialize config: {}", e),
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let final_state = runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => log::info!("Ctrl-C received, shutting down"),
                Err(e) => log::error!("Failed to listen for Ctrl-C: {}", e),
            }
            let _ = shutdown_tx.send(());
        });

        log::info!("Starting {} Tracking Daemon", config.ssid);
        DaemonController::new(config).run(shutdown_rx).await
    });

    log::info!("Daemon stopped in state {}", final_state);
    if final_state == DaemonState::Fault {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
