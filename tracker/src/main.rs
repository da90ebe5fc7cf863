//! deploytrack - Entry Point
//!
//! Starts a deployment on the hosting platform and follows its build log
//! until the app is live or the build fails.

use std::env;
use std::process::ExitCode;

use deploytrack::app::options::{parse_cli_args, AppOptions};
use deploytrack::app::run::run;
use deploytrack::logs::init_logging;
use deploytrack::storage::layout::StorageLayout;
use deploytrack::storage::settings::Settings;
use deploytrack::track::fsm::LifecycleState;
use deploytrack::utils::version_info;

use tracing::{error, info};

const USAGE: &str = "usage: deploytrack --repo=<git url> --project=<name> [--token=<token>] \
[--base-url=<url>] [--config-dir=<dir>] [--log-level=<level>] [--no-push] [--no-poll]";

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = parse_cli_args(env::args().skip(1));

    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("Failed to render version info: {e}"),
        }
        return ExitCode::SUCCESS;
    }

    if cli_args.contains_key("help") {
        println!("{}", USAGE);
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("config-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };
    let settings = match Settings::load(&layout.settings_file()).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!(
                "Unable to read settings file {}: {}",
                layout.settings_file().path().display(),
                e
            );
            return ExitCode::FAILURE;
        }
    };

    let options = match AppOptions::resolve(settings, &cli_args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(options.logging.clone()) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Running deploytrack {}", version_info().version);
    match run(options, await_shutdown_signal()).await {
        Ok(LifecycleState::Succeeded) => ExitCode::SUCCESS,
        Ok(LifecycleState::Tracking) => ExitCode::from(130),
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("Deployment tracking failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            return std::future::pending().await;
        }
        info!("Ctrl+C received, shutting down...");
    }
}
