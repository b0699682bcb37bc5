//! WebDeploy Server - Entry Point
//!
//! Turns uploaded website archives into live deployments on shared-path,
//! shared-host, or container hosting topologies.

use std::collections::HashMap;
use std::env;

use webdeployd::app::run::run;
use webdeployd::filesys::file::File;
use webdeployd::logs::{init_logging, LogOptions};
use webdeployd::storage::settings::Settings;
use webdeployd::utils::version_info;

use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        println!("{}", serde_json::to_string_pretty(&version).unwrap());
        return;
    }

    // Settings path: --settings=... beats the environment beats the default
    let settings_path = cli_args
        .get("settings")
        .cloned()
        .or_else(|| env::var("WEBDEPLOY_SETTINGS").ok())
        .unwrap_or_else(|| "/etc/webdeploy/settings.json".to_string());

    let settings_file = File::new(&settings_path);
    let mut settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                error!("Unable to read settings file {}: {}", settings_path, e);
                return;
            }
        }
    } else {
        Settings::default()
    };

    if let Some(data_dir) = cli_args.get("data-dir") {
        settings.data_dir = data_dir.clone();
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.log_json,
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    if !settings_file.exists().await {
        warn!(
            "No settings file at {}, running with defaults",
            settings_path
        );
    }

    info!(
        "Running WebDeploy server v{} (data dir {})",
        version.version, settings.data_dir
    );
    let result = run(settings, await_shutdown_signal()).await;
    if let Err(e) = result {
        error!("Failed to run the server: {e}");
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
