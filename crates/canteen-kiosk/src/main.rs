//! Command-line entry point for the canteen table kiosk.

mod messages;
mod runtime;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use canteen_core::config::env_vars;
use canteen_core::KioskConfig;
use canteen_hardware::HardwareContext;
use clap::{Parser, Subcommand};

/// Canteen kiosk - urge button, pickup notices and kitchen status over MQTT.
#[derive(Parser, Debug)]
#[command(name = "canteen-kiosk")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform (defaults to `run`).
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the kiosk event loop until Ctrl-C.
    Run,
    /// Publish a single message and exit.
    Publish {
        /// Topic to publish to.
        topic: String,
        /// Message text.
        message: String,
        /// Seconds to wait for the broker to accept the connection.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Play the success tone once.
    Beep,
    /// Flash the status LED once.
    Flash,
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    // JSON output for log collectors on the board
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("warn,canteen={}", level)));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init();
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<KioskConfig> {
    let config = match path {
        Some(path) => KioskConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => KioskConfig::from_env().context("Invalid configuration")?,
    };
    tracing::debug!(?config, "Configuration loaded");
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);
    let config = load_config(args.config.as_deref())?;

    // All callbacks run on one thread; only the key poller has its own.
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        match args.command.unwrap_or(Command::Run) {
            Command::Run => runtime::run(config).await,
            Command::Publish {
                topic,
                message,
                timeout,
            } => {
                runtime::publish_once(&config, &topic, &message, Duration::from_secs(timeout)).await
            }
            Command::Beep => beep(&config).await,
            Command::Flash => flash(&config).await,
        }
    })
}

async fn beep(config: &KioskConfig) -> Result<()> {
    let (hardware, _keys) = HardwareContext::init(&config.hardware);
    let tone = hardware
        .play_success_sound()
        .context("Buzzer unavailable (is /dev/mem accessible?)")?;
    tone.wait().await;
    hardware.shutdown().await;
    Ok(())
}

async fn flash(config: &KioskConfig) -> Result<()> {
    let (hardware, _keys) = HardwareContext::init(&config.hardware);
    hardware.flash_led_success().wait().await;
    hardware.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[kiosk]\ntable = 9\n\n[hardware]\nsimulate = true").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.kiosk.table, 9);
        assert!(config.hardware.simulate);
        assert_eq!(config.mqtt.port, 1883);
    }

    #[test]
    fn test_load_config_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiosk.toml");
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("kiosk.toml"));

        std::fs::write(&path, "[hardware]\nbutton_pin = 33\n").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("Failed to load config"));
    }

    #[test]
    fn test_parse_publish_command() {
        let args = Args::try_parse_from([
            "canteen-kiosk",
            "publish",
            "canteen/service/urge",
            "hello",
            "--config",
            "kiosk.toml",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("kiosk.toml")));
        match args.command {
            Some(Command::Publish {
                topic,
                message,
                timeout,
            }) => {
                assert_eq!(topic, "canteen/service/urge");
                assert_eq!(message, "hello");
                assert_eq!(timeout, 5);
            }
            other => panic!("expected publish, got {:?}", other),
        }
    }
}
