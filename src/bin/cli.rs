//! CLI binary for voxlink.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use voxlink::audio::CpalBackend;
use voxlink::credentials::{
    API_KEY_ACCOUNT, CredentialGate, CredentialManager, CredentialRef, StoredCredentialGate,
    create_manager,
};
use voxlink::session::messages;
use voxlink::transport::LiveConnector;
use voxlink::{SessionConfig, SessionController, SessionHandle, SessionState, SessionStatus, StartOutcome};

/// voxlink: talk to a hosted voice model from the terminal.
#[derive(Parser)]
#[command(name = "voxlink", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation.
    Chat,

    /// List available audio devices.
    Devices,

    /// Manage the API key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Manage the config file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum KeyAction {
    /// Store the API key in the platform keyring (reads stdin if omitted).
    Set {
        /// The key value.
        value: Option<String>,
    },
    /// Remove the stored API key.
    Clear,
    /// Show whether a key is available.
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is for status lines.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("voxlink=info,tungstenite=warn")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(SessionConfig::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(load_config(&config_path)?).await,
        Command::Devices => list_devices(),
        Command::Key { action } => run_key(action, &config_path),
        Command::Config {
            action: ConfigAction::Init { force },
        } => init_config(&config_path, force),
    }
}

/// Load the config file, or defaults if it does not exist yet.
fn load_config(path: &Path) -> anyhow::Result<SessionConfig> {
    if path.exists() {
        SessionConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))
    } else {
        Ok(SessionConfig::default())
    }
}

async fn run_chat(config: SessionConfig) -> anyhow::Result<()> {
    println!("voxlink v{}", env!("CARGO_PKG_VERSION"));

    let env_hint = config.credentials.env_var.clone();
    let gate = StoredCredentialGate::new(&config.credentials, create_manager())
        .with_selection_hook(Arc::new(move || match &env_hint {
            Some(var) => println!("Run `voxlink key set`, or export {var}, then start again."),
            None => println!("Run `voxlink key set`, then start again."),
        }));

    let controller = SessionController::new(
        config,
        Arc::new(CpalBackend::new()),
        Arc::new(LiveConnector::new()),
        Arc::new(gate),
    );
    let handle = controller.spawn();

    println!("Connecting...");
    let Some(outcome) = start_or_interrupt(&handle, tokio::signal::ctrl_c()).await? else {
        println!("Session ended.");
        return Ok(());
    };

    match outcome {
        StartOutcome::CredentialRequired => {
            println!("{}", messages::CREDENTIAL_REQUIRED);
            handle.select_credential().await?;
            return Ok(());
        }
        StartOutcome::Cancelled => return Ok(()),
        StartOutcome::Connected | StartOutcome::Connecting => {}
    }

    println!("\nConnected! Speak into your microphone. Press Ctrl+C to stop.\n");
    let ended = watch_session(&handle);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C, shutting down...");
            handle.stop().await?;
        }
        status = ended => {
            if let Some(message) = status.error_message {
                println!("\n{message}");
            }
            if status.needs_credential {
                handle.select_credential().await?;
            }
        }
    }

    println!("Session ended.");
    Ok(())
}

/// Wait for the start to settle. If `interrupt` fires first the session is
/// stopped and `None` is returned.
async fn start_or_interrupt(
    handle: &SessionHandle,
    interrupt: impl Future<Output = std::io::Result<()>>,
) -> anyhow::Result<Option<StartOutcome>> {
    tokio::select! {
        outcome = handle.start() => match outcome {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                if let Some(message) = handle.status().error_message {
                    println!("{message}");
                }
                Err(e.into())
            }
        },
        signal = interrupt => {
            signal.context("failed to listen for Ctrl+C")?;
            info!("received Ctrl+C while connecting, shutting down...");
            handle.stop().await?;
            Ok(None)
        }
    }
}

/// Print speaking changes until the session is disconnected; returns the
/// final status.
async fn watch_session(handle: &SessionHandle) -> SessionStatus {
    let mut status: watch::Receiver<SessionStatus> = handle.subscribe();
    let mut speaking = false;
    loop {
        let current = status.borrow_and_update().clone();
        if current.state == SessionState::Disconnected {
            return current;
        }
        if current.is_speaking != speaking {
            speaking = current.is_speaking;
            println!("{}", if speaking { "[speaking]" } else { "[listening]" });
        }
        if status.changed().await.is_err() {
            return handle.status();
        }
    }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Input devices:");
    for name in CpalBackend::list_input_devices()? {
        println!("  - {name}");
    }

    println!("\nOutput devices:");
    for name in CpalBackend::list_output_devices()? {
        println!("  - {name}");
    }

    Ok(())
}

fn run_key(action: KeyAction, config_path: &Path) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;
    let manager = create_manager();

    match action {
        KeyAction::Set { value } => {
            let value = match value {
                Some(v) => v,
                None => read_key()?,
            };
            let value = value.trim();
            anyhow::ensure!(!value.is_empty(), "API key must not be empty");

            let cred_ref = manager
                .store(API_KEY_ACCOUNT, value)
                .context("failed to store API key in the keyring")?;
            config.credentials.api_key = cred_ref;
            config.save_to_file(config_path)?;
            println!("API key stored. Config updated at {}", config_path.display());
        }
        KeyAction::Clear => {
            manager
                .delete(&config.credentials.api_key)
                .context("failed to delete API key")?;
            config.credentials.api_key = CredentialRef::None;
            config.save_to_file(config_path)?;
            println!("API key removed.");
        }
        KeyAction::Status => {
            let gate = StoredCredentialGate::new(&config.credentials, manager);
            let source = match &config.credentials.api_key {
                CredentialRef::Keyring { .. } => "keyring",
                CredentialRef::Plaintext(_) => "config file",
                CredentialRef::None => "not configured",
            };
            println!("Stored key: {source}");
            if let Some(var) = &config.credentials.env_var {
                let set = std::env::var(var).is_ok_and(|v| !v.trim().is_empty());
                println!("{var}: {}", if set { "set" } else { "unset" });
            }
            println!(
                "Ready to start: {}",
                if gate.has_credential() { "yes" } else { "no" }
            );
        }
    }
    Ok(())
}

fn read_key() -> anyhow::Result<String> {
    eprint!("API key: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line)
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    SessionConfig::default().save_to_file(path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}
