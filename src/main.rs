use anyhow::{bail, Context};
use clap::Parser;
use klaxon::alerts::AlertDispatcher;
use klaxon::config::{Config, SettingsHandle};
use klaxon::senders::{ChatWebhookSender, GenericWebhookSender};
use klaxon::store::MemoryStore;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the channel test-send tool
#[derive(Parser)]
#[command(
    name = "klaxon",
    about = "Send a test alert through a notification channel configuration",
    long_about = "Operator tool for the dependency-health dashboard's alert engine: \
                  takes a channel type and its JSON configuration blob, sends a \
                  synthetic status-change alert through the matching sender and \
                  reports the delivery outcome. Rule and throttle checks are \
                  bypassed, exactly like the dashboard's own test-send action."
)]
struct Cli {
    /// Channel type to exercise (chat_webhook or generic_webhook)
    #[arg(short = 't', long, value_name = "TYPE")]
    channel_type: String,

    /// Channel configuration as inline JSON
    #[arg(short, long, value_name = "JSON", conflicts_with = "config_file")]
    config: Option<String>,

    /// Read the channel configuration JSON from a file instead
    #[arg(long, value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Engine configuration file (TOML); supplies the dashboard base URL
    /// used for deep links
    #[arg(long, value_name = "FILE")]
    engine_config: Option<PathBuf>,

    /// Enable verbose logging output (sets RUST_LOG=debug)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Resolve the channel configuration blob from the chosen source
    fn channel_config(&self) -> anyhow::Result<String> {
        match (&self.config, &self.config_file) {
            (Some(json), _) => Ok(json.clone()),
            (None, Some(path)) => std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display())),
            (None, None) => bail!("either --config or --config-file is required"),
        }
    }
}

/// Merge the engine's dashboard base URL into a channel config blob
///
/// Channel blobs created through the dashboard's CRUD don't carry the
/// deployment's base URL; the composition root injects it so senders can
/// render deep links. An explicit `dashboard_url` in the blob wins, and a
/// blob that isn't a JSON object is passed through untouched for the sender
/// to reject with its own diagnostics.
fn inject_dashboard_url(config_json: &str, base_url: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(config_json) {
        Ok(mut value) => {
            if let Some(object) = value.as_object_mut() {
                object
                    .entry("dashboard_url")
                    .or_insert_with(|| serde_json::Value::String(base_url.to_string()));
                return value.to_string();
            }
            config_json.to_string()
        }
        Err(_) => config_json.to_string(),
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let engine_config = match &cli.engine_config {
        Some(path) => {
            info!("Loading engine configuration from: {}", path.display());
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    let mut channel_config = cli.channel_config()?;
    if let Some(base_url) = &engine_config.dashboard.base_url {
        channel_config = inject_dashboard_url(&channel_config, base_url);
    }

    let store = Arc::new(MemoryStore::new());
    let settings = SettingsHandle::new(engine_config.alerts.clone());
    let mut dispatcher = AlertDispatcher::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        Arc::new(settings),
    );
    dispatcher.register_sender(Arc::new(ChatWebhookSender::new()));
    dispatcher.register_sender(Arc::new(GenericWebhookSender::new()));

    info!("Sending test alert through '{}'", cli.channel_type);
    let result = dispatcher
        .send_test_alert(&cli.channel_type, &channel_config)
        .await;

    if result.success {
        println!("Test alert delivered.");
        Ok(())
    } else {
        bail!(
            "test alert failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        )
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "debug");
    }
    env_logger::init();

    if let Err(e) = run(&cli).await {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
