mod console;

use std::fmt::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use advisor::catalog::CatalogError;
use advisor::config::ConfigError;
use advisor::conversation::Role;
use advisor::store::{JsonFileStore, KeyValueStore, StoreError};
use advisor::webhook::{WebhookClient, WebhookError};
use advisor::{Advisor, AdvisorConfig, AdvisorError, Catalog, Collaborators, ProductSummary};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::console::{ConsoleHost, ConsoleSynthesizer, StdinRecognizer};

const BUNDLED_CATALOG: &str = include_str!("../../data/catalog.json");
const LISTEN_POLL: Duration = Duration::from_millis(100);
const QUIT_COMMANDS: &[&str] = &["/quit", "/exit"];

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("webhook client error: {0}")]
    Webhook(#[from] WebhookError),
    #[error("{0}")]
    Advisor(#[from] AdvisorError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "advisor", about = "Conversational product advisor in the terminal")]
struct Cli {
    /// Key-value store file. Defaults to the platform config directory.
    #[arg(long, global = true, env = "ADVISOR_STORE")]
    store: Option<PathBuf>,

    /// Product catalog JSON. Defaults to the bundled demo catalog.
    #[arg(long, global = true, env = "ADVISOR_CATALOG")]
    catalog: Option<PathBuf>,

    /// Speak replies (needs voice consent).
    #[arg(long, global = true, default_value_t = false)]
    voice: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chat with the advisor by typing.
    Chat,
    /// Feed stdin lines through the voice pipeline as recognized speech.
    Listen,
    /// Show or change persisted advisor settings.
    Config(ConfigCommand),
}

#[derive(Args, Debug)]
struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand, Debug)]
enum ConfigSubcommand {
    Show,
    /// Set the remote agent endpoint. Omit `--url` to unset it.
    Webhook {
        #[arg(long)]
        url: Option<String>,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        enabled: bool,
    },
    Consent {
        #[arg(value_enum)]
        value: Consent,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Consent {
    Grant,
    Revoke,
}

struct CliContext {
    store: Arc<dyn KeyValueStore>,
    catalog: Option<PathBuf>,
    voice: bool,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match cli.store {
        Some(path) => JsonFileStore::open(path)?,
        None => JsonFileStore::open_default()?,
    };
    let ctx = CliContext { store: Arc::new(store), catalog: cli.catalog, voice: cli.voice };

    match cli.command {
        Command::Chat => run_chat(&ctx).await,
        Command::Listen => run_listen(&ctx).await,
        Command::Config(config) => run_config(&ctx, config),
    }
}

// =============================================================================
// SETUP
// =============================================================================

fn load_config(ctx: &CliContext) -> Result<AdvisorConfig, CliError> {
    let mut config = AdvisorConfig::from_env()?.with_store(ctx.store.as_ref())?;
    config.voice.enabled |= ctx.voice;
    Ok(config)
}

fn load_catalog(ctx: &CliContext) -> Result<Catalog, CliError> {
    Ok(match &ctx.catalog {
        Some(path) => Catalog::from_path(path)?,
        None => Catalog::from_json(BUNDLED_CATALOG)?,
    })
}

fn build_advisor(ctx: &CliContext, recognizer: Option<Arc<StdinRecognizer>>) -> Result<Arc<Advisor>, CliError> {
    let config = load_config(ctx)?;
    let remote = WebhookClient::new(config.webhook.timeouts)?;
    let collaborators = Collaborators {
        host: Arc::new(ConsoleHost::new()),
        remote: Arc::new(remote),
        store: Arc::clone(&ctx.store),
        recognizer: recognizer.map(|r| r as Arc<dyn advisor::voice::SpeechRecognizer>),
        synthesizer: Some(Arc::new(ConsoleSynthesizer)),
    };
    Ok(Advisor::new(config, load_catalog(ctx)?, collaborators))
}

// =============================================================================
// CHAT
// =============================================================================

async fn run_chat(ctx: &CliContext) -> Result<(), CliError> {
    let advisor = build_advisor(ctx, None)?;
    advisor.set_open(true);
    let mut printed = print_new_messages(&advisor, 0, false);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if QUIT_COMMANDS.contains(&line.trim()) {
            break;
        }
        advisor.process_user_query(&line).await;
        printed = print_new_messages(&advisor, printed, false);
    }
    Ok(())
}

// =============================================================================
// LISTEN
// =============================================================================

async fn run_listen(ctx: &CliContext) -> Result<(), CliError> {
    let recognizer = Arc::new(StdinRecognizer::new());
    let closed = recognizer.closed();
    let advisor = build_advisor(ctx, Some(recognizer))?;
    advisor.set_open(true);
    advisor.set_voice_enabled(true);
    let mut printed = print_new_messages(&advisor, 0, true);

    if advisor.start_listening().is_err() {
        // The host has already shown why.
        return Ok(());
    }

    let mut ticker = tokio::time::interval(LISTEN_POLL);
    loop {
        tokio::select! {
            () = closed.notified() => break,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
            _ = ticker.tick() => {
                printed = print_new_messages(&advisor, printed, true);
                if !advisor.state().listening {
                    return Ok(());
                }
            }
        }
    }

    advisor.stop_listening_and_drain().await;
    print_new_messages(&advisor, printed, true);
    Ok(())
}

// =============================================================================
// CONFIG
// =============================================================================

fn run_config(ctx: &CliContext, config: ConfigCommand) -> Result<(), CliError> {
    match config.command {
        ConfigSubcommand::Show => {
            let config = load_config(ctx)?;
            print_json(&json!({
                "webhook": {
                    "url": config.webhook.url,
                    "enabled": config.webhook.enabled,
                    "timeout_secs": config.webhook.timeouts.request_secs,
                },
                "voice": {
                    "language": config.voice.language,
                    "enabled": config.voice.enabled,
                    "consent": config.voice.consent,
                    "max_restarts": config.voice.restart.max_restarts,
                },
                "history_window": config.history_window,
                "max_recommendations": config.max_recommendations,
            }))
        }
        ConfigSubcommand::Webhook { url, enabled } => {
            build_advisor(ctx, None)?.configure_webhook(url.as_deref(), enabled)?;
            println!("ok");
            Ok(())
        }
        ConfigSubcommand::Consent { value } => {
            build_advisor(ctx, None)?.set_voice_consent(matches!(value, Consent::Grant))?;
            println!("ok");
            Ok(())
        }
    }
}

// =============================================================================
// OUTPUT
// =============================================================================

/// Print messages after the first `already` ones; returns the new count.
/// Assistant turns are followed by their recommendation cards. Typed input
/// is not echoed back.
fn print_new_messages(advisor: &Advisor, already: usize, echo_user: bool) -> usize {
    let state = advisor.state();
    let messages = state.conversation.messages();
    for message in messages.iter().skip(already) {
        match message.role {
            Role::User if echo_user => println!("du> {}", message.content),
            Role::User => {}
            Role::Assistant => println!("berater> {}", message.content),
        }
    }
    let last_is_reply = messages.last().is_some_and(|m| m.role == Role::Assistant);
    if messages.len() > already && last_is_reply && state.show_products {
        for product in &state.recommendations {
            println!("  • {}", render_product(product));
        }
    }
    messages.len()
}

fn render_product(product: &ProductSummary) -> String {
    let mut line = format!("[{}] {} ({}) {:.2} €", product.id, product.name, product.category, product.price);
    if let Some(thc) = &product.thc_content {
        let _ = write!(line, ", THC {thc}");
    }
    if let Some(cbd) = &product.cbd_content {
        let _ = write!(line, ", CBD {cbd}");
    }
    line
}

fn print_json(value: &serde_json::Value) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
