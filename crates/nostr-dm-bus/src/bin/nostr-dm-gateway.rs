use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nostr_dm_bus::{
    or_default_relays, parse_relays, BusConfig, BusContext, BusRegistry, Error, InboundMessage,
    MessageHandler, NostrPoolTransport, ReplyHandle, DEFAULT_STATE_DIR,
};

#[derive(Debug, Parser)]
#[command(name = "nostr-dm-gateway")]
#[command(about = "Echo NIP-17 private messages back to their senders")]
struct Args {
    #[arg(long, env = "NOSTR_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
    /// Comma or whitespace separated relay URLs.
    #[arg(long, env = "NOSTR_RELAYS")]
    relays: Option<String>,
    #[arg(long, env = "NOSTR_ACCOUNT_ID")]
    account_id: Option<String>,
    #[arg(long, env = "NOSTR_STATE_DIR", default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,
    /// Prepended to every echoed reply.
    #[arg(long, default_value = "")]
    prefix: String,
}

struct EchoHandler {
    prefix: String,
}

#[async_trait]
impl MessageHandler for EchoHandler {
    async fn handle(&self, message: InboundMessage, reply: ReplyHandle) -> Result<(), Error> {
        info!(sender = %message.sender, chars = message.text.len(), "Echoing message");
        let report = reply.send(&format!("{}{}", self.prefix, message.text)).await?;
        if !report.failures.is_empty() {
            warn!(failed = report.failures.len(), "Echo partially published");
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let relays = or_default_relays(args.relays.as_deref().map(parse_relays).unwrap_or_default());
    let mut config = BusConfig::new(args.private_key, relays).with_state_dir(args.state_dir);
    if let Some(account_id) = args.account_id {
        config = config.with_account_id(account_id);
    }

    let transport = NostrPoolTransport::connect(&config.relays).await?;
    let handler = EchoHandler {
        prefix: args.prefix,
    };
    let registry = BusRegistry::new();
    let bus = registry
        .start(
            config,
            BusContext::new(Arc::new(transport), Arc::new(handler)),
        )
        .await?;
    info!(
        account_id = bus.account_id(),
        pubkey = %bus.public_key(),
        "Gateway running; press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    registry.stop_all().await;

    let metrics = bus.metrics();
    info!(
        delivered = metrics.messages_delivered,
        duplicates = metrics.duplicate_gift_wraps + metrics.duplicate_rumors,
        "Gateway stopped"
    );
    Ok(())
}
