//! `otp-relay`: forwards OTP messages from an SMS source to Telegram destinations.
//!
//! # Usage
//!
//! ```text
//! otp-relay                                   # run the relay (reads .env / environment)
//! otp-relay migrate --from bot_data.json --to relay.db --owner 12345
//! ```

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use otp_relay_core::{
    admin::AdminConsole,
    config::{Config, StorageBackend},
    domain::{DestinationId, UserId},
    fanout::{ButtonDefaults, FanoutEngine},
    formatting::OtpHtmlFormatter,
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    source::{HttpSource, HttpSourceConfig},
    store::{self, ConfigStore},
    worker::{PollWorker, WorkerSettings, WorkerStatus},
};
use otp_relay_telegram::{router, TelegramMessenger};

#[derive(Parser, Debug)]
#[command(name = "otp-relay", about = "Relay OTP messages to Telegram destinations")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay (default).
    Run,
    /// Copy every destination and admin from one store file into another.
    ///
    /// `.json` files use the flat-file backend, anything else is SQLite.
    Migrate {
        #[arg(long, value_name = "FILE")]
        from: PathBuf,
        #[arg(long, value_name = "FILE")]
        to: PathBuf,
        /// Owner user id; never copied into the admin roster.
        #[arg(long, env = "OWNER_ID")]
        owner: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    otp_relay_core::logging::init("otp-relay")?;

    match Args::parse().command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Migrate { from, to, owner } => migrate(from, to, UserId(owner)).await,
    }
}

async fn run() -> anyhow::Result<()> {
    let cfg = Config::load().context("invalid configuration")?;
    info!(
        storage = cfg.storage.label(),
        owner = %cfg.owner_id,
        poll_ms = cfg.poll_interval.as_millis() as u64,
        keywords = cfg.otp_keywords.len(),
        "starting otp relay"
    );

    let store = store::open(&cfg.storage, cfg.owner_id)
        .await
        .context("failed to open store")?;

    // Fan-out bursts one payload to every destination; throttle below Telegram's flood
    // limits. The adapter still retries once on RetryAfter.
    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig {
            global_min_interval: cfg.throttle_global,
            per_chat_min_interval: cfg.throttle_per_chat,
        },
    ));

    let cancel = CancellationToken::new();
    let status = Arc::new(WorkerStatus::new());
    let defaults = ButtonDefaults::from(&cfg);

    let source = Arc::new(HttpSource::new(HttpSourceConfig::from(&cfg))?);
    let worker = PollWorker::new(
        source,
        Arc::new(OtpHtmlFormatter),
        FanoutEngine::new(store.clone(), messenger.clone(), defaults.clone()),
        WorkerSettings::from(&cfg),
        status.clone(),
    )
    .spawn(cancel.clone());

    let http = cfg.http_bind.map(|addr| {
        let state = otp_relay_http::AppState::new(store.clone(), status.clone());
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = otp_relay_http::serve(addr, state, cancel).await {
                error!(error = %e, "status api failed");
            }
        })
    });

    if cfg.notify_owner_on_start {
        let owner = DestinationId::from(cfg.owner_id.0);
        let store = store.clone();
        let messenger = messenger.clone();
        let label = cfg.storage.label();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let count = store::destinations_or_empty(store.as_ref()).await.len();
            let text = format!(
                "🚀 <b>OTP relay started</b>\n\nStorage: {label}\nDestinations: {count}\n\nSend /help for commands."
            );
            if let Err(e) = messenger.send_html(&owner, &text).await {
                warn!(error = %e, "startup notification failed");
            }
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    let state = Arc::new(router::AppState {
        console: Arc::new(AdminConsole::new(store.clone(), status.clone(), defaults)),
        messenger,
    });
    let polling = router::run_polling(bot, state, cancel.clone()).await;

    // Whatever stopped the dispatcher stops everything else too.
    cancel.cancel();
    join_logged("poll worker", worker).await;
    if let Some(http) = http {
        join_logged("status api", http).await;
    }
    info!("otp relay stopped");
    polling
}

/// Await a background task. A panic is logged rather than dropped; returns whether the
/// task finished normally.
async fn join_logged(task: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(task, error = %e, "background task failed");
            false
        }
    }
}

fn backend_for(path: PathBuf) -> StorageBackend {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => StorageBackend::JsonFile(path),
        _ => StorageBackend::Sqlite(path),
    }
}

async fn migrate(from: PathBuf, to: PathBuf, owner: UserId) -> anyhow::Result<()> {
    anyhow::ensure!(from.exists(), "source store {} does not exist", from.display());
    anyhow::ensure!(from != to, "source and target are the same file");

    let src: Arc<dyn ConfigStore> = store::open(&backend_for(from.clone()), owner)
        .await
        .with_context(|| format!("opening {}", from.display()))?;
    let dst: Arc<dyn ConfigStore> = store::open(&backend_for(to.clone()), owner)
        .await
        .with_context(|| format!("opening {}", to.display()))?;

    let copied = store::migrate(src.as_ref(), dst.as_ref()).await?;
    info!(
        from = %from.display(),
        to = %to.display(),
        destinations = copied,
        "migration finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_is_picked_by_extension() {
        assert_eq!(
            backend_for("data/bot_data.JSON".into()),
            StorageBackend::JsonFile("data/bot_data.JSON".into())
        );
        assert_eq!(
            backend_for("relay.db".into()),
            StorageBackend::Sqlite("relay.db".into())
        );
    }

    #[tokio::test]
    async fn background_task_panics_are_reported() {
        assert!(join_logged("ok", tokio::spawn(async {})).await);

        let failing = tokio::spawn(async { panic!("status api crashed") });
        assert!(!join_logged("status api", failing).await);
    }

    #[test]
    fn no_subcommand_means_run() {
        let args = Args::try_parse_from(["otp-relay"]).unwrap();
        assert!(args.command.is_none());

        let args = Args::try_parse_from([
            "otp-relay", "migrate", "--from", "a.json", "--to", "b.db", "--owner", "7",
        ])
        .unwrap();
        assert!(matches!(args.command, Some(Command::Migrate { owner: 7, .. })));
    }
}
