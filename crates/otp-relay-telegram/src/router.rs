use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use otp_relay_core::{admin::AdminConsole, messaging::port::MessagingPort};

use crate::handlers;

#[derive(Clone)]
pub struct AppState {
    pub console: Arc<AdminConsole>,
    /// Replies go through the same (throttled) messenger as fan-out.
    pub messenger: Arc<dyn MessagingPort>,
}

/// Long-poll Telegram until `cancel` fires.
pub async fn run_polling(
    bot: Bot,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(username = %me.username(), "telegram bot connected"),
        Err(e) => warn!(error = %e.to_string().replace(bot.token(), "<token>"), "get_me failed"),
    }

    let handler = dptree::entry()
        .branch(Update::filter_my_chat_member().endpoint(handlers::handle_membership))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        // The dispatcher reports itself idle until polling has started.
        for _ in 0..50 {
            match shutdown.shutdown() {
                Ok(done) => {
                    done.await;
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(100)).await,
            }
        }
    });

    dispatcher.dispatch().await;
    info!("telegram dispatcher stopped");
    Ok(())
}
