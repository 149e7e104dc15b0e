use std::sync::Arc;

use teloxide::{prelude::*, types::ChatMemberUpdated};
use tracing::{debug, warn};

use otp_relay_core::{
    admin::Discovery,
    domain::{DestinationId, UserId},
};

use crate::router::AppState;

/// The bot's own membership changed. Only the absent -> present transition matters.
pub async fn handle_membership(
    update: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let joined = !update.old_chat_member.kind.is_present() && update.new_chat_member.kind.is_present();
    if !joined {
        debug!(chat = update.chat.id.0, "bot membership changed, not a join");
        return Ok(());
    }

    let adder = UserId(update.from.id.0 as i64);
    let chat = DestinationId::from(update.chat.id.0);
    let title = update.chat.title().map(str::to_string);

    if state.console.on_added_to_chat(adder, chat.clone(), title).await == Discovery::Added {
        let notice = "✅ This chat will now receive OTP messages.";
        if let Err(e) = state.messenger.send_html(&chat, notice).await {
            warn!(destination = %chat, error = %e, "failed to confirm discovered chat");
        }
    }
    Ok(())
}
