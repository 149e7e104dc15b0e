//! Telegram update handlers.
//!
//! Each handler is a small adapter that pulls ids and text out of the update and
//! calls into the `otp-relay-core` admin console.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{ChatMemberUpdated, Message},
};

use crate::router::AppState;

mod commands;
mod membership;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    commands::handle_command(msg, state).await
}

pub async fn handle_membership(
    update: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    membership::handle_membership(update, state).await
}
