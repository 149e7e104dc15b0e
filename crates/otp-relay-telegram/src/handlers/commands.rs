use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use otp_relay_core::domain::{DestinationId, UserId};

use crate::router::AppState;

/// Split an HTML reply at line boundaries so every chunk fits the platform limit.
///
/// Replies are built line by line with tags closed on each line, so a line boundary is
/// always a safe cut. A single over-long line is cut on a char boundary.
fn split_lines(html: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();

    for line in html.split('\n') {
        if !cur.is_empty() && cur.len() + 1 + line.len() > limit {
            chunks.push(std::mem::take(&mut cur));
        }
        if line.len() > limit {
            let mut rest = line;
            while rest.len() > limit {
                let mut cut = limit;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            cur.push_str(rest);
            continue;
        }
        if !cur.is_empty() {
            cur.push('\n');
        }
        cur.push_str(line);
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }
    chunks
}

async fn send_html_split(state: &AppState, chat: &DestinationId, html: &str) {
    let limit = state.messenger.capabilities().max_message_len.max(200);
    for chunk in split_lines(html, limit) {
        if let Err(e) = state.messenger.send_html(chat, &chunk).await {
            warn!(destination = %chat, error = %e, "failed to send command reply");
            return;
        }
    }
}

pub async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    let caller = UserId(user.id.0 as i64);
    let chat = DestinationId::from(msg.chat.id.0);

    if let Some(reply) = state.console.handle(caller, &chat, text).await {
        send_html_split(&state, &chat, &reply).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_replies_are_one_chunk() {
        assert_eq!(split_lines("a\nb", 4096), vec!["a\nb".to_string()]);
        assert!(split_lines("", 4096).is_empty());
    }

    #[test]
    fn splits_on_line_boundaries() {
        let html = "aaaa\nbbbb\ncccc";
        assert_eq!(split_lines(html, 9), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn cuts_over_long_lines_on_char_boundaries() {
        let line = "é".repeat(5); // 10 bytes
        let chunks = split_lines(&line, 3);
        assert!(chunks.iter().all(|c| c.len() <= 3));
        assert_eq!(chunks.concat(), line);
    }
}
