//! Telegram adapter (teloxide).
//!
//! This crate implements the `otp-relay-core` MessagingPort over Telegram Bot API and
//! routes incoming updates to the admin console.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InlineKeyboardButton, InlineKeyboardMarkup, ParseMode, Recipient},
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use otp_relay_core::{
    domain::{DestinationId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{LinkButton, MessagingCapabilities, OutboundMessage},
    },
    Result,
};

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
}

impl TelegramMessenger {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    /// Numeric ids are chat ids, `@name` is a public channel or group username.
    fn recipient(to: &DestinationId) -> Result<Recipient> {
        let raw = to.as_str();
        if let Ok(id) = raw.parse::<i64>() {
            return Ok(Recipient::Id(teloxide::types::ChatId(id)));
        }
        if raw.len() > 1 && raw.starts_with('@') {
            return Ok(Recipient::ChannelUsername(raw.to_string()));
        }
        Err(Error::Validation(format!(
            "unsupported telegram destination: {raw}"
        )))
    }

    fn keyboard(button: &LinkButton) -> Result<InlineKeyboardMarkup> {
        let url = reqwest::Url::parse(&button.url)
            .map_err(|e| Error::Validation(format!("bad button url {}: {e}", button.url)))?;
        Ok(InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::url(button.label.clone(), url),
        ]]))
    }

    /// Transport errors carry the request URL, which embeds the bot token.
    fn map_err(&self, e: teloxide::RequestError) -> Error {
        let text = e.to_string().replace(self.bot.token(), "<token>");
        Error::External(format!("telegram error: {text}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        tracing::debug!(wait_ms = d.as_millis() as u64, "telegram asked to retry");
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(self.map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_html: true,
            supports_inline_buttons: true,
            max_message_len: 4096,
        }
    }

    async fn send(&self, to: &DestinationId, msg: &OutboundMessage) -> Result<MessageRef> {
        let recipient = Self::recipient(to)?;
        let markup = msg.button.as_ref().map(Self::keyboard).transpose()?;

        let sent = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_message(recipient.clone(), msg.html.clone())
                    .parse_mode(ParseMode::Html)
                    .disable_web_page_preview(msg.disable_link_preview);
                match &markup {
                    Some(m) => req.reply_markup(m.clone()),
                    None => req,
                }
            })
            .await?;

        Ok(MessageRef {
            destination: to.clone(),
            message_id: sent.id.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_destination_ids_to_recipients() {
        let id = DestinationId::parse("-1001234").unwrap();
        assert_eq!(
            TelegramMessenger::recipient(&id).unwrap(),
            Recipient::Id(teloxide::types::ChatId(-1001234))
        );

        let channel = DestinationId::parse("@otp_feed").unwrap();
        assert_eq!(
            TelegramMessenger::recipient(&channel).unwrap(),
            Recipient::ChannelUsername("@otp_feed".to_string())
        );

        let bad = DestinationId::parse("otp_feed").unwrap();
        assert!(matches!(
            TelegramMessenger::recipient(&bad),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn button_becomes_single_url_row() {
        let markup = TelegramMessenger::keyboard(&LinkButton {
            label: "Join".into(),
            url: "https://t.me/otp_feed".into(),
        })
        .unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Join");

        assert!(TelegramMessenger::keyboard(&LinkButton {
            label: "x".into(),
            url: "not a url".into(),
        })
        .is_err());
    }
}
