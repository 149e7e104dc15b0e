/// A single call-to-action button that opens a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkButton {
    pub label: String,
    pub url: String,
}

/// Message handed to a [`MessagingPort`](super::port::MessagingPort).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub html: String,
    pub button: Option<LinkButton>,
    pub disable_link_preview: bool,
}

impl OutboundMessage {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            button: None,
            disable_link_preview: true,
        }
    }

    pub fn with_button(mut self, button: Option<LinkButton>) -> Self {
        self.button = button;
        self
    }
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_html: bool,
    pub supports_inline_buttons: bool,
    pub max_message_len: usize,
}
