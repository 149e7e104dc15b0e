//! Formatting utilities (OTP extraction, number masking, Telegram HTML layout).

use std::sync::OnceLock;

use chrono::Local;
use regex::Regex;

use crate::source::SourceEvent;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Turns a raw source event into the outbound message body.
pub trait MessageFormatter: Send + Sync {
    fn format(&self, event: &SourceEvent) -> String;
}

/// Default formatter: Telegram HTML card with time, masked number, code and full text.
#[derive(Clone, Copy, Debug, Default)]
pub struct OtpHtmlFormatter;

impl MessageFormatter for OtpHtmlFormatter {
    fn format(&self, event: &SourceEvent) -> String {
        let time_sent = event
            .reported_at
            .clone()
            .unwrap_or_else(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        let otp = extract_otp(&event.body);
        let masked = mask_number(&event.origin);

        format!(
            "<b>✅ New OTP Received</b>\n\n\
🕰️ <b>Time:</b> {}\n\
📞 <b>Number:</b> {}\n\
🔑 <b>OTP Code:</b> <code>{}</code>\n\
💬 <b>Full Message:</b>\n<pre>{}</pre>\n",
            escape_html(&time_sent),
            escape_html(&masked),
            escape_html(&otp),
            escape_html(&event.body),
        )
    }
}

fn grouped_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{3,4}[- ]?\d{3,4}").expect("valid regex"))
}

fn plain_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d{4,8}").expect("valid regex"))
}

/// Best-effort code extraction.
///
/// Prefers grouped codes like `123-456` / `123 456` (separators stripped), then any
/// 4-8 digit run. Returns `N/A` when nothing looks like a code.
pub fn extract_otp(message: &str) -> String {
    let normalized = message.replace(['\u{2013}', '\u{2014}'], "-");

    if let Some(m) = grouped_code_re().find(&normalized) {
        return m.as_str().replace(['-', ' '], "");
    }
    if let Some(m) = plain_code_re().find(&normalized) {
        return m.as_str().to_string();
    }
    "N/A".to_string()
}

/// Hide the middle of a phone number: first 3 + `***` + last 5 (only for 10+ chars).
pub fn mask_number(number: &str) -> String {
    let chars: Vec<char> = number.chars().collect();
    if chars.len() < 10 {
        return number.to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{head}***{tail}")
}
