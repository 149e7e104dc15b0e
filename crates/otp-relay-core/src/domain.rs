use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

/// Platform user id (numeric). Identifies admins and the owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque destination identifier: a numeric chat id or a `@channel` username.
///
/// The core only requires it to be non-empty and free of whitespace; the
/// messaging adapter decides whether the platform accepts it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(Error::Validation("destination id is empty".to_string()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(Error::Validation(format!(
                "destination id must not contain whitespace: {id}"
            )));
        }
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for DestinationId {
    fn from(chat_id: i64) -> Self {
        Self(chat_id.to_string())
    }
}

/// Accepts a string or a bare integer chat id, and validates either.
impl<'de> Deserialize<'de> for DestinationId {
    fn deserialize<D: serde::Deserializer<'de>>(de: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Numeric(i64),
        }

        match Raw::deserialize(de)? {
            Raw::Text(s) => DestinationId::parse(&s).map_err(serde::de::Error::custom),
            Raw::Numeric(n) => Ok(DestinationId::from(n)),
        }
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One forwarding target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(alias = "chat_id")]
    pub id: DestinationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "button_text")]
    pub button_label: Option<String>,
    #[serde(default, alias = "button_url")]
    pub button_target: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub message_count: u64,
}

fn enabled_by_default() -> bool {
    true
}

impl Destination {
    /// A fresh, enabled destination without button metadata.
    pub fn new(id: DestinationId) -> Self {
        Self {
            id,
            title: None,
            button_label: None,
            button_target: None,
            enabled: true,
            message_count: 0,
        }
    }

    pub fn with_button(mut self, label: Option<String>, target: Option<String>) -> Self {
        self.button_label = label;
        self.button_target = target;
        self
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }
}

/// A stable reference to a sent message.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub destination: DestinationId,
    pub message_id: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_id_rejects_blank_and_whitespace() {
        assert!(DestinationId::parse("   ").is_err());
        assert!(DestinationId::parse("-100 123").is_err());
        assert_eq!(
            DestinationId::parse(" -100123 ").unwrap().as_str(),
            "-100123"
        );
    }

    #[test]
    fn legacy_group_record_deserializes() {
        let raw = r#"{"chat_id":"-1001","button_text":"Join","button_url":"https://t.me/x"}"#;
        let d: Destination = serde_json::from_str(raw).unwrap();
        assert_eq!(d.id.as_str(), "-1001");
        assert_eq!(d.button_label.as_deref(), Some("Join"));
        assert_eq!(d.button_target.as_deref(), Some("https://t.me/x"));
        assert!(d.enabled);
        assert_eq!(d.message_count, 0);
    }

    #[test]
    fn numeric_and_blank_ids_in_documents() {
        let d: Destination = serde_json::from_str(r#"{"id":-1002}"#).unwrap();
        assert_eq!(d.id.as_str(), "-1002");
        assert!(serde_json::from_str::<Destination>(r#"{"id":"  "}"#).is_err());
    }
}
