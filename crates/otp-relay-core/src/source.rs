//! Source fetcher: one bounded HTTP call for the most recent SMS record.
//!
//! The upstream returns "latest N records" rather than a queue, so every call may hand
//! back a record we have already seen. Dedup happens in the worker, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{config::Config, errors::Error, Result};

/// A candidate event as reported by the source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceEvent {
    /// Phone number or sender handle.
    pub origin: String,
    pub body: String,
    /// Source-reported timestamp, verbatim. `None` when the source omitted it.
    pub reported_at: Option<String>,
}

/// Anything that can produce the latest event. `None` means "nothing new" for every
/// failure mode; callers never see transport errors.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn fetch_latest(&self) -> Option<SourceEvent>;
}

#[derive(Clone, Debug)]
pub struct HttpSourceConfig {
    pub url: String,
    pub token: String,
    pub records: u32,
    pub timeout: Duration,
}

impl From<&Config> for HttpSourceConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            url: cfg.source_url.clone(),
            token: cfg.source_token.clone(),
            records: cfg.source_records,
            timeout: cfg.source_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HttpSource {
    cfg: HttpSourceConfig,
    http: reqwest::Client,
}

impl HttpSource {
    pub fn new(cfg: HttpSourceConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent("otp-relay/0.1")
            .build()
            .map_err(|e| Error::Config(format!("failed to build source http client: {e}")))?;
        Ok(Self { cfg, http })
    }

    async fn fetch(&self) -> Result<Option<SourceEvent>> {
        let records = self.cfg.records.to_string();
        let resp = self
            .http
            .get(&self.cfg.url)
            .query(&[("token", self.cfg.token.as_str()), ("records", records.as_str())])
            .send()
            .await
            .map_err(|e| Error::External(format!("source request failed: {}", e.without_url())))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::External(format!("source returned status {status}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| Error::External(format!("source body read failed: {}", e.without_url())))?;
        Ok(parse_response(&body))
    }
}

#[async_trait]
impl EventSource for HttpSource {
    async fn fetch_latest(&self) -> Option<SourceEvent> {
        match self.fetch().await {
            Ok(ev) => ev,
            Err(e) => {
                warn!(error = %e, "source fetch failed");
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    num: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    dt: Option<String>,
}

/// Parse a source response body into at most one event (the first record).
///
/// Accepts `{status: "success", data: [...]}` or a bare `[...]` list. Anything else,
/// including `status` other than `success`, is "no event".
pub fn parse_response(body: &str) -> Option<SourceEvent> {
    let records = match serde_json::from_str::<Value>(body) {
        Ok(v @ Value::Array(_)) => serde_json::from_value::<Vec<Record>>(v).ok()?,
        Ok(v @ Value::Object(_)) => {
            let env = serde_json::from_value::<Envelope>(v).ok()?;
            if env.status.as_deref() != Some("success") {
                debug!(status = ?env.status, "source reported non-success status");
                return None;
            }
            env.data
        }
        Ok(_) | Err(_) => {
            debug!("source body is not a recognised JSON shape");
            return None;
        }
    };

    let first = records.into_iter().next()?;
    Some(SourceEvent {
        origin: first.num.map(value_to_string).unwrap_or_default(),
        body: first.message.unwrap_or_default(),
        reported_at: first.dt.filter(|s| !s.trim().is_empty()),
    })
}

fn value_to_string(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
