use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::UserId, errors::Error, Result};

/// Keywords that mark a source message as OTP-like when `OTP_KEYWORDS` is unset.
pub const DEFAULT_OTP_KEYWORDS: &[&str] = &["otp", "code", "verify", "password", "كود", "رمز"];

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where destinations and admins are persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StorageBackend {
    /// Flat `{destinations, admins}` JSON document.
    JsonFile(PathBuf),
    /// SQLite database file.
    Sqlite(PathBuf),
}

impl StorageBackend {
    pub fn label(&self) -> &'static str {
        match self {
            StorageBackend::JsonFile(_) => "json",
            StorageBackend::Sqlite(_) => "sqlite",
        }
    }
}

/// Typed configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub telegram_bot_token: String,
    pub owner_id: UserId,
    pub notify_owner_on_start: bool,

    // Source
    pub source_url: String,
    pub source_token: String,
    pub source_records: u32,
    pub source_timeout: Duration,
    pub poll_interval: Duration,
    pub otp_keywords: Vec<String>,

    // Delivery
    pub default_button_label: String,
    pub default_button_url: Option<String>,
    pub throttle_global: Duration,
    pub throttle_per_chat: Duration,

    // Persistence
    pub storage: StorageBackend,

    // Status API
    pub http_bind: Option<SocketAddr>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable lookup (the process env in production).
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| var(key).and_then(non_empty);

        // Required
        let telegram_bot_token = get("BOT_TOKEN")
            .or_else(|| get("TELEGRAM_BOT_TOKEN"))
            .ok_or_else(|| required("BOT_TOKEN"))?;
        let owner_raw = get("OWNER_ID").ok_or_else(|| required("OWNER_ID"))?;
        let owner_id = owner_raw
            .trim()
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| Error::Config(format!("OWNER_ID must be a numeric user id: {owner_raw}")))?;
        let source_url = get("API_URL").ok_or_else(|| required("API_URL"))?;
        validate_url("API_URL", &source_url)?;
        if !source_url.trim().starts_with("http") {
            return Err(Error::Config("API_URL must use http or https".to_string()));
        }
        let source_token = get("API_TOKEN").ok_or_else(|| required("API_TOKEN"))?;

        // Source polling
        let source_records = parse_u64(get("API_RECORDS")).unwrap_or(1).clamp(1, 100) as u32;
        let source_timeout = Duration::from_millis(parse_u64(get("API_TIMEOUT_MS")).unwrap_or(8_000));
        let poll_interval = get("POLL_INTERVAL")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_secs(1))
            .max(MIN_POLL_INTERVAL);
        let otp_keywords = match get("OTP_KEYWORDS") {
            Some(csv) => parse_csv_lower(&csv),
            None => DEFAULT_OTP_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        };
        if otp_keywords.is_empty() {
            return Err(Error::Config("OTP_KEYWORDS must list at least one keyword".to_string()));
        }

        // Delivery
        let default_button_label = get("DEFAULT_BUTTON_TEXT").unwrap_or_else(|| "Open".to_string());
        let default_button_url = get("DEFAULT_BUTTON_URL");
        if let Some(url) = &default_button_url {
            validate_url("DEFAULT_BUTTON_URL", url)?;
        }
        let throttle_global = Duration::from_millis(parse_u64(get("THROTTLE_GLOBAL_MS")).unwrap_or(40));
        let throttle_per_chat =
            Duration::from_millis(parse_u64(get("THROTTLE_PER_CHAT_MS")).unwrap_or(1050));

        // Persistence: a database path wins over the flat file.
        let storage = match get("DATABASE_PATH") {
            Some(path) => StorageBackend::Sqlite(PathBuf::from(path)),
            None => StorageBackend::JsonFile(PathBuf::from(
                get("DATA_FILE").unwrap_or_else(|| "bot_data.json".to_string()),
            )),
        };

        let http_bind = get("HTTP_BIND")
            .map(|raw| {
                raw.trim()
                    .parse::<SocketAddr>()
                    .map_err(|e| Error::Config(format!("HTTP_BIND is not a socket address: {e}")))
            })
            .transpose()?;

        let notify_owner_on_start = parse_bool(get("NOTIFY_OWNER_ON_START")).unwrap_or(true);

        Ok(Self {
            telegram_bot_token,
            owner_id,
            notify_owner_on_start,
            source_url,
            source_token,
            source_records,
            source_timeout,
            poll_interval,
            otp_keywords,
            default_button_label,
            default_button_url,
            throttle_global,
            throttle_per_chat,
            storage,
            http_bind,
        })
    }
}

fn required(key: &str) -> Error {
    Error::Config(format!("{key} environment variable is required"))
}

fn validate_url(key: &str, raw: &str) -> Result<()> {
    check_link_url(raw)
        .map(|_| ())
        .map_err(|reason| Error::Config(format!("{key} {reason}")))
}

/// Parse a button or endpoint URL, allowing only http, https and tg links.
pub(crate) fn check_link_url(raw: &str) -> std::result::Result<reqwest::Url, String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| format!("is not a valid URL: {e}"))?;
    if !matches!(url.scheme(), "http" | "https" | "tg") {
        return Err("must use http, https or tg scheme".to_string());
    }
    Ok(url)
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_bool(v: Option<String>) -> Option<bool> {
    v.map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_u64(v: Option<String>) -> Option<u64> {
    v.and_then(|s| s.trim().parse::<u64>().ok())
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base() -> HashMap<String, String> {
        vars(&[
            ("BOT_TOKEN", "123:abc"),
            ("OWNER_ID", "42"),
            ("API_URL", "http://source.example/viewstats"),
            ("API_TOKEN", "t0k"),
        ])
    }

    fn load(map: &HashMap<String, String>) -> Result<Config> {
        Config::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn minimal_env_uses_defaults() {
        let cfg = load(&base()).unwrap();
        assert_eq!(cfg.owner_id, UserId(42));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.source_records, 1);
        assert_eq!(cfg.source_timeout, Duration::from_millis(8_000));
        assert_eq!(cfg.otp_keywords.len(), DEFAULT_OTP_KEYWORDS.len());
        assert_eq!(cfg.storage, StorageBackend::JsonFile("bot_data.json".into()));
        assert_eq!(cfg.default_button_label, "Open");
        assert!(cfg.default_button_url.is_none());
        assert!(cfg.http_bind.is_none());
        assert!(cfg.notify_owner_on_start);
    }

    #[test]
    fn missing_required_values_are_fatal() {
        for key in ["BOT_TOKEN", "OWNER_ID", "API_URL", "API_TOKEN"] {
            let mut map = base();
            map.remove(key);
            let err = load(&map).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{key} should be required");
        }

        let mut map = base();
        map.insert("BOT_TOKEN".into(), "   ".into());
        assert!(load(&map).is_err());
    }

    #[test]
    fn telegram_token_alias_is_accepted() {
        let mut map = base();
        map.remove("BOT_TOKEN");
        map.insert("TELEGRAM_BOT_TOKEN".into(), "999:zzz".into());
        assert_eq!(load(&map).unwrap().telegram_bot_token, "999:zzz");
    }

    #[test]
    fn rejects_non_numeric_owner_and_bad_urls() {
        let mut map = base();
        map.insert("OWNER_ID".into(), "@owner".into());
        assert!(load(&map).is_err());

        let mut map = base();
        map.insert("DEFAULT_BUTTON_URL".into(), "javascript:alert(1)".into());
        assert!(load(&map).is_err());

        let mut map = base();
        map.insert("HTTP_BIND".into(), "localhost".into());
        assert!(load(&map).is_err());
    }

    #[test]
    fn database_path_selects_sqlite_and_keywords_are_lowered() {
        let mut map = base();
        map.insert("DATABASE_PATH".into(), "/var/lib/relay.db".into());
        map.insert("DATA_FILE".into(), "ignored.json".into());
        map.insert("OTP_KEYWORDS".into(), " OTP , PIN ,, ".into());
        map.insert("POLL_INTERVAL".into(), "0.01".into());
        map.insert("HTTP_BIND".into(), "127.0.0.1:8080".into());

        let cfg = load(&map).unwrap();
        assert_eq!(cfg.storage, StorageBackend::Sqlite("/var/lib/relay.db".into()));
        assert_eq!(cfg.otp_keywords, vec!["otp".to_string(), "pin".to_string()]);
        assert_eq!(cfg.poll_interval, MIN_POLL_INTERVAL);
        assert_eq!(cfg.http_bind, Some("127.0.0.1:8080".parse().unwrap()));
    }
}
