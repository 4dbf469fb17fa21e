use std::path::PathBuf;
use std::time::Duration;

use crate::notify::{SmtpConfig, DEFAULT_FROM_ADDRESS, DEFAULT_SMTP_PORT};

/// Server settings, read once at start-up from `SLOTWISE_*` and `SMTP_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub admin_users: Vec<String>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub reminder_lead_hours: u32,
    pub reminder_interval: Duration,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
    /// `None` when `SMTP_HOST` is unset: reminders go to the outbox file.
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    TlsPair,
    NoAdmins,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: '{value}'"),
            ConfigError::TlsPair => write!(
                f,
                "both SLOTWISE_TLS_CERT and SLOTWISE_TLS_KEY must be set, or neither"
            ),
            ConfigError::NoAdmins => write!(f, "SLOTWISE_ADMIN_USERS must name at least one user"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset and empty values take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let admin_users: Vec<String> = get("SLOTWISE_ADMIN_USERS")
            .unwrap_or_else(|| "admin".into())
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if admin_users.is_empty() {
            return Err(ConfigError::NoAdmins);
        }

        let tls_cert = get("SLOTWISE_TLS_CERT");
        let tls_key = get("SLOTWISE_TLS_KEY");
        if tls_cert.is_some() != tls_key.is_some() {
            return Err(ConfigError::TlsPair);
        }

        let reminder_lead_hours: u32 = parse_or(&get, "SLOTWISE_REMINDER_LEAD_HOURS", 24)?;
        if reminder_lead_hours == 0 {
            return Err(ConfigError::Invalid {
                var: "SLOTWISE_REMINDER_LEAD_HOURS",
                value: "0".into(),
            });
        }
        let interval_secs: u64 = parse_or(&get, "SLOTWISE_REMINDER_INTERVAL_SECS", 900)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SLOTWISE_REMINDER_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        let smtp = match get("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or(&get, "SMTP_PORT", DEFAULT_SMTP_PORT)?,
                from: get("SMTP_FROM").unwrap_or_else(|| DEFAULT_FROM_ADDRESS.into()),
                user: get("SMTP_USER"),
                password: get("SMTP_PASSWORD"),
            }),
            None => None,
        };

        Ok(Self {
            port: parse_or(&get, "SLOTWISE_PORT", 5433)?,
            bind: get("SLOTWISE_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(get("SLOTWISE_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: get("SLOTWISE_PASSWORD").unwrap_or_else(|| "slotwise".into()),
            admin_users,
            max_connections: parse_or(&get, "SLOTWISE_MAX_CONNECTIONS", 256)?,
            compact_threshold: parse_or(&get, "SLOTWISE_COMPACT_THRESHOLD", 1000)?,
            reminder_lead_hours,
            reminder_interval: Duration::from_secs(interval_secs),
            tls_cert,
            tls_key,
            metrics_port: get("SLOTWISE_METRICS_PORT")
                .map(|v| parse_value("SLOTWISE_METRICS_PORT", v))
                .transpose()?,
            smtp,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("schedule.wal")
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("reminders.jsonl")
    }
}

fn parse_value<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid { var, value })
}

fn parse_or<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(var) {
        Some(v) => parse_value(var, v),
        None => Ok(default),
    }
}
