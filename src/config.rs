use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use rust_decimal::Decimal;

use crate::calendar::Calendar;
use crate::engine::EngineSettings;

#[derive(Debug)]
pub struct ConfigError {
    pub var: &'static str,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.var, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Process configuration, read once at startup from `DESKBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    /// Bearer token that identifies an administrator.
    pub admin_token: String,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub gst_rate: Decimal,
    pub calendar: Calendar,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("./data"),
            admin_token: "deskbook-admin".into(),
            metrics_port: None,
            compact_threshold: 1000,
            gst_rate: Decimal::new(18, 2),
            calendar: Calendar::utc(),
        }
    }
}

fn parse_var<T>(var: &'static str, lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| ConfigError {
            var,
            reason: format!("cannot parse {raw:?}: {e}"),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(bind) = parse_var("DESKBOOK_BIND", &lookup)? {
            cfg.bind = bind;
        }
        if let Some(dir) = lookup("DESKBOOK_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(token) = lookup("DESKBOOK_ADMIN_TOKEN") {
            if token.trim().is_empty() {
                return Err(ConfigError {
                    var: "DESKBOOK_ADMIN_TOKEN",
                    reason: "must not be empty".into(),
                });
            }
            cfg.admin_token = token;
        }
        cfg.metrics_port = parse_var("DESKBOOK_METRICS_PORT", &lookup)?;
        if let Some(threshold) = parse_var("DESKBOOK_COMPACT_THRESHOLD", &lookup)? {
            cfg.compact_threshold = threshold;
        }
        if let Some(rate) = parse_var::<Decimal>("DESKBOOK_GST_RATE", &lookup)? {
            if rate.is_sign_negative() || rate > Decimal::ONE {
                return Err(ConfigError {
                    var: "DESKBOOK_GST_RATE",
                    reason: format!("{rate} is outside 0..=1"),
                });
            }
            cfg.gst_rate = rate;
        }
        if let Some(minutes) = parse_var::<i32>("DESKBOOK_UTC_OFFSET_MINUTES", &lookup)? {
            cfg.calendar = Calendar::with_offset_minutes(minutes).ok_or(ConfigError {
                var: "DESKBOOK_UTC_OFFSET_MINUTES",
                reason: format!("{minutes} is not a valid offset"),
            })?;
        }
        Ok(cfg)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            calendar: self.calendar,
            gst_rate: self.gst_rate,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("deskbook.wal")
    }
}
