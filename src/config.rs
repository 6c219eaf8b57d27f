use std::{env, path::PathBuf, str::FromStr, time::Duration};

use tracing::warn;

/// Service settings, read from the environment once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where downloads go when a request names no directory.
    pub root: PathBuf,
    pub ledger_path: PathBuf,
    pub bind: String,
    /// Minimum time between ledger writes while a download is running.
    pub persist_interval: Duration,
    /// How long shutdown waits for running downloads.
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let root = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let ledger_path = dirs::config_dir()
            .unwrap_or_else(|| root.join(".config"))
            .join("stowaway")
            .join("downloads.json");
        Config {
            root,
            ledger_path,
            bind: "127.0.0.1:3001".to_string(),
            persist_interval: Duration::from_millis(2000),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

fn parsed_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value {:?} for {}", value, name);
            default
        }),
        None => default,
    }
}

impl Config {
    pub fn from_env() -> Self {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Build the settings from `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default = Config::default();
        Config {
            root: lookup("STOWAWAY_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.root),
            ledger_path: lookup("STOWAWAY_LEDGER_PATH")
                .map(PathBuf::from)
                .unwrap_or(default.ledger_path),
            bind: lookup("STOWAWAY_BIND").unwrap_or(default.bind),
            persist_interval: Duration::from_millis(parsed_or(
                &lookup,
                "STOWAWAY_PERSIST_INTERVAL_MS",
                default.persist_interval.as_millis() as u64,
            )),
            shutdown_grace: Duration::from_secs(parsed_or(
                &lookup,
                "STOWAWAY_SHUTDOWN_GRACE_SECS",
                default.shutdown_grace.as_secs(),
            )),
        }
    }
}
