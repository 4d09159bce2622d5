use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";
const DEFAULT_CLIENT_SECRETS: &str = "client_secret.json";
const DEFAULT_SESSION_IDLE_MINUTES: i64 = 30;

/// Server settings, read from the environment (and `.env`, if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: SocketAddr,
    /// sqlite URL; `None` keeps everything in memory.
    pub database_url: Option<String>,
    pub client_secrets: PathBuf,
    /// Base URL the browser reaches us on. OAuth redirects and CORS use it.
    pub public_url: String,
    pub session_idle_minutes: i64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned())
            .parse::<SocketAddr>()
            .context("BIND_ADDR is not a socket address")?;
        let session_idle_minutes = match lookup("SESSION_IDLE_MINUTES") {
            Some(minutes) => minutes.parse::<i64>().context("SESSION_IDLE_MINUTES is not a number")?,
            None => DEFAULT_SESSION_IDLE_MINUTES,
        };
        let public_url = lookup("PUBLIC_URL")
            .unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();

        Ok(Self {
            bind_addr,
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            client_secrets: lookup("CLIENT_SECRETS")
                .unwrap_or_else(|| DEFAULT_CLIENT_SECRETS.to_owned())
                .into(),
            public_url,
            session_idle_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config(&[]).unwrap();

        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse::<SocketAddr>().unwrap());
        assert_eq!(config.database_url, None);
        assert_eq!(config.public_url, DEFAULT_PUBLIC_URL);
        assert_eq!(config.session_idle_minutes, DEFAULT_SESSION_IDLE_MINUTES);
    }

    #[test]
    fn values_are_read_and_tidied() {
        let config = config(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "sqlite://chat.db?mode=rwc"),
            ("PUBLIC_URL", "https://chat.example/"),
            ("SESSION_IDLE_MINUTES", "5"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_url.as_deref(), Some("sqlite://chat.db?mode=rwc"));
        assert_eq!(config.public_url, "https://chat.example");
        assert_eq!(config.session_idle_minutes, 5);
    }

    #[test]
    fn bad_numbers_are_reported() {
        let err = config(&[("SESSION_IDLE_MINUTES", "soon")]).unwrap_err();
        assert!(err.to_string().contains("SESSION_IDLE_MINUTES"));
    }
}
