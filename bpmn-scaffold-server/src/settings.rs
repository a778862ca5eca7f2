//! Process settings read from the environment.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use bpmn_scaffold_core::ZeebeSettings;

const DEFAULT_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_RESOURCES_DIR: &str = "resources";
const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 10;

#[derive(Clone, Debug)]
pub struct Settings {
    pub addr: SocketAddr,
    /// Scaffold configuration file (`SCAFFOLD_CONFIG`).
    pub config_path: Option<PathBuf>,
    /// Directory deploy requests read their models and forms from.
    pub resources_dir: PathBuf,
    /// `None` when `ZEEBE_REST_URL` is unset.
    pub zeebe: Option<ZeebeSettings>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let addr = var("ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse()
            .context("ADDR is not a socket address")?;

        let timeout = match var("ZEEBE_DEPLOY_TIMEOUT_SECS") {
            Some(secs) => secs
                .parse::<u64>()
                .context("ZEEBE_DEPLOY_TIMEOUT_SECS is not a number of seconds")?,
            None => DEFAULT_DEPLOY_TIMEOUT_SECS,
        };

        let zeebe = var("ZEEBE_REST_URL").map(|url| ZeebeSettings {
            base_url: url,
            client_id: var("ZEEBE_CLIENT_ID"),
            client_secret: var("ZEEBE_CLIENT_SECRET"),
            auth_server_url: var("ZEEBE_AUTH_SERVER_URL"),
            timeout: Duration::from_secs(timeout),
        });

        Ok(Self {
            addr,
            config_path: var("SCAFFOLD_CONFIG").map(PathBuf::from),
            resources_dir: var("RESOURCES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RESOURCES_DIR)),
            zeebe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.addr.to_string(), "0.0.0.0:8080");
        assert_eq!(s.resources_dir, PathBuf::from("resources"));
        assert!(s.config_path.is_none());
        assert!(s.zeebe.is_none());
    }

    #[test]
    fn engine_settings_follow_rest_url() {
        let s = settings(&[
            ("ZEEBE_REST_URL", "http://zeebe:8080"),
            ("ZEEBE_CLIENT_ID", "scaffold"),
            ("ZEEBE_DEPLOY_TIMEOUT_SECS", "3"),
        ])
        .unwrap();
        let zeebe = s.zeebe.unwrap();
        assert_eq!(zeebe.base_url, "http://zeebe:8080");
        assert_eq!(zeebe.client_id.as_deref(), Some("scaffold"));
        assert!(zeebe.client_secret.is_none());
        assert_eq!(zeebe.timeout, Duration::from_secs(3));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let s = settings(&[("ZEEBE_REST_URL", "  "), ("SCAFFOLD_CONFIG", "")]).unwrap();
        assert!(s.zeebe.is_none());
        assert!(s.config_path.is_none());
    }

    #[test]
    fn bad_values_are_reported() {
        assert!(settings(&[("ADDR", "not-an-addr")]).is_err());
        assert!(settings(&[("ZEEBE_DEPLOY_TIMEOUT_SECS", "soon")]).is_err());
    }
}
