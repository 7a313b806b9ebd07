use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub paths: PathsConfig,
    pub simulator: SimulatorConfig,
    pub reopt: ReoptConfig,
    pub urdb: UrdbConfig,
}

/// Directory layout of a campaign workspace.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Where generated scenario templates land.
    pub template_dir: PathBuf,
    /// URBANopt run output directory.
    pub run_dir: PathBuf,
    /// REopt result cache tree.
    pub reopt_results_dir: PathBuf,
    /// Base REopt assumptions JSON merged into every payload.
    pub reopt_assumptions: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorConfig {
    /// Directory the rake tasks are invoked from (the URBANopt project root).
    pub project_dir: PathBuf,
    /// Pass `--trace` to every rake task.
    #[serde(default)]
    pub trace: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReoptConfig {
    pub base_url: String,
    /// NREL developer API key, normally set via RCAMP__REOPT__API_KEY.
    #[serde(default)]
    pub api_key: String,
    pub poll_interval_seconds: u64,
    pub poll_timeout_seconds: u64,
    pub max_concurrent_jobs: usize,
    /// Seconds to wait between job submissions to stay under the API limit.
    #[serde(default)]
    pub submit_delay_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UrdbConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
}

pub const DEFAULT_REOPT_URL: &str = "https://developer.nrel.gov/api/reopt";

impl Config {
    pub fn load() -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file("config/default.toml"))
            .merge(Env::prefixed("RCAMP__").split("__"));
        Ok(figment.extract()?)
    }
}

impl ReoptConfig {
    /// Certificate checks stay on for the public NREL endpoint only; private
    /// staging servers run with expired certificates.
    pub fn verify_tls(&self) -> bool {
        self.base_url.trim_end_matches('/') == DEFAULT_REOPT_URL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_verification_only_for_default_endpoint() {
        let mut cfg = ReoptConfig {
            base_url: DEFAULT_REOPT_URL.to_string(),
            api_key: String::new(),
            poll_interval_seconds: 3,
            poll_timeout_seconds: 500,
            max_concurrent_jobs: 5,
            submit_delay_seconds: 0,
        };
        assert!(cfg.verify_tls());

        cfg.base_url = "https://reopt-dev.internal:8443/api/reopt/".to_string();
        assert!(!cfg.verify_tls());
    }
}
