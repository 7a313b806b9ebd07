//! Per-scenario REopt dispatch: cache checks, bounded-concurrency job
//! fan-out, and result persistence.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::{Config, PathsConfig, ReoptConfig};
use crate::report::{find_report_csv, FeatureReport};
use crate::reopt::client::ReoptClient;
use crate::reopt::payload::{build_payload, load_base_assumptions, result_path};
use crate::scenario::Scenario;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CampaignSummary {
    pub completed: u32,
    pub skipped_cached: u32,
    pub failed: u32,
}

pub struct ReoptCampaign {
    client: Arc<ReoptClient>,
    base_assumptions: Value,
    results_dir: PathBuf,
    run_dir: PathBuf,
    max_concurrent: usize,
    submit_delay: Duration,
}

impl ReoptCampaign {
    pub fn new(cfg: &Config) -> Result<Self> {
        Self::with_parts(&cfg.reopt, &cfg.paths)
    }

    pub fn with_parts(reopt: &ReoptConfig, paths: &PathsConfig) -> Result<Self> {
        Ok(Self {
            client: Arc::new(ReoptClient::new(reopt)?),
            base_assumptions: load_base_assumptions(&paths.reopt_assumptions)?,
            results_dir: paths.reopt_results_dir.clone(),
            run_dir: paths.run_dir.clone(),
            max_concurrent: reopt.max_concurrent_jobs.max(1),
            submit_delay: Duration::from_secs(reopt.submit_delay_seconds),
        })
    }

    /// Run REopt for every building of the scenario. Individual job failures
    /// are logged and counted, not propagated: one bad building must not
    /// sink an overnight campaign.
    pub async fn run_scenario(&self, scenario: &Scenario, use_cached: bool) -> Result<CampaignSummary> {
        let scenario_name = scenario.scenario_name();
        let total = scenario.template.num_simulations;
        let mut summary = CampaignSummary::default();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut jobs: JoinSet<(u32, Result<()>)> = JoinSet::new();

        for building_num in 1..=total {
            let output_path = result_path(
                &self.results_dir,
                &scenario_name,
                building_num,
                &scenario.template,
            );
            if use_cached && output_path.exists() {
                info!(building_num, path = %output_path.display(), "REopt result cached, skipping");
                summary.skipped_cached += 1;
                continue;
            }

            info!(building_num, total, scenario = %scenario_name, "running REopt");

            // A bad feature report fails this building only; jobs already in
            // flight keep running and still land in the cache.
            let payload = match self
                .building_loads(&scenario_name, building_num, scenario)
                .with_context(|| format!("failed to load building {building_num} profile"))
                .and_then(|loads_kw| {
                    build_payload(&self.base_assumptions, &scenario.template, loads_kw)
                }) {
                Ok(payload) => payload,
                Err(error) => {
                    warn!(building_num, error = %format!("{error:#}"), "skipping building");
                    summary.failed += 1;
                    continue;
                }
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("job semaphore closed")?;
            let client = self.client.clone();
            jobs.spawn(async move {
                let _permit = permit;
                let result = run_and_write(&client, &payload, &output_path).await;
                (building_num, result)
            });

            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
        }

        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((_, Ok(()))) => summary.completed += 1,
                Ok((building_num, Err(error))) => {
                    warn!(building_num, error = %format!("{error:#}"), "REopt job failed");
                    summary.failed += 1;
                }
                Err(join_error) => {
                    warn!(error = %join_error, "REopt job panicked");
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    fn building_loads(
        &self,
        scenario_name: &str,
        building_num: u32,
        scenario: &Scenario,
    ) -> Result<Vec<f64>> {
        let report_csv = find_report_csv(&self.run_dir, scenario_name, building_num)?;
        let report = FeatureReport::from_csv(report_csv)?;
        report.loads_kw(scenario.template.timesteps_per_hour)
    }
}

async fn run_and_write(client: &ReoptClient, payload: &Value, output_path: &Path) -> Result<()> {
    let started = tokio::time::Instant::now();
    let (run_id, results) = client.run_job(payload).await?;

    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string(&results)?;
    tokio::fs::write(output_path, body)
        .await
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    info!(
        %run_id,
        path = %output_path.display(),
        elapsed_s = started.elapsed().as_secs(),
        "wrote REopt results"
    );
    Ok(())
}
