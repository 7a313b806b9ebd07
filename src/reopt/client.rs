//! REopt job API client: submission plus the results-polling loop.

use anyhow::{Context, Result};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ReoptConfig;

const OPTIMIZING_STATUS: &str = "Optimizing...";
const OPTIMAL_STATUS: &str = "optimal";

/// Consecutive status-less responses tolerated before the poller gives up
/// and returns the last body.
const MISSING_STATUS_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum ReoptError {
    #[error("REopt rejected the job submission: HTTP {status}: {body}")]
    SubmitFailed { status: u16, body: String },

    #[error("REopt response did not contain run_uuid")]
    MissingRunId,

    #[error("polling for job {run_id} timed out after {timeout_seconds} s")]
    PollTimeout { run_id: String, timeout_seconds: u64 },

    #[error("job {run_id} completed with non-optimal status {status:?}{}",
            message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    NonOptimal {
        run_id: String,
        status: String,
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    run_uuid: Option<String>,
}

pub struct ReoptClient {
    http: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl ReoptClient {
    pub fn new(cfg: &ReoptConfig) -> Result<Self> {
        anyhow::ensure!(
            !cfg.api_key.is_empty(),
            "REopt API key is not set (RCAMP__REOPT__API_KEY)"
        );

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(!cfg.verify_tls())
            .build()?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let http = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            poll_interval: Duration::from_secs(cfg.poll_interval_seconds),
            poll_timeout: Duration::from_secs(cfg.poll_timeout_seconds),
        })
    }

    /// Submit a job and poll until it finishes; errors unless the final
    /// status is `optimal`.
    pub async fn run_job(&self, payload: &Value) -> Result<(String, Value)> {
        let run_id = self.submit(payload).await?;
        info!(%run_id, "REopt job accepted");

        let results = self.poll_results(&run_id).await?;

        let status = results
            .pointer("/outputs/Scenario/status")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if status != OPTIMAL_STATUS {
            let message = results
                .pointer("/messages/error")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Err(ReoptError::NonOptimal {
                run_id,
                status,
                message,
            }
            .into());
        }

        Ok((run_id, results))
    }

    pub async fn submit(&self, payload: &Value) -> Result<String> {
        let url = format!("{}/v1/job/?api_key={}", self.base_url, self.api_key);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await
            .context("REopt job POST failed")?;

        let status = response.status();
        let body = response.text().await.context("REopt job body read failed")?;
        if !status.is_success() {
            return Err(ReoptError::SubmitFailed {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let parsed: SubmitResponse =
            serde_json::from_str(&body).context("REopt job response is not JSON")?;
        parsed.run_uuid.ok_or_else(|| ReoptError::MissingRunId.into())
    }

    /// Poll the results URL until the job leaves `Optimizing...`. A response
    /// without the status field bumps a counter; past the threshold the last
    /// body is returned as-is so the caller can surface whatever the API
    /// sent. Exceeding the overall timeout is an error.
    pub async fn poll_results(&self, run_id: &str) -> Result<Value> {
        let url = format!(
            "{}/v1/job/{}/results/?api_key={}",
            self.base_url, run_id, self.api_key
        );

        let start = tokio::time::Instant::now();
        let mut missing_status_count: u32 = 0;

        loop {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .context("REopt results GET failed")?;
            let body = response
                .text()
                .await
                .context("REopt results body read failed")?;
            let results: Value = serde_json::from_str(&body)
                .with_context(|| format!("unparseable REopt results body: {body}"))?;

            match results
                .pointer("/outputs/Scenario/status")
                .and_then(Value::as_str)
            {
                Some(status) if status != OPTIMIZING_STATUS => {
                    debug!(%run_id, status, "REopt job finished polling");
                    return Ok(results);
                }
                Some(_) => {}
                None => {
                    missing_status_count += 1;
                    warn!(%run_id, missing_status_count, "REopt response missing job status");
                    if missing_status_count > MISSING_STATUS_THRESHOLD {
                        warn!(%run_id, "giving up on status field, returning last response");
                        return Ok(results);
                    }
                }
            }

            if start.elapsed() > self.poll_timeout {
                return Err(ReoptError::PollTimeout {
                    run_id: run_id.to_string(),
                    timeout_seconds: self.poll_timeout.as_secs(),
                }
                .into());
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
