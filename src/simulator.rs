//! External URBANopt toolchain invocation.
//!
//! The simulator itself is a Ruby toolchain driven by rake tasks; this module
//! only sequences the shell calls and surfaces their output.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::scenario::Scenario;

pub struct UrbanoptRunner {
    project_dir: PathBuf,
    trace: bool,
}

impl UrbanoptRunner {
    pub fn new(cfg: &SimulatorConfig) -> Self {
        Self {
            project_dir: cfg.project_dir.clone(),
            trace: cfg.trace,
        }
    }

    /// Clear stale outputs, run the baseline simulation, and post-process it
    /// (post-processing produces the feature reports REopt consumes).
    pub async fn run_scenario(&self, scenario: &Scenario) -> Result<()> {
        let scenario_file = scenario.scenario_filename();
        let mapper_file = scenario.mapper_filename();

        info!(scenario = %scenario.scenario_name(), "clearing old simulation files");
        self.rake("clear_baseline", &scenario_file, &mapper_file)
            .await?;

        info!(scenario = %scenario.scenario_name(), "running baseline simulation");
        self.rake("run_baseline", &scenario_file, &mapper_file)
            .await?;

        info!(scenario = %scenario.scenario_name(), "post-processing baseline");
        self.rake("post_process_baseline", &scenario_file, &mapper_file)
            .await?;

        Ok(())
    }

    async fn rake(&self, task: &str, scenario_file: &str, mapper_file: &str) -> Result<()> {
        let task_arg = format!("{task}[{scenario_file},{mapper_file}]");
        let mut command = Command::new("bundle");
        command
            .args(["exec", "rake", &task_arg])
            .current_dir(&self.project_dir);
        if self.trace {
            command.arg("--trace");
        }

        let output = command
            .output()
            .await
            .with_context(|| format!("failed to spawn `bundle exec rake {task_arg}`"))?;

        debug!(task, stdout = %String::from_utf8_lossy(&output.stdout), "rake output");

        if !output.status.success() {
            bail!(
                "rake task {task_arg} failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}
