use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reopt_campaign::config::Config;
use reopt_campaign::reopt::ReoptCampaign;
use reopt_campaign::results::ResultsIndex;
use reopt_campaign::scenario::Scenario;
use reopt_campaign::simulator::UrbanoptRunner;
use reopt_campaign::sweep::{write_templates, SweepInputs};
use reopt_campaign::telemetry::init_tracing;
use reopt_campaign::urdb::UrdbClient;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Orchestrate URBANopt building simulations and REopt runs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate scenario templates from the sweep CSV files.
    Generate {
        #[arg(long, default_value = "sites.csv")]
        sites: PathBuf,
        #[arg(long, default_value = "tariffs.csv")]
        tariffs: PathBuf,
        #[arg(long, default_value = "storage.csv")]
        storage: PathBuf,
        /// Only generate templates for this location.
        #[arg(long)]
        location: Option<String>,
    },

    /// Run scenario templates: simulate, then dispatch REopt jobs.
    Run {
        /// Run a single template file from the template directory.
        #[arg(long, conflicts_with = "all")]
        file: Option<PathBuf>,
        /// Run every template in the template directory.
        #[arg(long)]
        all: bool,
        /// Restrict --all to template filenames containing this text.
        #[arg(long)]
        pattern: Option<String>,
        /// Run templates in reverse order.
        #[arg(long)]
        reverse: bool,
        /// Rerun the simulator even when cached outputs exist.
        #[arg(long)]
        ignore_scenario_cache: bool,
        /// Rerun REopt even when cached results exist.
        #[arg(long)]
        ignore_reopt_cache: bool,
        /// Skip the REopt stage entirely.
        #[arg(long)]
        skip_reopt: bool,
    },

    /// Aggregate REopt results into a CSV table.
    Results {
        /// Output CSV path.
        #[arg(long)]
        out: PathBuf,
        /// Only scenarios whose id contains this text.
        #[arg(long)]
        scenario_filter: Option<String>,
        /// Only result files whose path contains this text.
        #[arg(long)]
        reopt_filter: Option<String>,
        /// Only scenarios using default schedules.
        #[arg(long)]
        default_schedules_only: bool,
        /// column=value selections every row must satisfy (repeatable).
        #[arg(long = "select", value_parser = parse_selection)]
        selections: Vec<(String, String)>,
        /// Scenario ids to keep (repeatable; empty keeps all).
        #[arg(long = "scenario")]
        scenarios: Vec<String>,
    },

    /// Look up a utility rate in the URDB and print its structure.
    Tariff {
        /// Rate name or URDB label.
        rate: String,
        /// Utility name, required when looking up by rate name.
        #[arg(long)]
        utility: Option<String>,
    },
}

fn parse_selection(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected column=value, got {raw:?}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse first so --help and --version work without a config file.
    let cli = Cli::parse();

    dotenvy::dotenv().ok();
    init_tracing();
    let cfg = Config::load()?;

    match cli.command {
        Command::Generate {
            sites,
            tariffs,
            storage,
            location,
        } => {
            let inputs = SweepInputs::from_files(&sites, &tariffs, &storage)?;
            let templates = inputs.templates(location.as_deref())?;
            let written = write_templates(&templates, &cfg.paths.template_dir)?;
            info!(count = written.len(), "template generation finished");
        }

        Command::Run {
            file,
            all,
            pattern,
            reverse,
            ignore_scenario_cache,
            ignore_reopt_cache,
            skip_reopt,
        } => {
            let templates = if let Some(file) = file {
                vec![cfg.paths.template_dir.join(file)]
            } else if all {
                discover_templates(&cfg, pattern.as_deref(), reverse)?
            } else {
                anyhow::bail!("pass either --file or --all");
            };

            run_campaign(
                &cfg,
                &templates,
                !ignore_scenario_cache,
                !ignore_reopt_cache,
                skip_reopt,
                all,
            )
            .await?;
        }

        Command::Results {
            out,
            scenario_filter,
            reopt_filter,
            default_schedules_only,
            selections,
            scenarios,
        } => {
            let mut index = ResultsIndex::new(
                cfg.paths.reopt_results_dir.clone(),
                cfg.paths.run_dir.clone(),
            );
            let loaded = index.load(
                scenario_filter.as_deref(),
                reopt_filter.as_deref(),
                default_schedules_only,
            )?;
            info!(loaded, "indexed REopt runs");
            let rows = index.filtered(&selections, &scenarios);
            index.write_csv(&out, &rows)?;
        }

        Command::Tariff { rate, utility } => {
            let client = UrdbClient::new(&cfg.urdb)?;
            match client.fetch_rate(&rate, utility.as_deref()).await? {
                Some(found) => print!("{}", found.summary()),
                None => warn!(rate, "rate not found in URDB"),
            }
        }
    }

    Ok(())
}

/// Sorted `template-*.json` files under the template directory, optionally
/// substring-filtered and reversed.
fn discover_templates(
    cfg: &Config,
    pattern: Option<&str>,
    reverse: bool,
) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(&cfg.paths.template_dir).with_context(|| {
        format!("failed to list {}", cfg.paths.template_dir.display())
    })?;
    let mut templates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
            name.starts_with("template-") && name.ends_with(".json")
        })
        .filter(|p| {
            pattern
                .map(|needle| p.to_string_lossy().contains(needle))
                .unwrap_or(true)
        })
        .collect();
    templates.sort();
    if reverse {
        templates.reverse();
    }
    if templates.len() < 10 {
        info!(?templates, "templates to run");
    }
    Ok(templates)
}

async fn run_campaign(
    cfg: &Config,
    templates: &[PathBuf],
    use_scenario_cache: bool,
    use_reopt_cache: bool,
    skip_reopt: bool,
    continue_on_error: bool,
) -> Result<()> {
    let campaign = if skip_reopt {
        None
    } else {
        Some(ReoptCampaign::new(cfg)?)
    };
    let runner = UrbanoptRunner::new(&cfg.simulator);

    let total = templates.len();
    let start = Instant::now();

    for (index, template_path) in templates.iter().enumerate() {
        let loop_start = Instant::now();
        info!(template = %template_path.display(), "running template");

        let scenario = Scenario::from_template_file(template_path)?;
        scenario.write_mapper_csv(&cfg.simulator.project_dir)?;
        scenario.write_scenario_json(&cfg.simulator.project_dir)?;

        let simulated = simulate(cfg, &runner, &scenario, use_scenario_cache).await;
        // Archive the scenario JSON regardless; the mapper CSV is scratch.
        if let Err(cleanup_error) =
            scenario.cleanup(&cfg.simulator.project_dir, &cfg.paths.run_dir)
        {
            warn!(error = %format!("{cleanup_error:#}"), "cleanup failed");
        }
        if let Err(sim_error) = simulated {
            if continue_on_error {
                error!(error = %format!("{sim_error:#}"), "simulation failed, continuing");
                continue;
            }
            return Err(sim_error);
        }
        info!(
            elapsed_s = loop_start.elapsed().as_secs(),
            "finished building simulation"
        );

        if let Some(campaign) = &campaign {
            match campaign.run_scenario(&scenario, use_reopt_cache).await {
                Ok(summary) => info!(
                    completed = summary.completed,
                    cached = summary.skipped_cached,
                    failed = summary.failed,
                    "REopt dispatch finished"
                ),
                Err(reopt_error) if continue_on_error => {
                    error!(error = %format!("{reopt_error:#}"), "REopt dispatch failed, continuing");
                }
                Err(reopt_error) => return Err(reopt_error),
            }
        }

        let done = index + 1;
        let remaining = total - done;
        if remaining > 0 {
            let eta_min = start.elapsed().as_secs_f64() / done as f64 * remaining as f64 / 60.0;
            info!(
                done,
                total,
                eta_min = format!("{eta_min:.1}"),
                elapsed_min = format!("{:.1}", start.elapsed().as_secs_f64() / 60.0),
                "campaign progress"
            );
        }
    }
    Ok(())
}

async fn simulate(
    cfg: &Config,
    runner: &UrbanoptRunner,
    scenario: &Scenario,
    use_cached: bool,
) -> Result<()> {
    if use_cached && scenario.results_exist(&cfg.paths.run_dir) {
        info!(
            scenario = %scenario.scenario_name(),
            "run output already generated, using cached files"
        );
        return Ok(());
    }
    runner.run_scenario(scenario).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn help_needs_no_config_file() {
        let error = Cli::try_parse_from(["reopt-campaign", "--help"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DisplayHelp);
        let error = Cli::try_parse_from(["reopt-campaign", "--version"]).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DisplayVersion);
    }

    #[test]
    fn selections_split_on_equals() {
        assert_eq!(
            parse_selection("location=San Diego").unwrap(),
            ("location".to_string(), "San Diego".to_string())
        );
        assert!(parse_selection("no-equals-sign").is_err());
    }
}
