//! Feature-report reading.
//!
//! The post-processed simulator output contains one
//! `default_feature_reports.csv` per building with a timestamped row per
//! simulation step. This module parses those files, validates the reported
//! timestep against the scenario, and extracts load series for REopt.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

const FACILITY_ELECTRICITY_COLUMN: &str = "Electricity:Facility(kWh)";

/// A parsed feature report: a timestamp index plus named numeric columns.
#[derive(Debug)]
pub struct FeatureReport {
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: Vec<String>,
    /// Column-major values, parallel to `columns`. Non-numeric cells parse
    /// to NaN.
    pub values: Vec<Vec<f64>>,
}

impl FeatureReport {
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        let headers = reader.headers()?.clone();
        if headers.is_empty() {
            bail!("feature report {} has no header row", path.display());
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
        let mut timestamps = Vec::new();

        for record in reader.records() {
            let record = record.with_context(|| format!("bad row in {}", path.display()))?;
            let stamp = record
                .get(0)
                .with_context(|| format!("missing index cell in {}", path.display()))?;
            timestamps.push(parse_timestamp(stamp)?);
            for (idx, cell) in record.iter().skip(1).enumerate() {
                values[idx].push(cell.trim().parse::<f64>().unwrap_or(f64::NAN));
            }
        }

        if timestamps.len() < 2 {
            bail!(
                "feature report {} has fewer than two rows",
                path.display()
            );
        }

        Ok(Self {
            timestamps,
            columns,
            values,
        })
    }

    pub fn timestep_seconds(&self) -> f64 {
        (self.timestamps[1] - self.timestamps[0]).num_seconds() as f64
    }

    /// Error unless the report's timestep matches the scenario's
    /// `timesteps_per_hour`.
    pub fn validate_timestep(&self, timesteps_per_hour: u32) -> Result<()> {
        let expected = 3600.0 / f64::from(timesteps_per_hour);
        let actual = self.timestep_seconds();
        if expected != actual {
            bail!(
                "simulated timestep ({actual} s) does not match the scenario \
                 timestep ({expected} s)"
            );
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Facility electric load in kW: the per-step kWh column scaled by steps
    /// per hour, rounded to 3 decimals.
    pub fn loads_kw(&self, timesteps_per_hour: u32) -> Result<Vec<f64>> {
        self.validate_timestep(timesteps_per_hour)?;
        let kwh = self
            .column(FACILITY_ELECTRICITY_COLUMN)
            .with_context(|| format!("report is missing {FACILITY_ELECTRICITY_COLUMN:?}"))?;
        Ok(kwh
            .iter()
            .map(|v| (v * f64::from(timesteps_per_hour) * 1000.0).round() / 1000.0)
            .collect())
    }

    /// Names of the per-end-use electricity columns.
    pub fn electricity_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.contains("kWh") && c.contains("Electricity") && c.contains(':'))
            .map(String::as_str)
            .collect()
    }
}

/// Locate a building's feature-report CSV under the run tree. The report
/// folder name carries a numeric prefix that varies between toolchain
/// versions, so it is matched by substring.
pub fn find_report_csv(run_dir: &Path, scenario_name: &str, building_num: u32) -> Result<PathBuf> {
    let building_dir = run_dir.join(scenario_name).join(building_num.to_string());
    let entries = std::fs::read_dir(&building_dir)
        .with_context(|| format!("failed to list {}", building_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        if entry.path().is_dir()
            && name
                .to_string_lossy()
                .contains("default_feature_reports")
        {
            return Ok(entry.path().join("default_feature_reports.csv"));
        }
    }
    bail!(
        "no feature report directory for building {building_num} in {}",
        building_dir.display()
    )
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y/%m/%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw.trim(), format) {
            return Ok(parsed);
        }
    }
    bail!("unparseable report timestamp {raw:?}")
}
