//! Results aggregation: flattens the heterogeneous REopt result JSONs (plus
//! each owning scenario's parameters) into one queryable row per run, with
//! CSV export and feature-report retrieval for ad hoc analysis.

use anyhow::{bail, Context, Result};
use glob::glob;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::report::{find_report_csv, FeatureReport};
use crate::scenario::ScenarioFile;
use crate::sweep::canonical_value_string;

/// Scenario-level parameters recovered from an archived
/// `urbanopt_scenario.json`.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioParams {
    pub location: String,
    pub schedules_type: String,
    pub floor_area: f64,
    pub climate_zone: String,
    pub weatherfile: String,
    pub num_simulations: u32,
    pub timesteps_per_hour: u32,
    pub latitude: f64,
    pub longitude: f64,
}

/// One flattened REopt run. Scenario parameters and REopt outputs share the
/// row; the REopt-side timestep gets its own column so it cannot shadow the
/// scenario timestep.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    pub scenario_id: String,
    pub building_id: String,
    pub location: String,
    pub schedules_type: String,
    pub floor_area: f64,
    pub climate_zone: String,
    pub weatherfile: String,
    pub num_simulations: u32,
    pub timesteps_per_hour: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub pv_size: f64,
    pub pv_yearly_energy_produced: f64,
    pub pv_energy_exported: f64,
    pub storage_size_kw: f64,
    pub storage_size_kwh: f64,
    pub load_annual_kwh: f64,
    pub savings: f64,
    pub urdb: String,
    pub utility: String,
    pub rate_name: String,
    pub net_metering_limit: f64,
    pub storage_rebate: f64,
    pub reopt_timesteps_per_hour: u32,
}

/// Optional year-one time series from a REopt result.
#[derive(Debug, Clone)]
pub struct LoadSeries {
    pub load_profile: Vec<f64>,
    pub pv_power_production: Vec<f64>,
    pub pv_to_battery: Vec<f64>,
    pub pv_to_load: Vec<f64>,
    pub pv_to_grid: Vec<f64>,
    pub pv_curtailed: Vec<f64>,
    pub storage_to_load: Vec<f64>,
    pub storage_to_grid: Vec<f64>,
}

/// Electricity end-use columns from a feature report.
#[derive(Debug)]
pub struct ElectricityUsage {
    pub timestamps: Vec<chrono::NaiveDateTime>,
    pub columns: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

pub struct ResultsIndex {
    results_dir: PathBuf,
    run_dir: PathBuf,
    /// Keyed by result-file path so reloading is idempotent.
    records: BTreeMap<PathBuf, ResultRow>,
    scenario_cache: HashMap<String, ScenarioParams>,
}

impl ResultsIndex {
    pub fn new<P: Into<PathBuf>>(results_dir: P, run_dir: P) -> Self {
        Self {
            results_dir: results_dir.into(),
            run_dir: run_dir.into(),
            records: BTreeMap::new(),
            scenario_cache: HashMap::new(),
        }
    }

    /// Load every REopt run under the results directory. `scenario_filter`
    /// and `reopt_filter` are substring matches on the scenario id and the
    /// result-file path respectively.
    pub fn load(
        &mut self,
        scenario_filter: Option<&str>,
        reopt_filter: Option<&str>,
        default_schedules_only: bool,
    ) -> Result<usize> {
        let entries = std::fs::read_dir(&self.results_dir)
            .with_context(|| format!("failed to list {}", self.results_dir.display()))?;
        let mut scenario_ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        scenario_ids.sort();

        for scenario_id in scenario_ids {
            if let Some(filter) = scenario_filter {
                if !scenario_id.contains(filter) {
                    continue;
                }
            }
            if default_schedules_only && !scenario_id.contains("default") {
                continue;
            }
            info!(scenario_id, "loading REopt runs");
            self.load_runs(&scenario_id, reopt_filter)?;
        }
        Ok(self.records.len())
    }

    /// Load all runs for one scenario id.
    pub fn load_runs(&mut self, scenario_id: &str, reopt_filter: Option<&str>) -> Result<()> {
        let scenario_params = self.load_scenario(scenario_id)?;

        for result_file in leaf_jsons(&self.results_dir.join(scenario_id))? {
            if let Some(filter) = reopt_filter {
                if !result_file.to_string_lossy().contains(filter) {
                    continue;
                }
            }
            if self.records.contains_key(&result_file) {
                continue;
            }

            let raw = std::fs::read_to_string(&result_file)
                .with_context(|| format!("failed to read {}", result_file.display()))?;
            let results: Value = serde_json::from_str(&raw)
                .with_context(|| format!("invalid result JSON in {}", result_file.display()))?;

            let building_id = result_file
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let row = flatten_result(
                scenario_id,
                &building_id,
                &scenario_params,
                &results,
            )
            .with_context(|| format!("failed to flatten {}", result_file.display()))?;
            debug!(path = %result_file.display(), "indexed result");
            self.records.insert(result_file, row);
        }
        Ok(())
    }

    fn load_scenario(&mut self, scenario_id: &str) -> Result<ScenarioParams> {
        if let Some(cached) = self.scenario_cache.get(scenario_id) {
            return Ok(cached.clone());
        }
        let path = self
            .run_dir
            .join(scenario_id)
            .join("urbanopt_scenario.json");
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: ScenarioFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid scenario JSON in {}", path.display()))?;
        let params = extract_scenario_params(&file)?;
        self.scenario_cache
            .insert(scenario_id.to_string(), params.clone());
        Ok(params)
    }

    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.records.values()
    }

    /// Rows satisfying every selection (column = value, compared on
    /// canonical strings) and, when non-empty, one of the scenario ids.
    pub fn filtered(&self, selections: &[(String, String)], scenarios: &[String]) -> Vec<&ResultRow> {
        self.rows()
            .filter(|row| scenarios.is_empty() || scenarios.iter().any(|s| s == &row.scenario_id))
            .filter(|row| {
                selections
                    .iter()
                    .all(|(column, wanted)| row_matches(row, column, wanted))
            })
            .collect()
    }

    pub fn write_csv(&self, path: &Path, rows: &[&ResultRow]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        info!(path = %path.display(), rows = rows.len(), "wrote results table");
        Ok(())
    }

    /// Scenario ids under the run directory whose parameters satisfy every
    /// selection.
    pub fn matching_scenarios(&mut self, selections: &[(String, String)]) -> Result<Vec<String>> {
        let entries = std::fs::read_dir(&self.run_dir)
            .with_context(|| format!("failed to list {}", self.run_dir.display()))?;
        let mut scenario_ids: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        scenario_ids.sort();

        let mut matches = Vec::new();
        for scenario_id in scenario_ids {
            let Ok(params) = self.load_scenario(&scenario_id) else {
                continue;
            };
            let value = serde_json::to_value(&params)?;
            let all_match = selections.iter().all(|(column, wanted)| {
                value
                    .get(column)
                    .map(|v| canonical_value_string(v) == *wanted)
                    .unwrap_or(false)
            });
            if all_match {
                matches.push(scenario_id);
            }
        }
        Ok(matches)
    }

    /// Electricity end-use series for the described scenario's building.
    pub fn electricity_usage(
        &mut self,
        location: &str,
        schedules_type: &str,
        building_num: u32,
    ) -> Result<ElectricityUsage> {
        let selections = vec![
            ("location".to_string(), location.to_string()),
            ("schedules_type".to_string(), schedules_type.to_string()),
        ];
        for scenario_id in self.matching_scenarios(&selections)? {
            let params = self.load_scenario(&scenario_id)?;
            let report_csv = match find_report_csv(&self.run_dir, &scenario_id, building_num) {
                Ok(path) => path,
                Err(_) => continue,
            };
            let report = FeatureReport::from_csv(report_csv)?;
            report.validate_timestep(params.timesteps_per_hour)?;

            let columns: Vec<String> = report
                .electricity_columns()
                .iter()
                .map(|c| c.to_string())
                .collect();
            let values = columns
                .iter()
                .map(|c| report.column(c).unwrap_or_default().to_vec())
                .collect();
            return Ok(ElectricityUsage {
                timestamps: report.timestamps,
                columns,
                values,
            });
        }
        bail!(
            "no scenario in {location:?} with schedules_type={schedules_type} \
             and building {building_num}"
        )
    }

    /// Occupant schedule CSV for a stochastic scenario's building, as raw
    /// columns.
    pub fn schedule(
        &mut self,
        location: &str,
        building_num: u32,
    ) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
        let selections = vec![
            ("location".to_string(), location.to_string()),
            ("schedules_type".to_string(), "stochastic".to_string()),
        ];
        for scenario_id in self.matching_scenarios(&selections)? {
            let path = self
                .run_dir
                .join(&scenario_id)
                .join(building_num.to_string())
                .join("schedules.csv");
            if !path.exists() {
                continue;
            }
            return read_schedules_csv(&path);
        }
        bail!("no stochastic scenario in {location:?} with building {building_num}")
    }
}

fn leaf_jsons(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = dir.join("**").join("*.json");
    let pattern = pattern.to_str().context("results path is not valid UTF-8")?;
    let mut paths: Vec<PathBuf> = glob(pattern)
        .context("failed to glob result files")?
        .filter_map(|p| p.ok())
        .filter(|p| p.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

fn row_matches(row: &ResultRow, column: &str, wanted: &str) -> bool {
    let Ok(value) = serde_json::to_value(row) else {
        return false;
    };
    value
        .get(column)
        .map(|v| canonical_value_string(v) == wanted)
        .unwrap_or(false)
}

/// Pull scenario parameters out of an archived scenario file: project-level
/// fields, the site-origin coordinates (feature 0), and building properties
/// (feature 1, since feature 0 is the origin).
pub fn extract_scenario_params(file: &ScenarioFile) -> Result<ScenarioParams> {
    let origin = file.features.first().context("scenario has no features")?;
    let building = file
        .features
        .get(1)
        .context("scenario has no building features")?;

    let coordinates = origin
        .pointer("/geometry/coordinates")
        .and_then(Value::as_array)
        .context("site origin has no coordinates")?;
    let latitude = coordinates
        .first()
        .and_then(Value::as_f64)
        .context("bad origin latitude")?;
    let longitude = coordinates
        .get(1)
        .and_then(Value::as_f64)
        .context("bad origin longitude")?;

    Ok(ScenarioParams {
        location: file.project.name.clone(),
        schedules_type: building
            .pointer("/properties/schedules_type")
            .and_then(Value::as_str)
            .context("building has no schedules_type")?
            .to_string(),
        floor_area: building
            .pointer("/properties/floor_area")
            .and_then(Value::as_f64)
            .context("building has no floor_area")?,
        climate_zone: file.project.climate_zone.clone(),
        weatherfile: file.project.weather_filename.clone(),
        // The first feature is the site origin, not a building.
        num_simulations: (file.features.len() - 1) as u32,
        timesteps_per_hour: file.project.timesteps_per_hour,
        latitude,
        longitude,
    })
}

/// Flatten a REopt result JSON into a table row.
pub fn flatten_result(
    scenario_id: &str,
    building_id: &str,
    params: &ScenarioParams,
    results: &Value,
) -> Result<ResultRow> {
    Ok(ResultRow {
        scenario_id: scenario_id.to_string(),
        building_id: building_id.to_string(),
        location: params.location.clone(),
        schedules_type: params.schedules_type.clone(),
        floor_area: params.floor_area,
        climate_zone: params.climate_zone.clone(),
        weatherfile: params.weatherfile.clone(),
        num_simulations: params.num_simulations,
        timesteps_per_hour: params.timesteps_per_hour,
        latitude: params.latitude,
        longitude: params.longitude,
        pv_size: f64_at(results, "/outputs/Scenario/Site/PV/size_kw")?,
        pv_yearly_energy_produced: f64_at(
            results,
            "/outputs/Scenario/Site/PV/average_yearly_energy_produced_kwh",
        )?,
        pv_energy_exported: f64_at(
            results,
            "/outputs/Scenario/Site/PV/average_yearly_energy_exported_kwh",
        )?,
        storage_size_kw: f64_at(results, "/outputs/Scenario/Site/Storage/size_kw")?,
        storage_size_kwh: f64_at(results, "/outputs/Scenario/Site/Storage/size_kwh")?,
        load_annual_kwh: f64_at(
            results,
            "/outputs/Scenario/Site/LoadProfile/annual_calculated_kwh",
        )?,
        savings: f64_at(results, "/outputs/Scenario/Site/Financial/npv_us_dollars")?,
        urdb: str_at(
            results,
            "/inputs/Scenario/Site/ElectricTariff/urdb_response/label",
        )?,
        utility: str_at(
            results,
            "/inputs/Scenario/Site/ElectricTariff/urdb_utility_name",
        )?,
        rate_name: str_at(results, "/inputs/Scenario/Site/ElectricTariff/urdb_rate_name")?,
        net_metering_limit: f64_at(
            results,
            "/inputs/Scenario/Site/ElectricTariff/net_metering_limit_kw",
        )?,
        storage_rebate: f64_at(
            results,
            "/inputs/Scenario/Site/Storage/total_rebate_us_dollars_per_kwh",
        )?,
        reopt_timesteps_per_hour: f64_at(results, "/inputs/Scenario/time_steps_per_hour")? as u32,
    })
}

/// The year-one dispatch series, for analyses that need more than scalars.
pub fn extract_load_series(results: &Value) -> Result<LoadSeries> {
    let output_site = "/outputs/Scenario/Site";
    Ok(LoadSeries {
        load_profile: series_at(
            results,
            &format!("{output_site}/LoadProfile/year_one_electric_load_series_kw"),
        )?,
        pv_power_production: series_at(
            results,
            &format!("{output_site}/PV/year_one_power_production_series_kw"),
        )?,
        pv_to_battery: series_at(
            results,
            &format!("{output_site}/PV/year_one_to_battery_series_kw"),
        )?,
        pv_to_load: series_at(results, &format!("{output_site}/PV/year_one_to_load_series_kw"))?,
        pv_to_grid: series_at(results, &format!("{output_site}/PV/year_one_to_grid_series_kw"))?,
        pv_curtailed: series_at(
            results,
            &format!("{output_site}/PV/year_one_curtailed_production_series_kw"),
        )?,
        storage_to_load: series_at(
            results,
            &format!("{output_site}/Storage/year_one_to_load_series_kw"),
        )?,
        storage_to_grid: series_at(
            results,
            &format!("{output_site}/Storage/year_one_to_grid_series_kw"),
        )?,
    })
}

fn f64_at(value: &Value, pointer: &str) -> Result<f64> {
    value
        .pointer(pointer)
        .and_then(Value::as_f64)
        .with_context(|| format!("result is missing numeric field {pointer}"))
}

fn str_at(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("result is missing string field {pointer}"))
}

fn series_at(value: &Value, pointer: &str) -> Result<Vec<f64>> {
    value
        .pointer(pointer)
        .and_then(Value::as_array)
        .with_context(|| format!("result is missing series {pointer}"))?
        .iter()
        .map(|v| v.as_f64().context("non-numeric series entry"))
        .collect()
}

fn read_schedules_csv(path: &Path) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
    let columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut values: Vec<Vec<f64>> = vec![Vec::new(); columns.len()];
    for record in reader.records() {
        let record = record?;
        for (idx, cell) in record.iter().enumerate() {
            values[idx].push(cell.trim().parse::<f64>().unwrap_or(f64::NAN));
        }
    }
    Ok((columns, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_result() -> Value {
        json!({
            "outputs": {"Scenario": {"status": "optimal", "Site": {
                "PV": {
                    "size_kw": 6.2,
                    "average_yearly_energy_produced_kwh": 10500.0,
                    "average_yearly_energy_exported_kwh": 4200.0,
                },
                "Storage": {"size_kw": 3.0, "size_kwh": 8.1},
                "LoadProfile": {"annual_calculated_kwh": 9200.0},
                "Financial": {"npv_us_dollars": 3100.5},
            }}},
            "inputs": {"Scenario": {
                "time_steps_per_hour": 1,
                "Site": {
                    "ElectricTariff": {
                        "urdb_response": {"label": "5a2ab4fa5457a33e0a74ab6b"},
                        "urdb_utility_name": "San Diego Gas & Electric Co",
                        "urdb_rate_name": "TOU-DR1",
                        "net_metering_limit_kw": 100.0,
                    },
                    "Storage": {"total_rebate_us_dollars_per_kwh": 200.0},
                },
            }},
        })
    }

    fn params() -> ScenarioParams {
        ScenarioParams {
            location: "San Diego".to_string(),
            schedules_type: "default".to_string(),
            floor_area: 2301.0,
            climate_zone: "3B".to_string(),
            weatherfile: "USA_CA_San.Diego.epw".to_string(),
            num_simulations: 1,
            timesteps_per_hour: 1,
            latitude: 32.7157,
            longitude: -117.1611,
        }
    }

    #[test]
    fn flatten_pulls_outputs_and_inputs() {
        let row = flatten_result("scen", "1", &params(), &sample_result()).unwrap();
        assert_eq!(row.pv_size, 6.2);
        assert_eq!(row.savings, 3100.5);
        assert_eq!(row.utility, "San Diego Gas & Electric Co");
        assert_eq!(row.net_metering_limit, 100.0);
        assert_eq!(row.reopt_timesteps_per_hour, 1);
        assert_eq!(row.location, "San Diego");
    }

    #[test]
    fn flatten_fails_on_missing_metric() {
        let mut result = sample_result();
        result["outputs"]["Scenario"]["Site"]["PV"]
            .as_object_mut()
            .unwrap()
            .remove("size_kw");
        let error = flatten_result("scen", "1", &params(), &result).unwrap_err();
        assert!(format!("{error:#}").contains("size_kw"));
    }

    #[test]
    fn selections_filter_rows() {
        let index_rows = vec![
            flatten_result("scen-a", "1", &params(), &sample_result()).unwrap(),
            {
                let mut p = params();
                p.location = "Phoenix".to_string();
                flatten_result("scen-b", "1", &p, &sample_result()).unwrap()
            },
        ];
        let mut index = ResultsIndex::new("unused", "unused");
        for (i, row) in index_rows.into_iter().enumerate() {
            index.records.insert(PathBuf::from(format!("{i}.json")), row);
        }

        let selections = vec![("location".to_string(), "Phoenix".to_string())];
        let filtered = index.filtered(&selections, &[]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].scenario_id, "scen-b");

        let by_scenario = index.filtered(&[], &["scen-a".to_string()]);
        assert_eq!(by_scenario.len(), 1);
        assert_eq!(by_scenario[0].location, "San Diego");
    }

    #[test]
    fn load_series_extraction() {
        let mut result = sample_result();
        let site = result["outputs"]["Scenario"]["Site"].as_object_mut().unwrap();
        site["LoadProfile"]["year_one_electric_load_series_kw"] = json!([1.0, 2.0]);
        for key in [
            "year_one_power_production_series_kw",
            "year_one_to_battery_series_kw",
            "year_one_to_load_series_kw",
            "year_one_to_grid_series_kw",
            "year_one_curtailed_production_series_kw",
        ] {
            site["PV"][key] = json!([0.5, 0.5]);
        }
        for key in ["year_one_to_load_series_kw", "year_one_to_grid_series_kw"] {
            site["Storage"][key] = json!([0.1, 0.2]);
        }

        let series = extract_load_series(&result).unwrap();
        assert_eq!(series.load_profile, vec![1.0, 2.0]);
        assert_eq!(series.storage_to_grid, vec![0.1, 0.2]);
        assert!(extract_load_series(&sample_result()).is_err());
    }
}
