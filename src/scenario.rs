//! Scenario materialization: deterministic naming, the URBANopt scenario
//! file (a GeoJSON FeatureCollection), the mapper CSV, and the run-cache
//! check against the simulator's `run_status.json`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::ScenarioTemplate;
use crate::sweep::{canonical_value_string, flatten_value, sweep_id};

/// Simulation year pinned by the schedule generator.
const BEGIN_DATE: &str = "2007-01-01T00:00:00.000";
const END_DATE: &str = "2007-12-31T23:59:00.000";

const MAPPER_CLASS: &str = "URBANopt::Scenario::BaselineMapper";

/// Dummy polygon edge length, since URBANopt rejects point geometry for
/// buildings.
const POLYGON_OFFSET_DEG: f64 = 0.0005;

pub struct Scenario {
    pub template: ScenarioTemplate,
}

/// On-disk shape of the URBANopt scenario file. Feature properties stay
/// untyped: URBANopt accepts a superset of what this tool writes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScenarioFile {
    #[serde(rename = "type")]
    pub kind: String,
    pub project: ProjectInfo,
    pub features: Vec<Value>,
    pub mappers: Vec<Value>,
    pub scenarios: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub id: String,
    pub name: String,
    pub surface_elevation: Option<f64>,
    pub import_surrounding_buildings_as_shading: Option<bool>,
    pub weather_filename: String,
    pub tariff_filename: Option<String>,
    pub climate_zone: String,
    pub cec_climate_zone: Option<String>,
    pub begin_date: String,
    pub end_date: String,
    pub timesteps_per_hour: u32,
    pub default_template: String,
}

#[derive(Debug, Deserialize)]
struct RunStatus {
    results: Vec<FeatureRunStatus>,
}

#[derive(Debug, Deserialize)]
struct FeatureRunStatus {
    status: String,
}

impl Scenario {
    pub fn new(template: ScenarioTemplate) -> Self {
        Self { template }
    }

    pub fn from_template_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(ScenarioTemplate::from_file(path)?))
    }

    /// Unique name derived from the site and building parameters. REopt
    /// parameters are deliberately excluded: two templates differing only in
    /// tariff or storage share one building simulation.
    pub fn scenario_name(&self) -> String {
        let t = &self.template;
        let b = &t.building;
        let id = self.building_sim_id();
        let name = match &b.schedules_occupant_types {
            Some(occupants) => {
                let offset = b.hvac_thermostat_offset.unwrap_or(0.0) as i64;
                format!(
                    "home-{}-{}-bd-{}-sched-{}-occ-{}-hvac-setback-{}-{}",
                    t.location,
                    b.number_of_bedrooms,
                    format_area(b.floor_area),
                    b.schedules_type,
                    occupants,
                    offset,
                    id,
                )
            }
            None => format!(
                "home-{}-{}-bd-{}-sched-{}-{}",
                t.location,
                b.number_of_bedrooms,
                format_area(b.floor_area),
                b.schedules_type,
                id,
            ),
        };
        name.replace(' ', "-").to_lowercase()
    }

    /// Hash of everything the building simulation depends on.
    fn building_sim_id(&self) -> u64 {
        let t = &self.template;
        let mut fields = BTreeMap::new();
        fields.insert("location".to_string(), t.location.clone());
        fields.insert("weatherfile".to_string(), t.weatherfile.clone());
        fields.insert("climate_zone".to_string(), t.climate_zone.clone());
        fields.insert("latitude".to_string(), t.latitude.to_string());
        fields.insert("longitude".to_string(), t.longitude.to_string());
        fields.insert("num_simulations".to_string(), t.num_simulations.to_string());
        fields.insert(
            "timesteps_per_hour".to_string(),
            t.timesteps_per_hour.to_string(),
        );
        let building = serde_json::to_value(&t.building).unwrap_or(Value::Null);
        flatten_value("", &building, &mut fields);
        sweep_id(&fields)
    }

    pub fn scenario_filename(&self) -> String {
        format!("{}.json", self.scenario_name())
    }

    pub fn mapper_filename(&self) -> String {
        format!("{}.csv", self.scenario_name())
    }

    pub fn make_scenario_file(&self) -> ScenarioFile {
        let t = &self.template;
        let mut features = vec![json!({
            "type": "Feature",
            "properties": {
                "id": "site-origin",
                "name": "Site Origin",
                "type": "Site Origin",
            },
            "geometry": {
                "type": "Point",
                "coordinates": [t.latitude, t.longitude],
            },
        })];
        for number in 1..=t.num_simulations {
            features.push(self.make_building_feature(number));
        }

        ScenarioFile {
            kind: "FeatureCollection".to_string(),
            project: ProjectInfo {
                id: "campaign-project".to_string(),
                name: t.location.clone(),
                surface_elevation: None,
                import_surrounding_buildings_as_shading: None,
                weather_filename: t.weatherfile.clone(),
                tariff_filename: None,
                climate_zone: t.climate_zone.clone(),
                cec_climate_zone: None,
                begin_date: BEGIN_DATE.to_string(),
                end_date: END_DATE.to_string(),
                timesteps_per_hour: t.timesteps_per_hour,
                default_template: "90.1-2013".to_string(),
            },
            features,
            mappers: vec![],
            scenarios: vec![json!({
                "feature_mappings": [],
                "id": "campaign-scenario",
                "name": "New Scenario",
            })],
        }
    }

    fn make_building_feature(&self, number: u32) -> Value {
        let mut properties = serde_json::Map::new();
        properties.insert("id".to_string(), json!(number.to_string()));
        properties.insert("name".to_string(), json!(format!("Residential {number}")));
        properties.insert("type".to_string(), json!("Building"));

        // Copy the building parameters in, skipping unset ones.
        if let Ok(Value::Object(params)) = serde_json::to_value(&self.template.building) {
            for (key, value) in params {
                if key == "type" || value.is_null() || canonical_value_string(&value).is_empty() {
                    continue;
                }
                properties.insert(key, value);
            }
        }

        json!({
            "type": "Feature",
            "properties": Value::Object(properties),
            "geometry": {
                "type": "Polygon",
                "coordinates": self.make_polygon(),
            },
        })
    }

    fn make_polygon(&self) -> Value {
        let lat = self.template.latitude;
        let lng = self.template.longitude;
        json!([[
            [lat, lng],
            [lat, lng + POLYGON_OFFSET_DEG],
            [lat + POLYGON_OFFSET_DEG, lng + POLYGON_OFFSET_DEG],
            [lat + POLYGON_OFFSET_DEG, lng],
        ]])
    }

    pub fn write_scenario_json(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.scenario_filename());
        let body = serde_json::to_string_pretty(&self.make_scenario_file())?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote scenario JSON");
        Ok(path)
    }

    pub fn write_mapper_csv(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(self.mapper_filename());
        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        writer.write_record(["Feature ID", "Feature Name", "Mapper Class"])?;
        for number in 1..=self.template.num_simulations {
            writer.write_record([
                number.to_string(),
                format!("Residential {number}"),
                MAPPER_CLASS.to_string(),
            ])?;
        }
        writer.flush()?;
        info!(path = %path.display(), "wrote mapper CSV");
        Ok(path)
    }

    /// True when the simulator already produced a complete run for this
    /// scenario: `run_status.json` exists and every expected feature reports
    /// `Complete`.
    pub fn results_exist(&self, run_dir: &Path) -> bool {
        let status_path = run_dir.join(self.scenario_name()).join("run_status.json");
        let Ok(raw) = std::fs::read_to_string(&status_path) else {
            return false;
        };
        let Ok(status) = serde_json::from_str::<RunStatus>(&raw) else {
            return false;
        };
        if status.results.len() < self.template.num_simulations as usize {
            return false;
        }
        status
            .results
            .iter()
            .take(self.template.num_simulations as usize)
            .all(|feature| feature.status == "Complete")
    }

    /// Archive the scenario JSON into the run directory (so the run stays
    /// traceable) and drop the mapper CSV.
    pub fn cleanup(&self, scenario_dir: &Path, run_dir: &Path) -> Result<()> {
        let source = scenario_dir.join(self.scenario_filename());
        let destination = run_dir
            .join(self.scenario_name())
            .join("urbanopt_scenario.json");
        if source.exists() && destination.parent().map(Path::exists).unwrap_or(false) {
            std::fs::rename(&source, &destination).with_context(|| {
                format!(
                    "failed to archive {} to {}",
                    source.display(),
                    destination.display()
                )
            })?;
        }
        let mapper = scenario_dir.join(self.mapper_filename());
        if mapper.exists() {
            std::fs::remove_file(&mapper)
                .with_context(|| format!("failed to remove {}", mapper.display()))?;
        }
        Ok(())
    }
}

/// Render an area the way it appears in scenario names: integral values
/// without a trailing `.0`.
fn format_area(area: f64) -> String {
    if area.fract() == 0.0 {
        format!("{}", area as i64)
    } else {
        area.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        template::{ReoptParams, ReoptScenarioParams, ReoptSiteParams},
        BuildingParams, ElectricTariffParams, StorageParams,
    };

    fn template() -> ScenarioTemplate {
        ScenarioTemplate {
            location: "San Diego".to_string(),
            building: BuildingParams::default(),
            reopt: ReoptParams {
                scenario: ReoptScenarioParams {
                    site: ReoptSiteParams {
                        electric_tariff: ElectricTariffParams {
                            urdb_label: "5a2ab4fa5457a33e0a74ab6b".to_string(),
                            net_metering_limit_kw: 100.0,
                        },
                        storage: StorageParams {
                            total_rebate_us_dollars_per_kwh: 0.0,
                        },
                    },
                },
            },
            climate_zone: "3B".to_string(),
            weatherfile: "USA_CA_San.Diego.epw".to_string(),
            latitude: 32.7157,
            longitude: -117.1611,
            num_simulations: 2,
            timesteps_per_hour: 1,
            timezone: "America/Los_Angeles".to_string(),
            tag: None,
        }
    }

    #[test]
    fn scenario_name_is_slug_with_building_hash() {
        let scenario = Scenario::new(template());
        let name = scenario.scenario_name();
        assert!(name.starts_with("home-san-diego-3-bd-2301-sched-default-"));
        assert!(!name.contains(' '));
    }

    #[test]
    fn scenario_name_ignores_reopt_parameters() {
        let scenario = Scenario::new(template());
        let mut other = template();
        other.reopt.scenario.site.electric_tariff.net_metering_limit_kw = 0.0;
        other.reopt.scenario.site.storage.total_rebate_us_dollars_per_kwh = 500.0;
        assert_eq!(scenario.scenario_name(), Scenario::new(other).scenario_name());
    }

    #[test]
    fn occupant_types_extend_the_name() {
        let mut t = template();
        t.building.schedules_occupant_types = Some("working adults".to_string());
        t.building.hvac_thermostat_offset = Some(4.0);
        let name = Scenario::new(t).scenario_name();
        assert!(name.contains("-occ-working-adults-hvac-setback-4-"));
    }

    #[test]
    fn scenario_file_has_origin_plus_buildings() {
        let scenario = Scenario::new(template());
        let file = scenario.make_scenario_file();
        assert_eq!(file.kind, "FeatureCollection");
        assert_eq!(file.features.len(), 3);
        assert_eq!(file.features[0]["geometry"]["type"], "Point");
        assert_eq!(file.features[1]["geometry"]["type"], "Polygon");
        assert_eq!(file.features[1]["properties"]["id"], "1");
        assert_eq!(
            file.features[2]["properties"]["schedules_type"],
            "default"
        );
        assert_eq!(file.project.begin_date, BEGIN_DATE);
        assert_eq!(file.project.timesteps_per_hour, 1);
    }

    #[test]
    fn run_cache_requires_all_features_complete() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::new(template());
        assert!(!scenario.results_exist(dir.path()));

        let scenario_run = dir.path().join(scenario.scenario_name());
        std::fs::create_dir_all(&scenario_run).unwrap();
        std::fs::write(
            scenario_run.join("run_status.json"),
            r#"{"results": [{"status": "Complete"}, {"status": "Failed"}]}"#,
        )
        .unwrap();
        assert!(!scenario.results_exist(dir.path()));

        std::fs::write(
            scenario_run.join("run_status.json"),
            r#"{"results": [{"status": "Complete"}, {"status": "Complete"}]}"#,
        )
        .unwrap();
        assert!(scenario.results_exist(dir.path()));
    }

    #[test]
    fn cleanup_archives_scenario_and_removes_mapper() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::new(template());
        let run_dir = dir.path().join("run");
        std::fs::create_dir_all(run_dir.join(scenario.scenario_name())).unwrap();
        scenario.write_scenario_json(dir.path()).unwrap();
        scenario.write_mapper_csv(dir.path()).unwrap();

        scenario.cleanup(dir.path(), &run_dir).unwrap();

        assert!(!dir.path().join(scenario.scenario_filename()).exists());
        assert!(!dir.path().join(scenario.mapper_filename()).exists());
        assert!(run_dir
            .join(scenario.scenario_name())
            .join("urbanopt_scenario.json")
            .exists());
    }
}
