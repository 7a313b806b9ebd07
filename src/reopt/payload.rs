//! REopt payload assembly and deterministic result naming.
//!
//! Payloads stay untyped (`serde_json::Value`): the base assumptions file is
//! someone else's API surface and this tool only overlays a handful of
//! fields onto it.

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::ScenarioTemplate;
use crate::sweep::sweep_id;

/// REopt-side resolution is pinned to hourly regardless of the simulation
/// timestep.
pub const REOPT_TIMESTEPS_PER_HOUR: u32 = 1;

/// Year the schedule generator produces, so the load profile year must match.
const LOAD_PROFILE_YEAR: u32 = 2007;

pub fn load_base_assumptions(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read base assumptions {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid base assumptions JSON in {}", path.display()))
}

/// Overlay the template's Site sections onto the base assumptions, then
/// inject the building's load profile and coordinates.
pub fn build_payload(
    base_assumptions: &Value,
    template: &ScenarioTemplate,
    loads_kw: Vec<f64>,
) -> Result<Value> {
    let mut payload = base_assumptions.clone();

    let overrides = serde_json::to_value(&template.reopt.scenario.site)?;
    let site = payload
        .pointer_mut("/Scenario/Site")
        .and_then(Value::as_object_mut)
        .context("base assumptions are missing Scenario.Site")?;

    if let Value::Object(sections) = overrides {
        for (section, fields) in sections {
            match (
                site.get_mut(&section).and_then(Value::as_object_mut),
                fields,
            ) {
                (Some(target), Value::Object(fields)) => {
                    for (key, value) in fields {
                        target.insert(key, value);
                    }
                }
                (_, fields) => {
                    site.insert(section, fields);
                }
            }
        }
    }

    site.insert(
        "LoadProfile".to_string(),
        json!({
            "percent_share": 100,
            "year": LOAD_PROFILE_YEAR,
            "loads_kw": loads_kw,
            "loads_kw_is_net": true,
        }),
    );
    site.insert("latitude".to_string(), json!(template.latitude));
    site.insert("longitude".to_string(), json!(template.longitude));

    let scenario = payload
        .pointer_mut("/Scenario")
        .and_then(Value::as_object_mut)
        .context("base assumptions are missing Scenario")?;
    scenario.insert(
        "time_steps_per_hour".to_string(),
        json!(REOPT_TIMESTEPS_PER_HOUR),
    );

    Ok(payload)
}

/// Cache filename for a building's REopt result, unique over the REopt
/// parameters that shape the answer.
pub fn results_filename(template: &ScenarioTemplate) -> String {
    let tariff = &template.reopt.scenario.site.electric_tariff;
    let storage = &template.reopt.scenario.site.storage;
    let net_metering = template.net_metering_enabled();
    let rebate = format_amount(storage.total_rebate_us_dollars_per_kwh);

    let mut fields = BTreeMap::new();
    fields.insert("net metering".to_string(), net_metering.to_string());
    fields.insert("urdb".to_string(), tariff.urdb_label.clone());
    fields.insert("storage_rebate".to_string(), rebate.clone());
    fields.insert(
        "timesteps".to_string(),
        REOPT_TIMESTEPS_PER_HOUR.to_string(),
    );
    fields.insert(
        "schedule".to_string(),
        template.building.schedules_type.to_string(),
    );
    let id = sweep_id(&fields);

    format!(
        "{}-net-metering-{}-rebate-{}-{}.json",
        tariff.urdb_label, net_metering, rebate, id
    )
    .replace(' ', "-")
    .to_lowercase()
}

/// Full cache path: `{results_dir}/{scenario}/{building}/{file}`.
pub fn result_path(
    results_dir: &Path,
    scenario_name: &str,
    building_num: u32,
    template: &ScenarioTemplate,
) -> PathBuf {
    results_dir
        .join(scenario_name)
        .join(building_num.to_string())
        .join(results_filename(template))
}

fn format_amount(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        template::{ReoptParams, ReoptScenarioParams, ReoptSiteParams},
        BuildingParams, ElectricTariffParams, StorageParams,
    };

    fn base() -> Value {
        json!({
            "Scenario": {
                "webtool_uuid": null,
                "Site": {
                    "ElectricTariff": {
                        "urdb_label": "",
                        "net_metering_limit_kw": 0,
                        "wholesale_rate_us_dollars_per_kwh": 0.0,
                    },
                    "Storage": {
                        "total_rebate_us_dollars_per_kwh": 0,
                        "max_kw": 1000000.0,
                    },
                    "PV": {"max_kw": 1000000.0},
                },
            },
        })
    }

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
                            total_rebate_us_dollars_per_kwh: 200.0,
                        },
                    },
                },
            },
            climate_zone: "3B".to_string(),
            weatherfile: "USA_CA_San.Diego.epw".to_string(),
            latitude: 32.7157,
            longitude: -117.1611,
            num_simulations: 1,
            timesteps_per_hour: 4,
            timezone: "America/Los_Angeles".to_string(),
            tag: None,
        }
    }

    #[test]
    fn payload_overlays_site_sections_and_keeps_base_fields() {
        let payload = build_payload(&base(), &template(), vec![1.0, 2.0]).unwrap();
        assert_eq!(
            payload["Scenario"]["Site"]["ElectricTariff"]["urdb_label"],
            "5a2ab4fa5457a33e0a74ab6b"
        );
        assert_eq!(
            payload["Scenario"]["Site"]["ElectricTariff"]["net_metering_limit_kw"],
            100.0
        );
        // Untouched base field survives the overlay.
        assert_eq!(
            payload["Scenario"]["Site"]["ElectricTariff"]["wholesale_rate_us_dollars_per_kwh"],
            0.0
        );
        assert_eq!(payload["Scenario"]["Site"]["Storage"]["max_kw"], 1000000.0);
    }

    #[test]
    fn payload_injects_load_profile_and_coordinates() {
        let payload = build_payload(&base(), &template(), vec![1.5, 2.5]).unwrap();
        let profile = &payload["Scenario"]["Site"]["LoadProfile"];
        assert_eq!(profile["percent_share"], 100);
        assert_eq!(profile["year"], 2007);
        assert_eq!(profile["loads_kw"], json!([1.5, 2.5]));
        assert_eq!(profile["loads_kw_is_net"], true);
        assert_eq!(payload["Scenario"]["Site"]["latitude"], 32.7157);
        // REopt resolution is pinned to hourly even for subhourly scenarios.
        assert_eq!(payload["Scenario"]["time_steps_per_hour"], 1);
    }

    #[test]
    fn results_filename_is_deterministic_slug() {
        let name = results_filename(&template());
        assert!(name.starts_with("5a2ab4fa5457a33e0a74ab6b-net-metering-true-rebate-200-"));
        assert!(name.ends_with(".json"));
        assert_eq!(name, results_filename(&template()));
    }

    #[test]
    fn results_filename_tracks_reopt_parameters() {
        let name = results_filename(&template());
        let mut other = template();
        other.reopt.scenario.site.storage.total_rebate_us_dollars_per_kwh = 0.0;
        assert_ne!(results_filename(&other), name);
    }
}
