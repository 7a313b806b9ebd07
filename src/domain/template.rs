use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

use super::building::BuildingParams;

/// Occupancy schedule flavor understood by the schedule generator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SchedulesType {
    #[default]
    Default,
    Stochastic,
}

/// A scenario template: one point of the sweep, stored as JSON under the
/// template directory and consumed by the `run` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioTemplate {
    pub location: String,
    pub building: BuildingParams,
    pub reopt: ReoptParams,
    pub climate_zone: String,
    pub weatherfile: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default = "default_one")]
    pub num_simulations: u32,
    #[serde(default = "default_one")]
    pub timesteps_per_hour: u32,
    pub timezone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// REopt inputs that vary per template. Everything else comes from the base
/// assumptions file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReoptParams {
    #[serde(rename = "Scenario")]
    pub scenario: ReoptScenarioParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReoptScenarioParams {
    #[serde(rename = "Site")]
    pub site: ReoptSiteParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReoptSiteParams {
    #[serde(rename = "ElectricTariff")]
    pub electric_tariff: ElectricTariffParams,
    #[serde(rename = "Storage")]
    pub storage: StorageParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectricTariffParams {
    pub urdb_label: String,
    pub net_metering_limit_kw: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageParams {
    pub total_rebate_us_dollars_per_kwh: f64,
}

impl ScenarioTemplate {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read template {}", path.display()))?;
        let template: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid template JSON in {}", path.display()))?;
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<()> {
        chrono_tz::Tz::from_str(&self.timezone)
            .map_err(|_| anyhow::anyhow!("unknown timezone {:?}", self.timezone))?;
        anyhow::ensure!(
            self.num_simulations >= 1,
            "num_simulations must be at least 1"
        );
        anyhow::ensure!(
            self.timesteps_per_hour >= 1,
            "timesteps_per_hour must be at least 1"
        );
        Ok(())
    }

    pub fn net_metering_enabled(&self) -> bool {
        self.reopt.scenario.site.electric_tariff.net_metering_limit_kw != 0.0
    }
}

fn default_one() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ScenarioTemplate {
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
            timesteps_per_hour: 1,
            timezone: "America/Los_Angeles".to_string(),
            tag: None,
        }
    }

    #[test]
    fn validates_timezone() {
        let mut template = sample();
        template.validate().unwrap();
        template.timezone = "Mars/Olympus_Mons".to_string();
        assert!(template.validate().is_err());
    }

    #[test]
    fn net_metering_follows_limit() {
        let mut template = sample();
        assert!(template.net_metering_enabled());
        template
            .reopt
            .scenario
            .site
            .electric_tariff
            .net_metering_limit_kw = 0.0;
        assert!(!template.net_metering_enabled());
    }

    #[test]
    fn schedules_type_round_trips_lowercase() {
        assert_eq!(SchedulesType::Stochastic.to_string(), "stochastic");
        let parsed: SchedulesType = serde_json::from_str("\"default\"").unwrap();
        assert_eq!(parsed, SchedulesType::Default);
    }
}
