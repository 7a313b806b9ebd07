use serde::{Deserialize, Serialize};

use super::template::SchedulesType;

/// Parameters for a single residential building feature.
///
/// Every field carries the baseline single-family-detached default, so a
/// template only needs to override what it sweeps over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingParams {
    #[serde(rename = "type", default = "defaults::feature_type")]
    pub feature_type: String,
    #[serde(default = "defaults::building_type")]
    pub building_type: String,
    #[serde(default = "defaults::floor_area")]
    pub floor_area: f64,
    #[serde(default = "defaults::floor_area")]
    pub footprint_area: f64,
    #[serde(default = "defaults::one")]
    pub number_of_stories_above_ground: u32,
    #[serde(default = "defaults::one")]
    pub number_of_stories: u32,
    #[serde(default = "defaults::bedrooms")]
    pub number_of_bedrooms: u32,
    #[serde(default = "defaults::foundation_type")]
    pub foundation_type: String,
    #[serde(default = "defaults::attic_type")]
    pub attic_type: String,
    #[serde(default = "defaults::system_type")]
    pub system_type: String,
    #[serde(default = "defaults::template")]
    pub template: String,
    #[serde(default)]
    pub schedules_type: SchedulesType,
    /// Occupant mix for stochastic schedules, e.g. "working adults".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedules_occupant_types: Option<String>,
    /// Thermostat setback in degrees F applied by WFH-style schedules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hvac_thermostat_offset: Option<f64>,
}

impl Default for BuildingParams {
    fn default() -> Self {
        Self {
            feature_type: defaults::feature_type(),
            building_type: defaults::building_type(),
            floor_area: defaults::floor_area(),
            footprint_area: defaults::floor_area(),
            number_of_stories_above_ground: 1,
            number_of_stories: 1,
            number_of_bedrooms: defaults::bedrooms(),
            foundation_type: defaults::foundation_type(),
            attic_type: defaults::attic_type(),
            system_type: defaults::system_type(),
            template: defaults::template(),
            schedules_type: SchedulesType::Default,
            schedules_occupant_types: None,
            hvac_thermostat_offset: None,
        }
    }
}

mod defaults {
    pub fn feature_type() -> String {
        "Building".to_string()
    }

    pub fn building_type() -> String {
        "Single-Family Detached".to_string()
    }

    pub fn floor_area() -> f64 {
        2301.0
    }

    pub fn one() -> u32 {
        1
    }

    pub fn bedrooms() -> u32 {
        3
    }

    pub fn foundation_type() -> String {
        "slab".to_string()
    }

    pub fn attic_type() -> String {
        "attic - vented".to_string()
    }

    pub fn system_type() -> String {
        "Residential - electric resistance and central air conditioner".to_string()
    }

    pub fn template() -> String {
        "Residential IECC 2015 - Customizable Template Sep 2020".to_string()
    }
}
