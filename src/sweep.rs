//! Combinatorial template generation.
//!
//! Reads the sites, tariffs, and storage CSV files and writes one scenario
//! template JSON per element of their cartesian product. Filenames embed a
//! deterministic hash of the template contents so regenerating a sweep never
//! clobbers differently-parameterized runs.

use anyhow::{Context, Result};
use itertools::iproduct;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::{
    template::{ReoptParams, ReoptScenarioParams, ReoptSiteParams},
    BuildingParams, ElectricTariffParams, ScenarioTemplate, SchedulesType, StorageParams,
};

const ID_MODULUS: u64 = 10_000_000_000;

/// One row of sites.csv.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteRow {
    pub location: String,
    pub climate_zone: String,
    pub weatherfile: String,
    pub latitude: f64,
    pub longitude: f64,
    pub num_simulations: u32,
    pub timesteps_per_hour: u32,
    pub timezone: String,
    pub schedules_type: SchedulesType,
    #[serde(default)]
    pub occupant_types: Option<String>,
}

/// One row of tariffs.csv.
#[derive(Debug, Clone, Deserialize)]
pub struct TariffRow {
    #[serde(rename = "tariff name")]
    pub name: String,
    pub urdb: String,
    #[serde(rename = "net metering")]
    pub net_metering: bool,
}

/// One row of storage.csv.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageRow {
    pub kwh_rebate: i64,
}

/// Net metering limit applied when a tariff enables net metering.
const NET_METERING_LIMIT_KW: f64 = 100.0;

pub struct SweepInputs {
    pub sites: Vec<SiteRow>,
    pub tariffs: Vec<TariffRow>,
    pub storage: Vec<StorageRow>,
}

impl SweepInputs {
    pub fn from_files<P: AsRef<Path>>(sites: P, tariffs: P, storage: P) -> Result<Self> {
        Ok(Self {
            sites: read_rows(sites.as_ref())?,
            tariffs: read_rows(tariffs.as_ref())?,
            storage: read_rows(storage.as_ref())?,
        })
    }

    /// Build a template for every site × tariff × storage combination,
    /// optionally restricted to a single location.
    pub fn templates(&self, location: Option<&str>) -> Result<Vec<ScenarioTemplate>> {
        let mut templates = Vec::new();
        for (site, tariff, storage) in iproduct!(&self.sites, &self.tariffs, &self.storage) {
            if let Some(wanted) = location {
                if site.location != wanted {
                    continue;
                }
            }
            templates.push(build_template(site, tariff, storage)?);
        }
        Ok(templates)
    }
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record.with_context(|| format!("bad row in {}", path.display()))?);
    }
    Ok(rows)
}

fn build_template(
    site: &SiteRow,
    tariff: &TariffRow,
    storage: &StorageRow,
) -> Result<ScenarioTemplate> {
    let building = BuildingParams {
        schedules_type: site.schedules_type,
        schedules_occupant_types: site.occupant_types.clone(),
        ..BuildingParams::default()
    };

    let net_metering_limit_kw = if tariff.net_metering {
        NET_METERING_LIMIT_KW
    } else {
        0.0
    };

    let mut template = ScenarioTemplate {
        location: site.location.clone(),
        building,
        reopt: ReoptParams {
            scenario: ReoptScenarioParams {
                site: ReoptSiteParams {
                    electric_tariff: ElectricTariffParams {
                        urdb_label: tariff.urdb.clone(),
                        net_metering_limit_kw,
                    },
                    storage: StorageParams {
                        total_rebate_us_dollars_per_kwh: storage.kwh_rebate as f64,
                    },
                },
            },
        },
        climate_zone: site.climate_zone.clone(),
        weatherfile: site.weatherfile.clone(),
        latitude: site.latitude,
        longitude: site.longitude,
        num_simulations: site.num_simulations,
        timesteps_per_hour: site.timesteps_per_hour,
        timezone: site.timezone.clone(),
        tag: None,
    };
    template.validate()?;

    // Tag the template with a hash of its own contents (tag excluded) so the
    // filename is stable across regenerations.
    let id = template_id(&template)?;
    let urdb_prefix: String = tariff.urdb.chars().take(5).collect();
    let tag = slugify(&format!(
        "{}-{}-{}-net-metering-{}-sched-{}-{}-sims-rebate-{}-{}",
        template.location,
        tariff.name,
        urdb_prefix,
        tariff.net_metering,
        site.schedules_type,
        site.num_simulations,
        storage.kwh_rebate,
        id,
    ));
    template.tag = Some(tag);
    Ok(template)
}

/// Write each template as `template-{tag}.json` under `dir`.
pub fn write_templates(templates: &[ScenarioTemplate], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let mut written = Vec::with_capacity(templates.len());
    for template in templates {
        let tag = template
            .tag
            .as_deref()
            .context("template is missing its tag")?;
        let path = dir.join(format!("template-{tag}.json"));
        let body = serde_json::to_string_pretty(template)?;
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote template");
        written.push(path);
    }
    Ok(written)
}

/// Ten-digit content id of a template, computed over its flattened fields
/// with the tag excluded.
pub fn template_id(template: &ScenarioTemplate) -> Result<u64> {
    let mut value = serde_json::to_value(template)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("tag");
    }
    let mut flat = BTreeMap::new();
    flatten_value("", &value, &mut flat);
    Ok(sweep_id(&flat))
}

/// Order-independent 10-digit id over a flat key/value map. Each key and each
/// canonical value string is SHA-256 hashed, every digest is reduced mod 1e10,
/// and the residues are summed mod 1e10. Summing residues is congruent to
/// summing the full digests, so insertion order never matters.
pub fn sweep_id(fields: &BTreeMap<String, String>) -> u64 {
    let mut id: u64 = 0;
    for (key, value) in fields {
        id = (id + digest_mod(value.as_bytes())) % ID_MODULUS;
        id = (id + digest_mod(key.as_bytes())) % ID_MODULUS;
    }
    id
}

fn digest_mod(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    // Big-endian digest reduced mod 1e10, one byte at a time.
    digest
        .iter()
        .fold(0u64, |acc, b| (acc * 256 + u64::from(*b)) % ID_MODULUS)
}

/// Flatten a JSON object into dotted keys with canonical value strings.
pub fn flatten_value(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, nested) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&path, nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), canonical_value_string(other));
        }
    }
}

/// Canonical string form of a scalar for hashing. Integral numbers render
/// without a decimal point; everything non-scalar renders as compact JSON.
pub fn canonical_value_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f.abs() < 1e15 {
                    format!("{}", f as i64)
                } else {
                    f.to_string()
                }
            } else {
                n.to_string()
            }
        }
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn slugify(text: &str) -> String {
    text.replace(' ', "-").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn inputs() -> SweepInputs {
        SweepInputs {
            sites: vec![
                SiteRow {
                    location: "San Diego".to_string(),
                    climate_zone: "3B".to_string(),
                    weatherfile: "USA_CA_San.Diego.epw".to_string(),
                    latitude: 32.7157,
                    longitude: -117.1611,
                    num_simulations: 2,
                    timesteps_per_hour: 1,
                    timezone: "America/Los_Angeles".to_string(),
                    schedules_type: SchedulesType::Default,
                    occupant_types: None,
                },
                SiteRow {
                    location: "Phoenix".to_string(),
                    climate_zone: "2B".to_string(),
                    weatherfile: "USA_AZ_Phoenix.epw".to_string(),
                    latitude: 33.4484,
                    longitude: -112.074,
                    num_simulations: 1,
                    timesteps_per_hour: 4,
                    timezone: "America/Phoenix".to_string(),
                    schedules_type: SchedulesType::Stochastic,
                    occupant_types: Some("working adults".to_string()),
                },
            ],
            tariffs: vec![
                TariffRow {
                    name: "TOU-DR1".to_string(),
                    urdb: "5a2ab4fa5457a33e0a74ab6b".to_string(),
                    net_metering: true,
                },
                TariffRow {
                    name: "EV-TOU".to_string(),
                    urdb: "5b3c11e95457a3303a1e2f48".to_string(),
                    net_metering: false,
                },
            ],
            storage: vec![StorageRow { kwh_rebate: 0 }, StorageRow { kwh_rebate: 200 }],
        }
    }

    #[test]
    fn product_covers_all_combinations() {
        let templates = inputs().templates(None).unwrap();
        assert_eq!(templates.len(), 2 * 2 * 2);
    }

    #[test]
    fn location_filter_restricts_output() {
        let templates = inputs().templates(Some("Phoenix")).unwrap();
        assert_eq!(templates.len(), 4);
        assert!(templates.iter().all(|t| t.location == "Phoenix"));
    }

    #[test]
    fn net_metering_maps_to_limit() {
        let templates = inputs().templates(Some("San Diego")).unwrap();
        let limits: Vec<f64> = templates
            .iter()
            .map(|t| t.reopt.scenario.site.electric_tariff.net_metering_limit_kw)
            .collect();
        assert!(limits.contains(&100.0));
        assert!(limits.contains(&0.0));
    }

    #[test]
    fn tags_are_lowercase_slugs_with_ten_digit_ids() {
        let templates = inputs().templates(None).unwrap();
        for template in &templates {
            let tag = template.tag.as_deref().unwrap();
            assert_eq!(tag, tag.to_lowercase());
            assert!(!tag.contains(' '));
            let id: u64 = tag.rsplit('-').next().unwrap().parse().unwrap();
            assert!(id < ID_MODULUS);
        }
    }

    #[test]
    fn template_id_ignores_tag_and_is_stable() {
        let mut template = inputs().templates(None).unwrap().remove(0);
        let id = template_id(&template).unwrap();
        template.tag = Some("something-else".to_string());
        assert_eq!(template_id(&template).unwrap(), id);
    }

    #[test]
    fn template_id_changes_with_contents() {
        let mut template = inputs().templates(None).unwrap().remove(0);
        let id = template_id(&template).unwrap();
        template.latitude += 0.5;
        assert_ne!(template_id(&template).unwrap(), id);
    }

    #[test]
    fn sweep_id_is_order_independent() {
        let mut forward = BTreeMap::new();
        forward.insert("a".to_string(), "1".to_string());
        forward.insert("b".to_string(), "2".to_string());
        // BTreeMap already orders keys; build the same map from reversed
        // inserts to check the arithmetic has no order dependence anyway.
        let mut reversed = BTreeMap::new();
        reversed.insert("b".to_string(), "2".to_string());
        reversed.insert("a".to_string(), "1".to_string());
        assert_eq!(sweep_id(&forward), sweep_id(&reversed));
    }

    #[test]
    fn flatten_uses_dotted_keys() {
        let value = json!({
            "reopt": {"Scenario": {"Site": {"ElectricTariff": {"urdb_label": "abc"}}}},
            "latitude": 32.7157,
        });
        let mut flat = BTreeMap::new();
        flatten_value("", &value, &mut flat);
        assert_eq!(
            flat.get("reopt.Scenario.Site.ElectricTariff.urdb_label"),
            Some(&"abc".to_string())
        );
        assert_eq!(flat.get("latitude"), Some(&"32.7157".to_string()));
    }

    #[rstest]
    #[case(json!(1.0), "1")]
    #[case(json!(3), "3")]
    #[case(json!(true), "true")]
    #[case(json!("Text Here"), "Text Here")]
    #[case(json!(null), "")]
    fn canonical_strings(#[case] value: serde_json::Value, #[case] expected: &str) {
        assert_eq!(canonical_value_string(&value), expected);
    }
}
