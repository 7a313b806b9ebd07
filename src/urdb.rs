//! Utility Rate Database (OpenEI URDB) client and rate-structure queries.
//!
//! A rate can be looked up by its URDB label or by utility plus rate name;
//! name lookups resolve ties by the newest `startdate`. The structural
//! queries answer the questions a campaign cares about before pointing REopt
//! at a tariff: does it have demand charges, tiers, time-of-use periods, and
//! how many distinct seasons.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::UrdbConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Energy,
    Demand,
}

#[derive(Debug, Deserialize)]
struct UrdbResponse {
    items: Vec<UrdbRate>,
}

/// The subset of a URDB rate this tool consumes. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct UrdbRate {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "utility")]
    pub utility_name: Option<String>,
    #[serde(default)]
    pub startdate: Option<i64>,
    #[serde(default)]
    pub energyratestructure: Vec<Vec<RateTier>>,
    #[serde(default)]
    pub energyweekdayschedule: Vec<Vec<usize>>,
    #[serde(default)]
    pub energyweekendschedule: Vec<Vec<usize>>,
    #[serde(default)]
    pub demandratestructure: Option<Vec<Vec<RateTier>>>,
    #[serde(default)]
    pub demandweekdayschedule: Option<Vec<Vec<usize>>>,
    #[serde(default)]
    pub demandweekendschedule: Option<Vec<Vec<usize>>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateTier {
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub adj: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
}

pub struct UrdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl UrdbClient {
    pub fn new(cfg: &UrdbConfig) -> Result<Self> {
        anyhow::ensure!(
            !cfg.api_key.is_empty(),
            "URDB API key is not set (RCAMP__URDB__API_KEY)"
        );
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
        })
    }

    /// Fetch a rate by URDB label, or by rate name within a utility. Rate
    /// labels never contain spaces, so a space-less `rate` (or a missing
    /// utility) selects label mode.
    pub async fn fetch_rate(&self, rate: &str, utility: Option<&str>) -> Result<Option<UrdbRate>> {
        let mut params = vec![
            ("version", "8".to_string()),
            ("format", "json".to_string()),
            ("detail", "full".to_string()),
            ("api_key", self.api_key.clone()),
        ];
        let by_label = !rate.contains(' ') || utility.is_none();
        if by_label {
            params.push(("getpage", rate.to_string()));
        } else if let Some(utility) = utility {
            params.push(("ratesforutility", utility.to_string()));
        }

        info!(rate, by_label, "checking URDB");
        let response = self
            .http
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .context("URDB GET failed")?;
        let status = response.status();
        let body = response.text().await.context("URDB body read failed")?;
        if !status.is_success() {
            bail!("URDB response not OK: HTTP {status}: {body}");
        }

        let parsed: UrdbResponse =
            serde_json::from_str(&body).context("URDB response is not JSON")?;
        if parsed.items.is_empty() {
            debug!(rate, "no URDB items returned");
            return Ok(None);
        }

        if by_label {
            Ok(parsed
                .items
                .into_iter()
                .next()
                .filter(|item| item.label.as_deref() == Some(rate)))
        } else {
            Ok(newest_rate_named(parsed.items, rate))
        }
    }
}

/// Of the rates matching `name`, pick the one with the latest start date.
/// URDB keeps superseded revisions of a rate under the same name.
fn newest_rate_named(items: Vec<UrdbRate>, name: &str) -> Option<UrdbRate> {
    items
        .into_iter()
        .filter(|item| item.name.as_deref() == Some(name))
        .max_by_key(|item| item.startdate.unwrap_or(i64::MIN))
}

impl UrdbRate {
    /// Numerical rate period for a moment. Month and hour are zero-based.
    pub fn period(&self, month: usize, hour: usize, weekend: bool, kind: ScheduleKind) -> Result<usize> {
        let schedule = match (kind, weekend) {
            (ScheduleKind::Energy, false) => Some(&self.energyweekdayschedule),
            (ScheduleKind::Energy, true) => Some(&self.energyweekendschedule),
            (ScheduleKind::Demand, false) => self.demandweekdayschedule.as_ref(),
            (ScheduleKind::Demand, true) => self.demandweekendschedule.as_ref(),
        };
        let schedule = match kind {
            ScheduleKind::Energy => schedule.context("rate has no energy schedule")?,
            ScheduleKind::Demand => schedule.context("rate has no demand charge")?,
        };
        schedule
            .get(month)
            .and_then(|hours| hours.get(hour))
            .copied()
            .with_context(|| format!("no schedule entry for month {month} hour {hour}"))
    }

    /// $/kWh for the given moment. Tier numbering starts at 0.
    pub fn energy_rate(&self, month: usize, hour: usize, weekend: bool, tier: usize) -> Result<f64> {
        let period = self.period(month, hour, weekend, ScheduleKind::Energy)?;
        tier_rate(&self.energyratestructure, period, tier)
    }

    /// $/kW for the given moment. Tier numbering starts at 0.
    pub fn demand_rate(&self, month: usize, hour: usize, weekend: bool, tier: usize) -> Result<f64> {
        let period = self.period(month, hour, weekend, ScheduleKind::Demand)?;
        let structure = self
            .demandratestructure
            .as_ref()
            .context("rate has no demand charge")?;
        tier_rate(structure, period, tier)
    }

    pub fn has_demand_charge(&self) -> bool {
        self.demandratestructure
            .as_ref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    pub fn has_tiered_energy_charge(&self) -> bool {
        self.energyratestructure.iter().any(|tiers| tiers.len() > 1)
    }

    /// True when the energy price varies by hour in at least one month.
    pub fn has_tou(&self) -> bool {
        self.energyweekdayschedule
            .iter()
            .chain(self.energyweekendschedule.iter())
            .any(|month| month.iter().collect::<BTreeSet<_>>().len() > 1)
    }

    pub fn num_periods(&self) -> usize {
        self.energyratestructure.len()
    }

    /// Number of distinct (weekday, weekend) schedule pairs across months.
    pub fn num_seasons(&self) -> usize {
        let mut seasons = BTreeSet::new();
        for month in 0..12 {
            let weekday = self.energyweekdayschedule.get(month).cloned().unwrap_or_default();
            let weekend = self.energyweekendschedule.get(month).cloned().unwrap_or_default();
            seasons.insert((weekday, weekend));
        }
        seasons.len()
    }

    /// Terminal summary used by the `tariff` subcommand.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Utility:   {}", self.utility_name.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "Rate:      {}", self.name.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "Label:     {}", self.label.as_deref().unwrap_or("-"));
        let _ = writeln!(out, "Periods:   {}", self.num_periods());
        let _ = writeln!(out, "Seasons:   {}", self.num_seasons());
        let _ = writeln!(out, "Time of use:    {}", yes_no(self.has_tou()));
        let _ = writeln!(out, "Demand charge:  {}", yes_no(self.has_demand_charge()));
        let _ = writeln!(out, "Tiered energy:  {}", yes_no(self.has_tiered_energy_charge()));
        for (period, tiers) in self.energyratestructure.iter().enumerate() {
            let rates: Vec<String> = tiers
                .iter()
                .map(|t| format!("{:.5}", t.rate.unwrap_or(0.0)))
                .collect();
            let _ = writeln!(out, "  energy period {period}: {} $/kWh", rates.join(" | "));
        }
        if let Some(demand) = &self.demandratestructure {
            for (period, tiers) in demand.iter().enumerate() {
                let rates: Vec<String> = tiers
                    .iter()
                    .map(|t| format!("{:.2}", t.rate.unwrap_or(0.0)))
                    .collect();
                let _ = writeln!(out, "  demand period {period}: {} $/kW", rates.join(" | "));
            }
        }
        out
    }
}

fn tier_rate(structure: &[Vec<RateTier>], period: usize, tier: usize) -> Result<f64> {
    structure
        .get(period)
        .and_then(|tiers| tiers.get(tier))
        .and_then(|t| t.rate)
        .with_context(|| format!("no rate for period {period} tier {tier}"))
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Two-period TOU rate: period 1 from noon to 18:00 on summer weekdays.
    fn tou_rate() -> UrdbRate {
        let mut weekday = vec![vec![0usize; 24]; 12];
        for month in 5..9 {
            for hour in 12..18 {
                weekday[month][hour] = 1;
            }
        }
        let weekend = vec![vec![0usize; 24]; 12];
        serde_json::from_value(json!({
            "label": "5a2ab4fa5457a33e0a74ab6b",
            "name": "TOU-DR1",
            "utility": "San Diego Gas & Electric Co",
            "startdate": 1_500_000_000,
            "energyratestructure": [
                [{"rate": 0.25, "unit": "kWh"}],
                [{"rate": 0.53, "unit": "kWh"}],
            ],
            "energyweekdayschedule": weekday,
            "energyweekendschedule": weekend,
            "demandratestructure": [[{"rate": 12.5}]],
            "demandweekdayschedule": vec![vec![0usize; 24]; 12],
            "demandweekendschedule": vec![vec![0usize; 24]; 12],
        }))
        .unwrap()
    }

    #[test]
    fn period_and_rate_lookup() {
        let rate = tou_rate();
        assert_eq!(rate.period(6, 13, false, ScheduleKind::Energy).unwrap(), 1);
        assert_eq!(rate.period(6, 13, true, ScheduleKind::Energy).unwrap(), 0);
        assert_eq!(rate.energy_rate(6, 13, false, 0).unwrap(), 0.53);
        assert_eq!(rate.energy_rate(0, 13, false, 0).unwrap(), 0.25);
        assert_eq!(rate.demand_rate(0, 0, false, 0).unwrap(), 12.5);
    }

    #[test]
    fn structure_flags() {
        let rate = tou_rate();
        assert!(rate.has_demand_charge());
        assert!(rate.has_tou());
        assert!(!rate.has_tiered_energy_charge());
        assert_eq!(rate.num_periods(), 2);
        // Summer weekdays differ from the rest of the year.
        assert_eq!(rate.num_seasons(), 2);
    }

    #[test]
    fn demand_queries_fail_without_demand_structure() {
        let mut rate = tou_rate();
        rate.demandratestructure = None;
        rate.demandweekdayschedule = None;
        rate.demandweekendschedule = None;
        assert!(!rate.has_demand_charge());
        assert!(rate.demand_rate(0, 0, false, 0).is_err());
        assert!(rate.period(0, 0, false, ScheduleKind::Demand).is_err());
    }

    #[test]
    fn newest_rate_wins_name_ties() {
        let mut old = tou_rate();
        old.startdate = Some(1_000_000_000);
        old.label = Some("old-revision".to_string());
        let new = tou_rate();
        let picked = newest_rate_named(vec![old, new], "TOU-DR1").unwrap();
        assert_eq!(picked.label.as_deref(), Some("5a2ab4fa5457a33e0a74ab6b"));
    }

    #[test]
    fn name_mismatch_yields_none() {
        assert!(newest_rate_named(vec![tou_rate()], "Some Other Rate").is_none());
    }

    #[test]
    fn summary_mentions_key_facts() {
        let text = tou_rate().summary();
        assert!(text.contains("TOU-DR1"));
        assert!(text.contains("Demand charge:  yes"));
        assert!(text.contains("energy period 1: 0.53000 $/kWh"));
    }
}
