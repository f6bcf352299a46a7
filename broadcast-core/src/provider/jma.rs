//! Japan Meteorological Agency (JMA) forecast-area lookup and 6-hour
//! precipitation-probability blocks.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::{
    error::BroadcastError,
    http::{build_client, describe, send_for_json},
    model::{AreaCodes, ProbabilityBlock},
};

use super::ForecastAreaResolver;

const JMA_BASE: &str = "https://www.jma.go.jp";

#[derive(Debug, Clone, Deserialize)]
struct AreaEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    parent: Option<String>,
}

/// The parts of `area.json` needed to walk class20 -> class15 -> class10 -> office.
#[derive(Debug, Clone, Default, Deserialize)]
struct AreaTable {
    #[serde(default)]
    offices: HashMap<String, AreaEntry>,
    #[serde(default)]
    class10s: HashMap<String, AreaEntry>,
    #[serde(default)]
    class15s: HashMap<String, AreaEntry>,
    // Ordered by code so lookups are deterministic.
    #[serde(default)]
    class20s: BTreeMap<String, AreaEntry>,
}

impl AreaTable {
    /// A class20 (municipality) entry matches when its name equals the city
    /// name or is a suffix of it ("神奈川県川崎市" matches "川崎市"). An exact
    /// match wins, then the longest suffix.
    fn find_codes(&self, city_name: &str) -> Result<AreaCodes, BroadcastError> {
        let parent = self
            .class20s
            .values()
            .filter(|e| !e.name.is_empty() && city_name.ends_with(e.name.as_str()))
            .max_by_key(|e| (e.name == city_name, e.name.len()))
            .and_then(|e| e.parent.clone())
            .ok_or_else(|| {
                BroadcastError::AreaResolution(format!("'{city_name}' is not a known JMA area"))
            })?;

        // class15 is an optional intermediate level.
        let code = match self.class15s.get(&parent).and_then(|e| e.parent.clone()) {
            Some(up) => up,
            None => parent,
        };

        let office = self.class10s.get(&code).and_then(|e| e.parent.as_ref());
        if let Some(office) = office.filter(|o| self.offices.contains_key(o.as_str())) {
            return Ok(AreaCodes { office: office.clone(), class10: code });
        }

        Err(BroadcastError::AreaResolution(format!(
            "Could not determine office/class10 codes for '{city_name}'"
        )))
    }
}

#[derive(Debug, Deserialize)]
struct JmaArea {
    code: String,
}

#[derive(Debug, Deserialize)]
struct JmaAreaSeries {
    area: JmaArea,
    #[serde(default)]
    pops: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JmaTimeSeries {
    #[serde(default)]
    time_defines: Vec<String>,
    #[serde(default)]
    areas: Vec<JmaAreaSeries>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JmaForecast {
    #[serde(default)]
    time_series: Vec<JmaTimeSeries>,
}

/// Pull the class10 area's blocks out of an office forecast. The second time
/// series of each forecast entry holds the probabilities; empty strings are
/// blocks that have already passed.
fn extract_blocks(
    forecasts: &[JmaForecast],
    class10: &str,
) -> Result<Vec<ProbabilityBlock>, BroadcastError> {
    let series = forecasts.iter().filter_map(|f| f.time_series.get(1));

    for pop_series in series {
        let Some(area) = pop_series.areas.iter().find(|a| a.area.code == class10) else {
            continue;
        };

        let mut blocks = Vec::new();
        for (time, pop) in pop_series.time_defines.iter().zip(&area.pops) {
            if pop.is_empty() {
                continue;
            }
            let starts_at = DateTime::parse_from_rfc3339(time).map_err(|e| {
                BroadcastError::AreaResolution(format!("Invalid JMA time define '{time}': {e}"))
            })?;
            let probability = pop.parse::<u8>().map_err(|e| {
                BroadcastError::AreaResolution(format!("Invalid JMA probability '{pop}': {e}"))
            })?;
            blocks.push(ProbabilityBlock { starts_at, probability });
        }
        return Ok(blocks);
    }

    Err(BroadcastError::AreaResolution(format!(
        "JMA forecast has no precipitation data for class10 area '{class10}'"
    )))
}

#[derive(Debug)]
pub struct JmaClient {
    http: Client,
    base_url: String,
    areas: OnceCell<AreaTable>,
}

impl JmaClient {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(timeout, JMA_BASE)
    }

    pub fn with_base_url(timeout: Duration, base_url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            areas: OnceCell::new(),
        })
    }

    /// `area.json` is fetched once per client; a failed fetch is not cached.
    async fn area_table(&self) -> Result<&AreaTable, BroadcastError> {
        self.areas
            .get_or_try_init(|| async {
                let url = format!("{}/bosai/common/const/area.json", self.base_url);
                tracing::debug!(%url, "Fetching JMA area table");
                send_for_json(self.http.get(url), "JMA area.json")
                    .await
                    .map_err(|e| BroadcastError::AreaResolution(describe(e)))
            })
            .await
    }
}

#[async_trait]
impl ForecastAreaResolver for JmaClient {
    #[instrument(skip(self), level = "debug")]
    async fn resolve_codes(&self, city_name: &str) -> Result<AreaCodes, BroadcastError> {
        self.area_table().await?.find_codes(city_name)
    }

    #[instrument(skip(self), level = "debug")]
    async fn probability_blocks(
        &self,
        codes: &AreaCodes,
    ) -> Result<Vec<ProbabilityBlock>, BroadcastError> {
        let url = format!("{}/bosai/forecast/data/forecast/{}.json", self.base_url, codes.office);
        let forecasts: Vec<JmaForecast> = send_for_json(self.http.get(url), "JMA forecast")
            .await
            .map_err(|e| BroadcastError::AreaResolution(describe(e)))?;

        extract_blocks(&forecasts, &codes.class10)
    }
}
