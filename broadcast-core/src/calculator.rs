//! Effective-weather calculation over the 09:00-23:00 local window.
//!
//! Providers are normalized into [`HourlyRecord`]s first; the variants below
//! differ only in rounding precision and in where the precipitation
//! probability comes from.

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BroadcastError, WindowSubject},
    model::{HourlyRecord, PrecipitationChance, ProbabilityBlock, RecordTime, Weather},
};

/// First hour inside the window (inclusive).
pub const WINDOW_START_HOUR: u32 = 9;
/// First hour past the window (exclusive).
pub const WINDOW_END_HOUR: u32 = 23;
/// Anchor hours of the 6-hour blocks that overlap the window.
pub const BLOCK_ANCHOR_HOURS: [u32; 3] = [6, 12, 18];

/// The three provider deployments, each with exactly one derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CalculatorVariant {
    /// WeatherAPI temperatures joined with JMA 6-hour precipitation blocks.
    ///
    /// Shown to one decimal. The earlier whole-degree display of this
    /// deployment is deliberately not kept; the combined variants still
    /// round to whole degrees.
    #[default]
    SplitSource,
    /// OpenWeather hourly records with Unix timestamps and 0-1 `pop`.
    CombinedEpoch,
    /// WeatherAPI hourly records with local time strings and `chance_of_rain`.
    CombinedLocal,
}

impl CalculatorVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalculatorVariant::SplitSource => "split-source",
            CalculatorVariant::CombinedEpoch => "combined-epoch",
            CalculatorVariant::CombinedLocal => "combined-local",
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            CalculatorVariant::SplitSource => Precision::Tenths,
            CalculatorVariant::CombinedEpoch | CalculatorVariant::CombinedLocal => Precision::Whole,
        }
    }

    pub fn uses_probability_blocks(&self) -> bool {
        matches!(self, CalculatorVariant::SplitSource)
    }
}

impl std::fmt::Display for CalculatorVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Displayed temperature precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Whole,
    Tenths,
}

impl Precision {
    /// Ties round to the even neighbour (24.5 -> 24, 25.5 -> 26).
    pub fn round(&self, value: f64) -> f64 {
        match self {
            Precision::Whole => value.round_ties_even(),
            Precision::Tenths => (value * 10.0).round_ties_even() / 10.0,
        }
    }

    pub fn format(&self, value: f64) -> String {
        match self {
            Precision::Whole => format!("{value:.0}"),
            Precision::Tenths => format!("{value:.1}"),
        }
    }
}

/// Where the precipitation probability comes from.
#[derive(Debug, Clone, Copy)]
pub enum Precipitation<'a> {
    /// Separate coarse blocks (JMA).
    Blocks(&'a [ProbabilityBlock]),
    /// The per-hour fraction carried by the windowed hourly records.
    Hourly,
}

#[derive(Debug, Clone)]
pub struct WeatherCalculator {
    zone: Tz,
    precision: Precision,
}

impl WeatherCalculator {
    pub fn new(zone: Tz, precision: Precision) -> Self {
        Self { zone, precision }
    }

    pub fn for_variant(zone: Tz, variant: CalculatorVariant) -> Self {
        Self::new(zone, variant.precision())
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn calculate(
        &self,
        hourly: &[HourlyRecord],
        precipitation: Precipitation<'_>,
    ) -> Result<Weather, BroadcastError> {
        let windowed: Vec<&HourlyRecord> =
            hourly.iter().filter(|r| self.in_window(r.time)).collect();

        let (max, min) = windowed
            .iter()
            .map(|r| r.temperature)
            .fold(None, |acc: Option<(f64, f64)>, t| match acc {
                None => Some((t, t)),
                Some((max, min)) => Some((max.max(t), min.min(t))),
            })
            .ok_or(BroadcastError::NoDataInWindow(WindowSubject::Temperature))?;

        let pop = match precipitation {
            Precipitation::Blocks(blocks) => self.pop_from_blocks(blocks)?,
            Precipitation::Hourly => pop_from_hourly(&windowed)?,
        };

        Weather::new(self.precision.round(max), self.precision.round(min), pop)
    }

    fn local_hour(&self, time: RecordTime) -> Option<u32> {
        match time {
            RecordTime::Epoch(secs) => {
                DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&self.zone).hour())
            }
            RecordTime::Local(naive) => Some(naive.hour()),
        }
    }

    fn in_window(&self, time: RecordTime) -> bool {
        self.local_hour(time)
            .is_some_and(|h| (WINDOW_START_HOUR..WINDOW_END_HOUR).contains(&h))
    }

    fn pop_from_blocks(&self, blocks: &[ProbabilityBlock]) -> Result<i64, BroadcastError> {
        blocks
            .iter()
            .filter(|b| BLOCK_ANCHOR_HOURS.contains(&b.starts_at.with_timezone(&self.zone).hour()))
            .map(|b| i64::from(b.probability))
            .max()
            .ok_or(BroadcastError::NoDataInWindow(WindowSubject::Precipitation))
    }
}

/// Flooring is monotonic, so the max of floored percents equals the floor of
/// the max fraction.
fn pop_from_hourly(windowed: &[&HourlyRecord]) -> Result<i64, BroadcastError> {
    windowed
        .iter()
        .filter_map(|r| r.precipitation.map(PrecipitationChance::floor_percent))
        .max()
        .ok_or(BroadcastError::NoDataInWindow(WindowSubject::Precipitation))
}
