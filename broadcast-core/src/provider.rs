use crate::{
    Config,
    error::BroadcastError,
    model::{AreaCodes, HourlyRecord, ProbabilityBlock},
    provider::{openweather::OpenWeatherProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use std::{convert::TryFrom, fmt::Debug};

pub mod jma;
pub mod openweather;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenWeather,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenWeather => "openweather",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenWeather, ProviderId::WeatherApi]
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openweather" => Ok(ProviderId::OpenWeather),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openweather, weatherapi."
            )),
        }
    }
}

/// Upstream hourly weather for one coordinate.
#[async_trait]
pub trait WeatherDataSource: Send + Sync + Debug {
    async fn hourly(&self, latitude: f64, longitude: f64)
    -> Result<Vec<HourlyRecord>, BroadcastError>;
}

/// Maps a place name to forecast-area codes and serves that area's
/// precipitation-probability blocks. Only the split-source variant uses it.
#[async_trait]
pub trait ForecastAreaResolver: Send + Sync + Debug {
    async fn resolve_codes(&self, city_name: &str) -> Result<AreaCodes, BroadcastError>;

    async fn probability_blocks(
        &self,
        codes: &AreaCodes,
    ) -> Result<Vec<ProbabilityBlock>, BroadcastError>;
}

/// Construct a data source from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Box<dyn WeatherDataSource>> {
    let api_key = config.provider_api_key(id).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key configured for provider '{id}'.\n\
                 Hint: run `weather-broadcast configure {id}` and enter your API key."
        )
    })?;
    let timeout = config.broadcast.request_timeout();

    let boxed: Box<dyn WeatherDataSource> = match id {
        ProviderId::OpenWeather => {
            Box::new(OpenWeatherProvider::new(api_key.to_owned(), timeout)?)
        }
        ProviderId::WeatherApi => Box::new(WeatherApiProvider::new(api_key.to_owned(), timeout)?),
    };

    Ok(boxed)
}

/// Construct the data source the configured calculator variant reads from.
pub fn data_source_from_config(config: &Config) -> anyhow::Result<Box<dyn WeatherDataSource>> {
    provider_from_config(config.data_source_id(), config)
}
