use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::{
    error::BroadcastError,
    http::{build_client, describe, send_for_json},
    model::{HourlyRecord, PrecipitationChance, RecordTime},
};

use super::WeatherDataSource;

const WEATHERAPI_BASE: &str = "https://api.weatherapi.com";
const LOCAL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// WeatherAPI.com one-day forecast. Hour entries carry local wall-clock
/// time strings for the queried point.
#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(api_key, timeout, WEATHERAPI_BASE)
    }

    pub fn with_base_url(api_key: String, timeout: Duration, base_url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            api_key,
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_forecast(&self, latitude: f64, longitude: f64) -> anyhow::Result<WaForecastResponse> {
        let url = format!("{}/v1/forecast.json", self.base_url);
        let q = format!("{latitude},{longitude}");

        let request = self.http.get(url).query(&[
            ("key", self.api_key.as_str()),
            ("q", q.as_str()),
            ("days", "1"),
            ("aqi", "no"),
            ("alerts", "no"),
        ]);

        send_for_json(request, "WeatherAPI forecast").await
    }
}

#[derive(Debug, Deserialize)]
struct WaForecastHour {
    time: String,
    temp_c: f64,
    #[serde(default)]
    chance_of_rain: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    #[serde(default)]
    hour: Vec<WaForecastHour>,
}

#[derive(Debug, Default, Deserialize)]
struct WaForecast {
    #[serde(default)]
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaForecastResponse {
    #[serde(default)]
    forecast: WaForecast,
}

impl WaForecastHour {
    fn into_record(self) -> Result<HourlyRecord, BroadcastError> {
        let time = NaiveDateTime::parse_from_str(&self.time, LOCAL_TIME_FORMAT).map_err(|e| {
            BroadcastError::DataSource(format!("Unparseable WeatherAPI hour '{}': {e}", self.time))
        })?;

        Ok(HourlyRecord {
            time: RecordTime::Local(time),
            temperature: self.temp_c,
            precipitation: self.chance_of_rain.map(PrecipitationChance::Percent),
        })
    }
}

#[async_trait]
impl WeatherDataSource for WeatherApiProvider {
    async fn hourly(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<HourlyRecord>, BroadcastError> {
        let parsed = self
            .fetch_forecast(latitude, longitude)
            .await
            .map_err(|e| BroadcastError::DataSource(describe(e)))?;

        // Today only; a missing forecast day means no data rather than an error.
        let Some(today) = parsed.forecast.forecastday.into_iter().next() else {
            return Ok(Vec::new());
        };

        today.hour.into_iter().map(WaForecastHour::into_record).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Timelike};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> WeatherApiProvider {
        WeatherApiProvider::with_base_url("test-key".into(), Duration::from_secs(5), &server.uri())
            .unwrap()
    }

    #[tokio::test]
    async fn parses_hourly_forecast() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast.json"))
            .and(query_param("key", "test-key"))
            .and(query_param("q", "35.6619,139.7041"))
            .and(query_param("days", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "forecast": {"forecastday": [{"hour": [
                    {"time": "2026-02-02 09:00", "temp_c": 18.0, "chance_of_rain": 20},
                    {"time": "2026-02-02 12:00", "temp_c": 25.5, "chance_of_rain": 45}
                ]}]}
            })))
            .mount(&server)
            .await;

        let records = provider(&server).hourly(35.6619, 139.7041).await.unwrap();

        assert_eq!(records.len(), 2);
        let expected = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap().and_hms_opt(12, 0, 0).unwrap();
        assert_eq!(records[1].time, RecordTime::Local(expected));
        assert_eq!(records[1].temperature, 25.5);
        assert_eq!(records[1].precipitation, Some(PrecipitationChance::Percent(45)));
        match records[0].time {
            RecordTime::Local(t) => assert_eq!(t.hour(), 9),
            other => panic!("unexpected time {other:?}"),
        }
    }

    #[tokio::test]
    async fn whole_percent_chance_survives_calculation() {
        use crate::calculator::{CalculatorVariant, Precipitation, WeatherCalculator};
        use chrono_tz::Asia::Tokyo;

        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "forecast": {"forecastday": [{"hour": [
                    {"time": "2026-02-02 10:00", "temp_c": 18.0, "chance_of_rain": 12},
                    {"time": "2026-02-02 12:00", "temp_c": 20.0, "chance_of_rain": 29}
                ]}]}
            })))
            .mount(&server)
            .await;

        let records = provider(&server).hourly(35.6619, 139.7041).await.unwrap();
        let weather = WeatherCalculator::for_variant(Tokyo, CalculatorVariant::CombinedLocal)
            .calculate(&records, Precipitation::Hourly)
            .unwrap();

        assert_eq!(weather.pop(), 29);
    }

    #[tokio::test]
    async fn missing_forecast_day_yields_no_records() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let records = provider(&server).hourly(35.0, 139.0).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn http_failure_is_a_data_source_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v1/forecast.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(&server).hourly(35.0, 139.0).await.unwrap_err();
        match err {
            BroadcastError::DataSource(msg) => {
                assert!(msg.contains("401"));
                assert!(msg.contains("bad key"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
