use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::{
    error::BroadcastError,
    http::{build_client, describe, send_for_json},
    model::{HourlyRecord, PrecipitationChance, RecordTime},
};

use super::WeatherDataSource;

const OPENWEATHER_BASE: &str = "https://api.openweathermap.org";

/// OpenWeather One Call 3.0, hourly section only.
#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    base_url: String,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String, timeout: Duration) -> reqwest::Result<Self> {
        Self::with_base_url(api_key, timeout, OPENWEATHER_BASE)
    }

    pub fn with_base_url(api_key: String, timeout: Duration, base_url: &str) -> reqwest::Result<Self> {
        Ok(Self {
            api_key,
            http: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn fetch_hourly(&self, latitude: f64, longitude: f64) -> anyhow::Result<OwOneCallResponse> {
        let url = format!("{}/data/3.0/onecall", self.base_url);
        let lat = latitude.to_string();
        let lon = longitude.to_string();

        let request = self.http.get(url).query(&[
            ("lat", lat.as_str()),
            ("lon", lon.as_str()),
            ("exclude", "current,minutely,daily,alerts"),
            ("units", "metric"),
            ("appid", self.api_key.as_str()),
        ]);

        send_for_json(request, "OpenWeather One Call").await
    }
}

#[derive(Debug, Deserialize)]
struct OwHourly {
    dt: i64,
    temp: f64,
    #[serde(default)]
    pop: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OwOneCallResponse {
    #[serde(default)]
    hourly: Vec<OwHourly>,
}

#[async_trait]
impl WeatherDataSource for OpenWeatherProvider {
    async fn hourly(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<HourlyRecord>, BroadcastError> {
        let parsed = self
            .fetch_hourly(latitude, longitude)
            .await
            .map_err(|e| BroadcastError::DataSource(describe(e)))?;

        Ok(parsed
            .hourly
            .into_iter()
            .map(|h| HourlyRecord {
                time: RecordTime::Epoch(h.dt),
                temperature: h.temp,
                precipitation: h.pop.map(PrecipitationChance::Fraction),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenWeatherProvider {
        OpenWeatherProvider::with_base_url("test-api-key".into(), Duration::from_secs(5), &server.uri())
            .unwrap()
    }

    #[tokio::test]
    async fn parses_hourly_records() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .and(query_param("lat", "35.6619"))
            .and(query_param("lon", "139.7041"))
            .and(query_param("appid", "test-api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "hourly": [
                    {"dt": 1706497200, "temp": 8.5, "pop": 0.2},
                    {"dt": 1706500800, "temp": 9.0}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = provider(&server).hourly(35.6619, 139.7041).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].time, RecordTime::Epoch(1706497200));
        assert_eq!(records[0].temperature, 8.5);
        assert_eq!(records[0].precipitation, Some(PrecipitationChance::Fraction(0.2)));
        assert_eq!(records[1].precipitation, None);
    }

    #[tokio::test]
    async fn missing_hourly_section_is_empty() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let records = provider(&server).hourly(35.0, 139.0).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn server_error_is_a_data_source_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/3.0/onecall"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider(&server).hourly(35.0, 139.0).await.unwrap_err();
        assert!(matches!(err, BroadcastError::DataSource(_)));
    }
}
