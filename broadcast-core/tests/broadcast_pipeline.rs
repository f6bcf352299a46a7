//! Full broadcast run against mocked WeatherAPI, JMA and LINE endpoints.

use std::{sync::Arc, time::Duration};

use broadcast_core::{
    BroadcastOrchestrator, BroadcastReport, CalculatorVariant, Location, PrecipitationSource,
    User, WeatherCalculator,
    broadcast::LocationSummarizer,
    messaging::LineMessagingClient,
    provider::{jma::JmaClient, weatherapi::WeatherApiProvider},
    retry::RetryPolicy,
    store::JsonUserStore,
};
use chrono_tz::Asia::Tokyo;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn area_json() -> serde_json::Value {
    json!({
        "offices": {
            "130000": {"name": "東京都"},
            "140000": {"name": "神奈川県"}
        },
        "class10s": {
            "130010": {"name": "東京地方", "parent": "130000"},
            "140010": {"name": "東部", "parent": "140000"}
        },
        "class15s": {
            "130011": {"name": "東京", "parent": "130010"},
            "140011": {"name": "横浜・川崎", "parent": "140010"}
        },
        "class20s": {
            "1310100": {"name": "渋谷区", "parent": "130011"},
            "1413000": {"name": "川崎市", "parent": "140011"}
        }
    })
}

fn forecast_json(class10: &str, pops: [&str; 4]) -> serde_json::Value {
    json!([{
        "timeSeries": [
            {"timeDefines": [], "areas": []},
            {
                "timeDefines": [
                    "2026-02-02T00:00:00+09:00",
                    "2026-02-02T06:00:00+09:00",
                    "2026-02-02T12:00:00+09:00",
                    "2026-02-02T18:00:00+09:00"
                ],
                "areas": [{"area": {"code": class10}, "pops": pops}]
            }
        ]
    }])
}

fn hourly_json(temps: [f64; 4]) -> serde_json::Value {
    json!({
        "forecast": {"forecastday": [{"hour": [
            {"time": "2026-02-02 07:00", "temp_c": -5.0, "chance_of_rain": 0},
            {"time": "2026-02-02 09:00", "temp_c": temps[0], "chance_of_rain": 0},
            {"time": "2026-02-02 12:00", "temp_c": temps[1], "chance_of_rain": 0},
            {"time": "2026-02-02 15:00", "temp_c": temps[2], "chance_of_rain": 0},
            {"time": "2026-02-02 22:00", "temp_c": temps[3], "chance_of_rain": 0},
            {"time": "2026-02-02 23:00", "temp_c": 40.0, "chance_of_rain": 0}
        ]}]}
    })
}

#[tokio::test]
async fn split_source_broadcast_end_to_end() {
    let weather_server = MockServer::start().await;
    let jma_server = MockServer::start().await;
    let line_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast.json"))
        .and(query_param("q", "35.6619,139.7041"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_json([18.0, 25.46, 22.0, 19.0])))
        .expect(1)
        .mount(&weather_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast.json"))
        .and(query_param("q", "35.5308,139.703"))
        .respond_with(ResponseTemplate::new(200).set_body_json(hourly_json([8.04, 11.0, 10.0, 6.2])))
        .expect(1)
        .mount(&weather_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/bosai/common/const/area.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(area_json()))
        .expect(1)
        .mount(&jma_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bosai/forecast/data/forecast/130000.json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(forecast_json("130010", ["90", "10", "30", "70"])),
        )
        .mount(&jma_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/bosai/forecast/data/forecast/140000.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(forecast_json("140010", ["", "0", "20", "10"])),
        )
        .mount(&jma_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/v2/bot/message/push"))
        .and(body_partial_json(json!({"to": "U-blocked"})))
        .respond_with(ResponseTemplate::new(403).set_body_string("blocked"))
        .expect(2)
        .mount(&line_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/bot/message/push"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(3)
        .mount(&line_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = JsonUserStore::new(dir.path().join("users.json"));
    let shibuya = Location::new("渋谷区", 35.6619, 139.7041).unwrap();
    let kawasaki = Location::new("神奈川県川崎市", 35.5308, 139.703).unwrap();
    store.upsert("U1", shibuya.clone()).await.unwrap();
    store.upsert("U2", kawasaki).await.unwrap();
    store.upsert("U3", shibuya.clone()).await.unwrap();
    store.upsert("U-blocked", shibuya).await.unwrap();

    let summarizer = LocationSummarizer::new(
        Arc::new(WeatherApiProvider::with_base_url("KEY".into(), TIMEOUT, &weather_server.uri()).unwrap()),
        PrecipitationSource::Areas(Arc::new(
            JmaClient::with_base_url(TIMEOUT, &jma_server.uri()).unwrap(),
        )),
        WeatherCalculator::for_variant(Tokyo, CalculatorVariant::SplitSource),
    );
    let messaging =
        LineMessagingClient::with_base_url("TOKEN".into(), TIMEOUT, &line_server.uri()).unwrap();

    let report = BroadcastOrchestrator::new(Arc::new(store), summarizer, Arc::new(messaging))
        .with_retry(RetryPolicy::new(2, vec![Duration::ZERO]))
        .with_concurrency(2)
        .execute()
        .await
        .unwrap();

    assert_eq!(
        report,
        BroadcastReport {
            users: 4,
            groups: 2,
            delivered: 3,
            failed: 1,
            groups_skipped: 0,
            groups_not_started: 0,
        }
    );

    let pushes = line_server.received_requests().await.unwrap();
    let texts: Vec<(String, String)> = pushes
        .iter()
        .filter_map(|r| {
            let body: serde_json::Value = serde_json::from_slice(&r.body).ok()?;
            Some((body["to"].as_str()?.to_string(), body["messages"][0]["text"].as_str()?.to_string()))
        })
        .collect();

    let shibuya_text = &texts.iter().find(|(to, _)| to == "U1").unwrap().1;
    assert_eq!(
        shibuya_text,
        "おはよう U・x・U\n\
         渋谷区のお出かけ時のお天気をお知らせするよ☀️☔️☁️⛄️\n\
         \n\
         最高気温: 25.5℃\n\
         最低気温: 18.0℃\n\
         降水確率: 70%"
    );
    assert_eq!(&texts.iter().find(|(to, _)| to == "U3").unwrap().1, shibuya_text);

    let kawasaki_text = &texts.iter().find(|(to, _)| to == "U2").unwrap().1;
    assert!(kawasaki_text.contains("神奈川県川崎市のお出かけ時"));
    assert!(kawasaki_text.contains("最高気温: 11.0℃"));
    assert!(kawasaki_text.contains("最低気温: 6.2℃"));
    assert!(kawasaki_text.contains("降水確率: 20%"));
}

#[tokio::test]
async fn unreachable_weather_source_skips_every_group() {
    let weather_server = MockServer::start().await;
    let line_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/forecast.json"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&weather_server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&line_server)
        .await;

    let users = vec![
        User::new("U1", Location::new("札幌市", 43.0621, 141.3544).unwrap()),
        User::new("U2", Location::new("那覇市", 26.2124, 127.6809).unwrap()),
    ];
    let summarizer = LocationSummarizer::new(
        Arc::new(WeatherApiProvider::with_base_url("KEY".into(), TIMEOUT, &weather_server.uri()).unwrap()),
        PrecipitationSource::Hourly,
        WeatherCalculator::for_variant(Tokyo, CalculatorVariant::CombinedLocal),
    );
    let messaging =
        LineMessagingClient::with_base_url("TOKEN".into(), TIMEOUT, &line_server.uri()).unwrap();

    let report = BroadcastOrchestrator::new(
        Arc::new(broadcast_core::store::InMemoryUserStore::new(users)),
        summarizer,
        Arc::new(messaging),
    )
    .with_retry(RetryPolicy::no_retry())
    .execute()
    .await
    .unwrap();

    assert_eq!(report.delivered, 0);
    assert_eq!(report.failed, 2);
    assert_eq!(report.groups_skipped, 2);
}
