//! Small helpers shared by the HTTP collaborators.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// Per-request timeout used when the config does not set one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder().timeout(timeout).build()
}

/// Send `request`, require a 2xx status and return the body text.
///
/// Callers flatten the error with [`describe`] into the error kind of their
/// pipeline stage.
pub async fn send_for_body(request: RequestBuilder, what: &str) -> Result<String> {
    let res = request
        .send()
        .await
        .with_context(|| format!("Failed to send request to {what}"))?;

    let status = res.status();
    let body = res
        .text()
        .await
        .with_context(|| format!("Failed to read {what} response body"))?;

    if !status.is_success() {
        bail!("{what} request failed with status {status}: {}", truncate_body(&body));
    }

    Ok(body)
}

/// The whole context chain on one line.
pub fn describe(err: anyhow::Error) -> String {
    format!("{err:#}")
}

pub async fn send_for_json<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let body = send_for_body(request, what).await?;
    serde_json::from_str(&body).with_context(|| format!("Failed to parse {what} JSON"))
}

pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.len() > MAX {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &body[..end])
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let body = "気".repeat(100);
        let truncated = truncate_body(&body);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() <= 203);

        assert_eq!(truncate_body("short"), "short");
    }

    #[tokio::test]
    async fn parse_failure_keeps_context_chain() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let err = send_for_json::<serde_json::Value>(client.get(server.uri()), "Test API")
            .await
            .unwrap_err();

        assert_eq!(err.chain().count(), 2);
        let text = describe(err);
        assert!(text.starts_with("Failed to parse Test API JSON: "));
        assert!(text.contains("expected value"));
    }

    #[tokio::test]
    async fn error_status_includes_truncated_body() {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let err = send_for_body(client.get(server.uri()), "Test API").await.unwrap_err();
        assert_eq!(describe(err), "Test API request failed with status 503 Service Unavailable: busy");
    }
}
