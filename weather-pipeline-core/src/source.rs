use std::{fmt::Debug, time::Duration};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::ApiConfig;

/// Upstream that supplies raw current-weather documents.
#[async_trait]
pub trait WeatherSource: Send + Sync + Debug {
    /// One readiness check. `false` means "not yet", not a hard failure.
    async fn probe(&self) -> Result<bool>;

    /// Fetch the current-weather document as untyped JSON.
    async fn fetch(&self) -> Result<serde_json::Value>;
}

/// OpenWeather current-weather endpoint for a single city.
#[derive(Debug, Clone)]
pub struct OpenWeatherSource {
    url: String,
    city: String,
    api_key: String,
    http: Client,
}

impl OpenWeatherSource {
    pub fn new(
        api: &ApiConfig,
        city: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .build()
            .context("Failed to build HTTP client for OpenWeather")?;

        Ok(Self {
            url: join_url(&api.base_url, &api.endpoint),
            city: city.into(),
            api_key: api_key.into(),
            http,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    // No `units` parameter: temperatures come back in Kelvin.
    fn request(&self) -> reqwest::RequestBuilder {
        self.http
            .get(&self.url)
            .query(&[("q", self.city.as_str()), ("appid", self.api_key.as_str())])
    }
}

#[async_trait]
impl WeatherSource for OpenWeatherSource {
    async fn probe(&self) -> Result<bool> {
        match self.request().send().await {
            Ok(res) if res.status().is_success() => Ok(true),
            Ok(res) => {
                debug!(status = %res.status(), "Weather API not ready");
                Ok(false)
            }
            Err(err) => {
                warn!(error = %err, "Weather API readiness probe could not connect");
                Ok(false)
            }
        }
    }

    async fn fetch(&self) -> Result<serde_json::Value> {
        let res = self
            .request()
            .send()
            .await
            .context("Failed to send request to OpenWeather (current weather)")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("Failed to read OpenWeather current response body")?;

        debug!(%status, body = %truncate_body(&body), "OpenWeather response");

        if !status.is_success() {
            return Err(anyhow!(
                "OpenWeather current request failed with status {}: {}",
                status,
                truncate_body(&body),
            ));
        }

        serde_json::from_str(&body).context("Failed to parse OpenWeather current JSON")
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

fn truncate_body(body: &str) -> String {
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
    fn joins_base_and_endpoint() {
        assert_eq!(
            join_url("https://api.openweathermap.org/", "/data/2.5/weather"),
            "https://api.openweathermap.org/data/2.5/weather"
        );
        assert_eq!(join_url("http://localhost:8080", "weather"), "http://localhost:8080/weather");
    }

    #[test]
    fn source_uses_configured_endpoint() {
        let api = ApiConfig::default();
        let source = OpenWeatherSource::new(&api, "ahmedabad", "KEY").unwrap();
        assert_eq!(source.url(), "https://api.openweathermap.org/data/2.5/weather");
    }

    #[test]
    fn request_carries_city_and_key_but_no_units() {
        let source = OpenWeatherSource::new(&ApiConfig::default(), "ahmedabad", "KEY").unwrap();
        let req = source.request().build().unwrap();
        let query = req.url().query().unwrap_or_default();
        assert!(query.contains("q=ahmedabad"));
        assert!(query.contains("appid=KEY"));
        assert!(!query.contains("units"));
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(500);
        let out = truncate_body(&body);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let body = "é".repeat(150);
        let out = truncate_body(&body);
        assert!(out.ends_with("..."));
    }

    #[tokio::test]
    async fn probe_reports_not_ready_when_unreachable() {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..ApiConfig::default()
        };
        let source = OpenWeatherSource::new(&api, "ahmedabad", "KEY").unwrap();
        assert!(!source.probe().await.unwrap());
    }

    #[tokio::test]
    async fn slow_upstream_hits_request_timeout() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept, then never answer.
        let server = tokio::spawn(async move {
            let (_conn, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let api = ApiConfig {
            base_url: format!("http://{addr}"),
            timeout_secs: 1,
            ..ApiConfig::default()
        };
        let source = OpenWeatherSource::new(&api, "ahmedabad", "KEY").unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), source.fetch())
            .await
            .expect("request outlived its timeout")
            .unwrap_err();
        assert!(err.to_string().contains("Failed to send request"));

        server.abort();
    }

    #[tokio::test]
    async fn fetch_fails_when_unreachable() {
        let api = ApiConfig {
            base_url: "http://127.0.0.1:9".into(),
            ..ApiConfig::default()
        };
        let source = OpenWeatherSource::new(&api, "ahmedabad", "KEY").unwrap();
        let err = source.fetch().await.unwrap_err();
        assert!(err.to_string().contains("Failed to send request"));
    }
}
