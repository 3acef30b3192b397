//! Loki `query_range` log source.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::logs::LogSource;
use super::DetectError;

const DEFAULT_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
struct LokiResponse {
    status: String,
    data: LokiData,
}

#[derive(Debug, Deserialize)]
struct LokiData {
    #[serde(default)]
    result: Vec<LokiStream>,
}

#[derive(Debug, Deserialize)]
struct LokiStream {
    /// `[timestamp_ns, line]` pairs, newest first
    #[serde(default)]
    values: Vec<(String, String)>,
}

pub struct LokiLogSource {
    client: reqwest::Client,
    address: String,
    limit: u32,
    lookback: ChronoDuration,
}

impl LokiLogSource {
    pub fn new(address: impl Into<String>, lookback_hours: i64) -> Result<Self, DetectError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(DetectError::Loki)?;
        Ok(Self {
            client,
            address: address.into().trim_end_matches('/').to_string(),
            limit: DEFAULT_LIMIT,
            lookback: ChronoDuration::hours(lookback_hours),
        })
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Last `limit` lines of one pod, oldest first.
    pub async fn query(
        &self,
        namespace: &str,
        pod: &str,
        end: DateTime<Utc>,
    ) -> Result<String, DetectError> {
        let query = format!(r#"{{namespace="{namespace}",pod="{pod}"}}"#);
        let start = end - self.lookback;
        let url = format!("{}/loki/api/v1/query_range", self.address);
        let limit = self.limit.to_string();
        let start = start.to_rfc3339_opts(SecondsFormat::Nanos, true);
        let end = end.to_rfc3339_opts(SecondsFormat::Nanos, true);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", query.as_str()),
                ("limit", limit.as_str()),
                ("direction", "backward"),
                ("start", start.as_str()),
                ("end", end.as_str()),
            ])
            .send()
            .await
            .map_err(DetectError::Loki)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DetectError::LokiQuery(format!(
                "loki returned status {}",
                status.as_u16()
            )));
        }

        let body: LokiResponse = response.json().await.map_err(DetectError::Loki)?;
        if body.status != "success" {
            return Err(DetectError::LokiQuery(format!(
                "loki query failed with status: {}",
                body.status
            )));
        }

        let mut lines: Vec<String> = body
            .data
            .result
            .into_iter()
            .flat_map(|stream| stream.values.into_iter().map(|(_, line)| line))
            .collect();
        lines.reverse();
        debug!(namespace, pod, lines = lines.len(), "Fetched logs from Loki");
        Ok(lines.join("\n"))
    }
}

#[async_trait]
impl LogSource for LokiLogSource {
    fn name(&self) -> &'static str {
        "loki"
    }

    async fn fetch(&self, pod: &Pod) -> Result<String, DetectError> {
        self.query(&pod.namespace().unwrap_or_default(), &pod.name_any(), Utc::now())
            .await
    }
}
