//! HTTP implementation of `tempo_query::LiveTier`: the query binary's view
//! of one replica zone's ingester fleet. A networked stand-in for what an
//! in-process deployment would wire as a direct `Arc<PartitionConsumer>`
//! call, the same way `tempo_log::LocalFileLog` stands in for a networked
//! broker client.

use async_trait::async_trait;
use tempo_proto::{Span, TenantId, TraceId};
use tempo_query::{LiveError, LiveTier};

/// One zone: a set of ingester addresses, one per partition range they
/// serve. `route` maps a partition to the address that owns it.
pub struct HttpLiveTier {
    client: reqwest::Client,
    addresses: Vec<String>,
}

impl HttpLiveTier {
    pub fn new(addresses: Vec<String>) -> Self {
        HttpLiveTier {
            client: reqwest::Client::new(),
            addresses,
        }
    }

    fn route(&self, partition: u32) -> Option<&str> {
        if self.addresses.is_empty() {
            return None;
        }
        let idx = (partition as usize) % self.addresses.len();
        Some(self.addresses[idx].as_str())
    }
}

#[async_trait]
impl LiveTier for HttpLiveTier {
    async fn lookup_trace(
        &self,
        tenant: &TenantId,
        partition: u32,
        trace_id: &TraceId,
    ) -> Result<Vec<Span>, LiveError> {
        let address = self.route(partition).ok_or(LiveError::Unavailable)?;
        let url = format!(
            "http://{address}/internal/live/lookup?tenant={}&partition={partition}&trace_id={trace_id}",
            tenant.as_str(),
        );
        fetch(&self.client, &url).await
    }

    async fn scan_range(
        &self,
        tenant: &TenantId,
        partition: u32,
        start: u64,
        end: u64,
    ) -> Result<Vec<Span>, LiveError> {
        let address = self.route(partition).ok_or(LiveError::Unavailable)?;
        let url = format!(
            "http://{address}/internal/live/scan?tenant={}&partition={partition}&start={start}&end={end}",
            tenant.as_str(),
        );
        fetch(&self.client, &url).await
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<Vec<Span>, LiveError> {
    let resp = client
        .get(url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
        .map_err(|_| LiveError::Unavailable)?;

    if resp.status() == reqwest::StatusCode::GATEWAY_TIMEOUT {
        return Err(LiveError::Timeout);
    }
    if !resp.status().is_success() {
        return Err(LiveError::Unavailable);
    }

    resp.json::<Vec<Span>>().await.map_err(|_| LiveError::Unavailable)
}
