use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::error::Result;

const USER_AGENT: &str = "Tintuc/0.1 (RSS Aggregator)";

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }

    /// GET the feed body. Non-2xx responses are errors.
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;

        debug!("Fetched {} bytes from {}", bytes.len(), url);
        Ok(bytes.to_vec())
    }
}
