use crate::error::Result;
use crate::http::HttpClient;
use crate::resolver::MarketSource;
use async_trait::async_trait;
use tracing::debug;

pub const BASE_URL: &str = "https://api.coingecko.com/api/v3";

/// CoinGecko data client. The payload is opaque to the rest of the program:
/// whatever JSON comes back is handed to the answer formatter unprocessed.
pub struct GeckoClient {
    http: HttpClient,
    base_url: String,
    api_key: String,
}

impl GeckoClient {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("coinsage/0.1.0")?,
            base_url: base_url.unwrap_or_else(|| BASE_URL.into()),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MarketSource for GeckoClient {
    async fn fetch(&self, endpoint: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "querying CoinGecko");
        self.http
            .get_json(&url, &[("x-cg-demo-api-key", &self.api_key)])
            .await
    }
}
