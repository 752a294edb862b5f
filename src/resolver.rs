//! Endpoint selection with bounded retry.
//!
//! The model picks a CoinGecko endpoint for the question; if the fetch fails,
//! one fallback prompt embedding the failure log is tried. Exhaustion yields
//! `None` ("no data"), never an error: only the LLM transport itself can
//! fail the call.

use crate::config::ResolverConfig;
use crate::error::Result;
use crate::llm::TextModel;
use crate::prompt;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Recorded in the failure log when the model's reply held no endpoint at
/// all, so the fallback prompt can distinguish it from an HTTP failure.
pub const EXTRACTION_FAILED: &str = "(no endpoint extracted)";

/// Seam over the market-data API so the retry logic is testable offline.
#[async_trait]
pub trait MarketSource: Send + Sync {
    async fn fetch(&self, endpoint: &str) -> Result<Value>;
}

/// Resolve a question to market data in at most `cfg.max_attempts` fetches.
///
/// Attempt 0 uses the initial prompt; later attempts use the fallback prompt
/// carrying every endpoint (or sentinel) that failed so far. A reply without
/// an extractable endpoint skips the fetch entirely. The first 2xx body wins.
pub async fn resolve_market_data(
    question: &str,
    model: &dyn TextModel,
    source: &dyn MarketSource,
    cfg: &ResolverConfig,
) -> Result<Option<Value>> {
    let mut failed_endpoints: Vec<String> = Vec::new();

    for attempt in 0..cfg.max_attempts {
        let prompt = if attempt == 0 {
            prompt::initial_endpoint_prompt(question)
        } else {
            prompt::fallback_endpoint_prompt(question, &failed_endpoints)
        };

        let response = model.generate(&prompt).await?;

        let Some(endpoint) = prompt::extract_endpoint(&response, cfg.extract_mode) else {
            warn!(attempt, "model reply contained no endpoint");
            failed_endpoints.push(EXTRACTION_FAILED.to_string());
            continue;
        };
        debug!(attempt, %endpoint, "model selected endpoint");

        match source.fetch(&endpoint).await {
            Ok(data) => return Ok(Some(data)),
            Err(e) => {
                warn!(attempt, %endpoint, error = %e, "market data query failed");
                failed_endpoints.push(endpoint);
                if attempt + 1 < cfg.max_attempts {
                    info!("asking the model for an alternative endpoint");
                    sleep(Duration::from_millis(cfg.retry_delay_ms)).await;
                }
            }
        }
    }

    Ok(None)
}

/// Phrase the fetched data as a conversational answer. No retry here: an LLM
/// failure propagates to the caller.
pub async fn compose_answer(
    question: &str,
    market_data: &Value,
    model: &dyn TextModel,
) -> Result<String> {
    model
        .generate(&prompt::answer_prompt(question, market_data))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::prompt::ExtractMode;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cfg() -> ResolverConfig {
        ResolverConfig {
            max_attempts: 2,
            retry_delay_ms: 0,
            extract_mode: ExtractMode::Marked,
        }
    }

    /// Scripted model: hands out canned replies in order, recording prompts.
    struct ScriptedModel {
        replies: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(replies: &[&str]) -> Self {
            let mut rs: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
            rs.reverse();
            Self {
                replies: Mutex::new(rs),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop()
                .expect("model called more times than scripted"))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    /// Counting source: fails the first `fail_first` fetches with a 404.
    struct FlakySource {
        fail_first: usize,
        fetches: AtomicUsize,
        endpoints: Mutex<Vec<String>>,
    }

    impl FlakySource {
        fn new(fail_first: usize) -> Self {
            Self {
                fail_first,
                fetches: AtomicUsize::new(0),
                endpoints: Mutex::new(Vec::new()),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketSource for FlakySource {
        async fn fetch(&self, endpoint: &str) -> Result<Value> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            self.endpoints.lock().unwrap().push(endpoint.to_string());
            if n < self.fail_first {
                Err(Error::api_with_status("api.coingecko.com", "not found", 404))
            } else {
                Ok(serde_json::json!({ "attempt": n }))
            }
        }
    }

    #[tokio::test]
    async fn first_attempt_success_makes_one_model_call_and_one_fetch() {
        let model = ScriptedModel::new(&["**/simple/price?ids=bitcoin&vs_currencies=usd**"]);
        let source = FlakySource::new(0);

        let data = resolve_market_data("btc price?", &model, &source, &test_cfg())
            .await
            .unwrap();

        assert_eq!(data, Some(serde_json::json!({ "attempt": 0 })));
        assert_eq!(model.calls(), 1);
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(
            source.endpoints.lock().unwrap()[0],
            "/simple/price?ids=bitcoin&vs_currencies=usd"
        );
    }

    #[tokio::test]
    async fn second_attempt_returns_second_body() {
        let model = ScriptedModel::new(&["**/bad/endpoint**", "**/global**"]);
        let source = FlakySource::new(1);

        let data = resolve_market_data("global stats?", &model, &source, &test_cfg())
            .await
            .unwrap();

        assert_eq!(data, Some(serde_json::json!({ "attempt": 1 })));
        assert_eq!(source.fetch_count(), 2);

        // Fallback prompt names the failed endpoint
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains("/bad/endpoint"));
    }

    #[tokio::test]
    async fn exhaustion_returns_no_data_after_exactly_two_fetches() {
        let model = ScriptedModel::new(&["**/bad/one**", "**/bad/two**"]);
        let source = FlakySource::new(10);

        let data = resolve_market_data("anything", &model, &source, &test_cfg())
            .await
            .unwrap();

        assert_eq!(data, None);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn extraction_failure_skips_fetch_and_records_sentinel() {
        let model = ScriptedModel::new(&["I don't know which endpoint.", "still no idea"]);
        let source = FlakySource::new(0);

        let data = resolve_market_data("???", &model, &source, &test_cfg())
            .await
            .unwrap();

        assert_eq!(data, None);
        assert_eq!(source.fetch_count(), 0);

        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[1].contains(EXTRACTION_FAILED));
    }

    #[tokio::test]
    async fn mixed_failure_log_keeps_order() {
        let model = ScriptedModel::new(&["no endpoint here", "**/global**"]);
        let source = FlakySource::new(0);

        let data = resolve_market_data("global?", &model, &source, &test_cfg())
            .await
            .unwrap();

        assert_eq!(data, Some(serde_json::json!({ "attempt": 0 })));
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn answer_formatter_passes_data_through() {
        let model = ScriptedModel::new(&["Bitcoin is at $64k, nice!"]);
        let data = serde_json::json!({ "bitcoin": { "usd": 64000 } });

        let answer = compose_answer("btc?", &data, &model).await.unwrap();

        assert_eq!(answer, "Bitcoin is at $64k, nice!");
        let prompts = model.prompts.lock().unwrap();
        assert!(prompts[0].contains("64000"));
        assert!(prompts[0].contains("btc?"));
    }
}
