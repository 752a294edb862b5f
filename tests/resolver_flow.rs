//! End-to-end resolver flow through the public API, with scripted
//! implementations of the two service seams.

use async_trait::async_trait;
use coinsage::config::ResolverConfig;
use coinsage::error::{Error, Result};
use coinsage::llm::TextModel;
use coinsage::prompt::{self, ExtractMode};
use coinsage::resolver::{self, MarketSource};
use serde_json::{Value, json};
use std::sync::Mutex;

struct CannedModel {
    replies: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

impl CannedModel {
    fn new(replies: &[&str]) -> Self {
        let mut rs: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
        rs.reverse();
        Self {
            replies: Mutex::new(rs),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl TextModel for CannedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| Error::api("canned", "out of scripted replies"))
    }

    fn model(&self) -> &str {
        "canned"
    }
}

struct RecordingSource {
    responses: Mutex<Vec<Result<Value>>>,
    endpoints: Mutex<Vec<String>>,
}

impl RecordingSource {
    fn new(responses: Vec<Result<Value>>) -> Self {
        let mut rs = responses;
        rs.reverse();
        Self {
            responses: Mutex::new(rs),
            endpoints: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl MarketSource for RecordingSource {
    async fn fetch(&self, endpoint: &str) -> Result<Value> {
        self.endpoints.lock().unwrap().push(endpoint.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(Error::api("recording", "out of scripted responses")))
    }
}

fn cfg() -> ResolverConfig {
    ResolverConfig {
        max_attempts: 2,
        retry_delay_ms: 0,
        extract_mode: ExtractMode::Marked,
    }
}

#[tokio::test]
async fn bitcoin_price_question_resolves_on_first_attempt() {
    // The worked flow: Portuguese question, marked endpoint reply, one GET.
    let model = CannedModel::new(&[
        "The best choice is **/simple/price?ids=bitcoin&vs_currencies=usd**",
        "Bitcoin is sitting at $64,000 right now — not bad at all!",
    ]);
    let source = RecordingSource::new(vec![Ok(json!({ "bitcoin": { "usd": 64000 } }))]);

    let question = "Qual o preço do bitcoin em dólar?";
    let data = resolver::resolve_market_data(question, &model, &source, &cfg())
        .await
        .unwrap()
        .expect("data");

    assert_eq!(
        source.endpoints.lock().unwrap().as_slice(),
        ["/simple/price?ids=bitcoin&vs_currencies=usd"]
    );

    let answer = resolver::compose_answer(question, &data, &model)
        .await
        .unwrap();
    assert!(answer.contains("64,000"));

    // First prompt was the initial one, not the fallback
    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts[0], prompt::initial_endpoint_prompt(question));
}

#[tokio::test]
async fn http_failure_then_success_uses_second_body() {
    let model = CannedModel::new(&["**/coins/btc/ohlc**", "**/simple/price?ids=bitcoin&vs_currencies=usd**"]);
    let source = RecordingSource::new(vec![
        Err(Error::api_with_status("api.coingecko.com", "bad request", 400)),
        Ok(json!({ "second": true })),
    ]);

    let data = resolver::resolve_market_data("btc?", &model, &source, &cfg())
        .await
        .unwrap();

    assert_eq!(data, Some(json!({ "second": true })));
    assert_eq!(source.endpoints.lock().unwrap().len(), 2);

    // Second prompt is the fallback and names the failed endpoint
    let prompts = model.prompts.lock().unwrap();
    assert!(prompts[1].contains("/coins/btc/ohlc"));
    assert_ne!(prompts[1], prompt::initial_endpoint_prompt("btc?"));
}

#[tokio::test]
async fn no_data_after_two_failures_and_no_extra_requests() {
    let model = CannedModel::new(&["**/nope**", "**/still/nope**"]);
    let source = RecordingSource::new(vec![
        Err(Error::api_with_status("api.coingecko.com", "not found", 404)),
        Err(Error::api_with_status("api.coingecko.com", "not found", 404)),
    ]);

    let data = resolver::resolve_market_data("?", &model, &source, &cfg())
        .await
        .unwrap();

    assert_eq!(data, None);
    assert_eq!(source.endpoints.lock().unwrap().len(), 2);
    // Both scripted replies consumed, none left over
    assert!(model.replies.lock().unwrap().is_empty());
}

#[tokio::test]
async fn configurable_depth_is_respected() {
    let model = CannedModel::new(&["**/a**", "**/b**", "**/c**"]);
    let source = RecordingSource::new(vec![
        Err(Error::api_with_status("api.coingecko.com", "err", 500)),
        Err(Error::api_with_status("api.coingecko.com", "err", 500)),
        Ok(json!({ "third": true })),
    ]);
    let cfg = ResolverConfig {
        max_attempts: 3,
        retry_delay_ms: 0,
        extract_mode: ExtractMode::Marked,
    };

    let data = resolver::resolve_market_data("?", &model, &source, &cfg)
        .await
        .unwrap();

    assert_eq!(data, Some(json!({ "third": true })));
    assert_eq!(source.endpoints.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn trimmed_mode_accepts_bare_endpoint_replies() {
    let model = CannedModel::new(&["  /global\n"]);
    let source = RecordingSource::new(vec![Ok(json!({ "ok": true }))]);
    let cfg = ResolverConfig {
        max_attempts: 2,
        retry_delay_ms: 0,
        extract_mode: ExtractMode::Trimmed,
    };

    let data = resolver::resolve_market_data("global?", &model, &source, &cfg)
        .await
        .unwrap();

    assert_eq!(data, Some(json!({ "ok": true })));
    assert_eq!(source.endpoints.lock().unwrap().as_slice(), ["/global"]);
}
