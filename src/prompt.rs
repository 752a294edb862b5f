//! Prompt templates and the small bits of text processing around them:
//! endpoint extraction from model output and speech-input sanitization.

use serde::Deserialize;

/// How to pull the endpoint out of the model's response text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtractMode {
    /// The endpoint is the span between a single `**...**` marker pair.
    #[default]
    Marked,
    /// The whole trimmed response is the endpoint.
    Trimmed,
}

/// First-attempt prompt: lists the endpoint shapes the model may choose from
/// and the formatting rules for its reply.
pub fn initial_endpoint_prompt(question: &str) -> String {
    format!(
        r#"You are an expert on the CoinGecko API. Choose the single best endpoint to answer the user's question, from these shapes:

- /simple/price?ids={{coin}}&vs_currencies={{currency}}
- /coins/{{coin}}/market_chart?vs_currency={{currency}}&days={{days}}
- /coins/{{coin}}/market_chart/range?vs_currency={{currency}}&from={{timestamp}}&to={{timestamp}}
- /coins/{{coin}}/ohlc?vs_currency={{currency}}&days={{days}}
- /coins/markets?vs_currency={{currency}}
- /exchange_rates
- /global

IMPORTANT: whenever the question asks for averages, highs, lows or history, use /coins/{{coin}}/market_chart with both required parameters: vs_currency (usd) and days (the period).

Reply with ONLY the complete endpoint including all parameters, without the base URL, wrapped in double asterisks like **/endpoint?params**, to answer:
"{question}""#
    )
}

/// Second-attempt prompt: tells the model what already failed and asks for a
/// different endpoint.
pub fn fallback_endpoint_prompt(question: &str, failed_endpoints: &[String]) -> String {
    format!(
        r#"The previous endpoint(s) failed: {failed}.
Choose a different valid CoinGecko endpoint to answer: "{question}".
Reply with ONLY the complete endpoint without the base URL, wrapped in double asterisks like **/endpoint?params**."#,
        failed = failed_endpoints.join(", ")
    )
}

/// Final prompt: turn the raw API payload into a conversational answer.
pub fn answer_prompt(question: &str, market_data: &serde_json::Value) -> String {
    format!(
        r#"The user asked: "{question}". Based on this data from the CoinGecko API: {market_data}, answer in a relaxed, fun, clear way, in the first person."#
    )
}

/// Extract the endpoint from model output according to `mode`.
///
/// Returns `None` when nothing usable is found: no marker pair (or an empty
/// span) in `Marked` mode, an empty response in `Trimmed` mode.
pub fn extract_endpoint(text: &str, mode: ExtractMode) -> Option<String> {
    match mode {
        ExtractMode::Marked => {
            let start = text.find("**")?;
            let rest = &text[start + 2..];
            let end = rest.find("**")?;
            let span = rest[..end].trim();
            (!span.is_empty()).then(|| span.to_string())
        }
        ExtractMode::Trimmed => {
            let trimmed = text.trim().replace('`', "");
            (!trimmed.is_empty()).then_some(trimmed)
        }
    }
}

/// Prepare answer text for the speech-synthesis service: drop every
/// non-ASCII character and flatten newlines to spaces. ASCII-only input
/// without newlines passes through untouched.
pub fn sanitize_speech_text(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\n' | '\r' => Some(' '),
            c if c.is_ascii() => Some(c),
            _ => None,
        })
        .collect()
}
