use crate::error::{Error, Result};
use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

/// Shared `reqwest` wrapper with uniform status handling.
///
/// Deliberately carries no retry policy of its own: the endpoint resolver is
/// the only component allowed to re-issue a failed request, so every call here
/// maps to exactly one request on the wire.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(180))
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;

        Ok(Self { client })
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut req = self.client.get(url).header(header::ACCEPT, "application/json");
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let resp = req.send().await.map_err(|e| Error::http(e.to_string()))?;
        let body = handle_response(resp).await?;
        serde_json::from_str(&body).map_err(|e| Error::parse(format!("JSON parse: {e}")))
    }

    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        let resp = self
            .build_post(url, body, headers)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        handle_response(resp).await
    }

    /// POST and hand back the live response so the caller can consume the body
    /// as a stream (SSE). The status line is checked before returning.
    pub async fn post_json_streaming(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let resp = self
            .build_post(url, body, headers)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        check_status(resp).await
    }

    /// Upload a local file as a multipart form, returning the response body.
    pub async fn upload_file(
        &self,
        url: &str,
        field: &str,
        path: &Path,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload.bin")
            .to_string();
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name);
        let form = reqwest::multipart::Form::new().part(field.to_string(), part);

        let mut req = self.client.post(url).multipart(form);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        let resp = req.send().await.map_err(|e| Error::http(e.to_string()))?;
        handle_response(resp).await
    }

    /// Download a remote file to a local path.
    pub async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::http(e.to_string()))?;
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await.map_err(|e| Error::http(e.to_string()))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }

    fn build_post(&self, url: &str, body: &str, headers: &[(&str, &str)]) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }
}

async fn handle_response(resp: reqwest::Response) -> Result<String> {
    let resp = check_status(resp).await?;
    resp.text().await.map_err(|e| Error::http(e.to_string()))
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    let url = resp.url().to_string();

    match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => Ok(resp),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            Err(Error::RateLimit {
                service: extract_domain(&url),
                retry_after_secs: retry_after,
            })
        }
        _ => {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::api_with_status(
                extract_domain(&url),
                body,
                status.as_u16(),
            ))
        }
    }
}

fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_extraction() {
        assert_eq!(
            extract_domain("https://api.coingecko.com/api/v3/global"),
            "api.coingecko.com"
        );
        assert_eq!(extract_domain("not a url"), "unknown");
    }
}
