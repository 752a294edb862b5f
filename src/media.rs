//! Extended pipeline: answer text → speech → hosted upload → talking-avatar
//! video. Strictly sequential and non-retrying; each stage failure is logged
//! and turned into `None`, which short-circuits the stages after it. Partial
//! results are kept — there is no cleanup of files already written.

use crate::config::MediaConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::prompt::sanitize_speech_text;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

/// What the pipeline managed to produce. `video_path` set implies the
/// earlier stages succeeded too.
#[derive(Debug, Default)]
pub struct MediaArtifacts {
    pub audio_path: Option<PathBuf>,
    pub audio_url: Option<String>,
    pub video_path: Option<PathBuf>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    voice: &'a str,
}

#[derive(Serialize)]
struct VideoRequest<'a> {
    avatar_image_url: &'a str,
    audio_url: &'a str,
}

pub struct MediaPipeline<'a> {
    http: HttpClient,
    cfg: &'a MediaConfig,
}

impl<'a> MediaPipeline<'a> {
    pub fn new(cfg: &'a MediaConfig) -> Result<Self> {
        Ok(Self {
            http: HttpClient::new("coinsage/0.1.0")?,
            cfg,
        })
    }

    /// Run every stage the previous one allows, reporting partial success.
    pub async fn run(&self, answer_text: &str) -> MediaArtifacts {
        let mut artifacts = MediaArtifacts::default();
        let run_id = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();

        artifacts.audio_path = match self.synthesize_speech(answer_text, &run_id).await {
            Ok(path) => {
                info!(path = %path.display(), "audio saved");
                Some(path)
            }
            Err(e) => {
                warn!("speech synthesis failed: {e}");
                None
            }
        };

        if let Some(audio_path) = &artifacts.audio_path {
            artifacts.audio_url = match self.upload_audio(audio_path).await {
                Ok(url) => {
                    info!(%url, "audio uploaded");
                    Some(url)
                }
                Err(e) => {
                    warn!("audio upload failed: {e}");
                    None
                }
            };
        }

        if let Some(audio_url) = &artifacts.audio_url {
            artifacts.video_path = match self.generate_video(audio_url, &run_id).await {
                Ok(path) => {
                    info!(path = %path.display(), "video saved");
                    Some(path)
                }
                Err(e) => {
                    warn!("video generation failed: {e}");
                    None
                }
            };
        }

        artifacts
    }

    /// Synthesize speech for the answer and download the result locally.
    /// The service wants plain ASCII without line breaks.
    async fn synthesize_speech(&self, text: &str, run_id: &str) -> Result<PathBuf> {
        let clean = sanitize_speech_text(text);
        if clean.trim().is_empty() {
            return Err(Error::parse("nothing speakable left after sanitization"));
        }

        let body = serde_json::to_string(&SpeechRequest {
            text: &clean,
            voice: &self.cfg.voice,
        })
        .map_err(|e| Error::parse(format!("serialize speech request: {e}")))?;

        let bearer = format!("Bearer {}", self.cfg.api_token);
        let response = self
            .http
            .post_json_raw(&self.cfg.speech_url, &body, &[("Authorization", bearer.as_str())])
            .await?;
        let audio_url = extract_url(&response, &["audio_url", "url", "output"])
            .ok_or_else(|| Error::parse(format!("no audio URL in speech response: {response}")))?;

        tokio::fs::create_dir_all(&self.cfg.output_dir).await?;
        let dest = self.cfg.output_dir.join(format!("answer_{run_id}.mp3"));
        self.http.download(&audio_url, &dest).await?;
        Ok(dest)
    }

    /// Push the local audio file to the hosting service, returning its
    /// public URL for the video stage.
    async fn upload_audio(&self, path: &PathBuf) -> Result<String> {
        let response = self
            .http
            .upload_file(&self.cfg.upload_url, "file", path, &[])
            .await?;
        extract_url(&response, &["url", "audio_url"])
            .ok_or_else(|| Error::parse(format!("no URL in upload response: {response}")))
    }

    /// Ask the avatar service to animate the static image with the audio,
    /// then download the finished video.
    async fn generate_video(&self, audio_url: &str, run_id: &str) -> Result<PathBuf> {
        let body = serde_json::to_string(&VideoRequest {
            avatar_image_url: &self.cfg.avatar_image_url,
            audio_url,
        })
        .map_err(|e| Error::parse(format!("serialize video request: {e}")))?;

        let bearer = format!("Bearer {}", self.cfg.api_token);
        let response = self
            .http
            .post_json_raw(&self.cfg.video_url, &body, &[("Authorization", bearer.as_str())])
            .await?;
        let video_url = extract_url(&response, &["video_url", "result_url", "url", "output"])
            .ok_or_else(|| Error::parse(format!("no video URL in response: {response}")))?;

        let dest = self.cfg.output_dir.join(format!("answer_{run_id}.mp4"));
        self.http.download(&video_url, &dest).await?;
        Ok(dest)
    }
}

/// Find the first string value under any of `keys`, looking at the top level
/// and one level down under a `data` wrapper. Hosted services disagree on the
/// field name; the URL is all we need.
fn extract_url(response_body: &str, keys: &[&str]) -> Option<String> {
    let value: Value = serde_json::from_str(response_body).ok()?;
    for scope in [Some(&value), value.get("data")] {
        let Some(scope) = scope else { continue };
        for key in keys {
            if let Some(url) = scope.get(*key).and_then(Value::as_str) {
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
            // Some services return the URL as a single-element array
            if let Some(url) = scope
                .get(*key)
                .and_then(Value::as_array)
                .and_then(|a| a.first())
                .and_then(Value::as_str)
            {
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            }
        }
    }
    None
}
