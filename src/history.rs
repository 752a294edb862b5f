//! Optional consultation history, one JSON file per answered question under
//! `~/.coinsage/history/`. Off by default.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn coinsage_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".coinsage")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consultation {
    pub timestamp: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    /// Spend estimates per consultation. Neither hosted service reports cost
    /// on this tier, so both stay at zero for now.
    pub llm_cost_usd: f64,
    pub data_api_cost_usd: f64,
}

impl Consultation {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            question: question.into(),
            answer: answer.into(),
            llm_cost_usd: 0.0,
            data_api_cost_usd: 0.0,
        }
    }

    /// Write the record under `dir`, creating it as needed.
    pub fn save_under(&self, dir: &PathBuf) -> Result<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let filename = format!("{}.json", self.timestamp.format("%Y%m%dT%H%M%S%3f"));
        let path = dir.join(filename);
        std::fs::write(&path, serde_json::to_string_pretty(self).map_err(|e| {
            crate::error::Error::parse(format!("serialize consultation: {e}"))
        })?)?;
        Ok(path)
    }

    /// Write to the default history location (or `dir_override`).
    pub fn save(&self, dir_override: Option<&PathBuf>) -> Result<PathBuf> {
        let default_dir = coinsage_dir().join("history");
        self.save_under(dir_override.unwrap_or(&default_dir))
    }
}
