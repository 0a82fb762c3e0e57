//! Client configuration

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the JGPT API, without a trailing slash.
    pub api_base: String,
    /// Directory holding client-side state (the persisted bearer token).
    pub data_dir: PathBuf,
    pub connect_timeout_secs: u64,
    pub default_persona: String,
    pub default_model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            api_base: env::var("JGPT_API_BASE")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".into()),
            data_dir: env::var("JGPT_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            connect_timeout_secs: env::var("JGPT_CONNECT_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(10),
            default_persona: env::var("JGPT_PERSONA").unwrap_or_else(|_| "powerbi".into()),
            default_model: env::var("JGPT_MODEL").unwrap_or_else(|_| "llama3.2".into()),
        })
    }
}
