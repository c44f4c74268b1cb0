use std::env;

use anyhow::{Context, Result};

const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_MODEL: &str = "qwen3-max";
const DEFAULT_PORT: u16 = 3001;

/// Process configuration, read once at startup. `.env` values are loaded
/// first; real environment variables win over the file.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Missing .env is fine; the variables may come from the environment.
        let _ = dotenv::dotenv();

        let api_key = env::var("DASHSCOPE_API_KEY")
            .context("DASHSCOPE_API_KEY is not set; put it in the environment or a .env file")?;

        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("PORT is not a valid port number: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            api_key,
            model: env::var("DASHSCOPE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            base_url: env::var("DASHSCOPE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        })
    }
}
