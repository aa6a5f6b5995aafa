//! Runtime configuration for chat-relay.
//!
//! Configuration is environment-sourced (with `.env` support via dotenvy),
//! matching the deployment model of the browser front end it serves. The CLI
//! only carries operational overrides.

use clap::Parser;

/// Default upstream endpoint (DeepSeek's production API).
pub const DEFAULT_BASE_URL: &str = "https://api.deepseek.com";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "deepseek-chat";

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 5000;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "chat-relay",
    about = "HTTP relay for an OpenAI-compatible chat completion API"
)]
pub struct Cli {
    /// HTTP listen port (overrides the PORT environment variable).
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream API key. `None` disables all chat endpoints (they return
    /// 500), but the server still starts and serves /api/health.
    pub api_key: Option<String>,

    /// Upstream base URL.
    pub base_url: String,

    /// Model identifier sent with every upstream request.
    pub model: String,

    /// HTTP listen port.
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// Recognized variables: `DEEPSEEK_API_KEY`, `DEEPSEEK_BASE_URL`,
    /// `DEEPSEEK_MODEL`, `PORT`. Missing or unparsable values fall back to
    /// defaults; a missing API key is reported at call time, not here.
    pub fn from_env() -> Self {
        let api_key = std::env::var("DEEPSEEK_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        let base_url = std::env::var("DEEPSEEK_BASE_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("DEEPSEEK_MODEL")
            .ok()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            api_key,
            base_url,
            model,
            port,
        }
    }
}
