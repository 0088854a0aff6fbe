//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Credentials are usually supplied through the environment by the hosting platform;
//! both the host's setting names (`DiscordBotToken`, `AzureAPIKey`, ...) and conventional
//! upper-case names are accepted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP trigger server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Discord gateway settings.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Remote completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Keep-alive timer settings.
    #[serde(default)]
    pub timer: TimerConfig,
}

/// HTTP bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port for the HTTP trigger (default 7071).
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_server_bind")]
    pub bind: String,
}

fn default_server_port() -> u16 {
    7071
}

fn default_server_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            bind: default_server_bind(),
        }
    }
}

/// Which inbound messages get a reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyPolicyMode {
    /// Reply only when the bot account is explicitly mentioned.
    #[default]
    Mention,

    /// Reply to every non-bot message in `discord.channelId`.
    Channel,
}

/// Gateway capabilities requested at identify time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Intent {
    Guilds,
    GuildMessages,
    DirectMessages,
    MessageContent,
}

impl Intent {
    /// Discord gateway intent bit.
    pub fn bits(self) -> u64 {
        match self {
            Intent::Guilds => 1 << 0,
            Intent::GuildMessages => 1 << 9,
            Intent::DirectMessages => 1 << 12,
            Intent::MessageContent => 1 << 15,
        }
    }
}

/// Combined intent bitfield for the identify payload.
pub fn intents_bits(intents: &[Intent]) -> u64 {
    intents.iter().fold(0, |acc, i| acc | i.bits())
}

fn default_intents() -> Vec<Intent> {
    vec![Intent::GuildMessages, Intent::MessageContent]
}

/// Discord bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// Bot token. Overridden by DiscordBotToken / DISCORD_BOT_TOKEN env when set.
    pub bot_token: Option<String>,

    /// Channel watched when replyPolicy is "channel". Overridden by DiscordClientID / DISCORD_CHANNEL_ID env.
    pub channel_id: Option<String>,

    /// "mention" (default) or "channel".
    #[serde(default)]
    pub reply_policy: ReplyPolicyMode,

    /// Intents sent with identify (default guildMessages + messageContent).
    #[serde(default = "default_intents")]
    pub intents: Vec<Intent>,

    /// REST API base override (default https://discord.com/api/v10).
    pub api_base: Option<String>,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel_id: None,
            reply_policy: ReplyPolicyMode::default(),
            intents: default_intents(),
            api_base: None,
        }
    }
}

/// Azure OpenAI chat-completion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// Resource endpoint, e.g. https://my-resource.openai.azure.com. Overridden by AzureAIEndpoint / AZURE_OPENAI_ENDPOINT env.
    pub endpoint: Option<String>,

    /// API key. Overridden by AzureAPIKey / AZURE_OPENAI_API_KEY env.
    pub api_key: Option<String>,

    /// Deployment (model) name (default "gpt-4o").
    #[serde(default = "default_deployment")]
    pub deployment: String,

    /// api-version query parameter.
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// System instruction sent before the user turn. Empty by default.
    #[serde(default)]
    pub system_prompt: String,
}

fn default_deployment() -> String {
    "gpt-4o".to_string()
}

fn default_api_version() -> String {
    "2024-06-01".to_string()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: default_deployment(),
            api_version: default_api_version(),
            system_prompt: String::new(),
        }
    }
}

/// Keep-alive timer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    /// Seconds between ensure-started ticks (default 300).
    #[serde(default = "default_timer_interval")]
    pub interval_secs: u64,
}

fn default_timer_interval() -> u64 {
    300
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_timer_interval(),
        }
    }
}

/// First non-empty (trimmed) value among the given env vars.
fn env_first(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the Discord bot token: env overrides config.
pub fn resolve_discord_token(config: &Config) -> Option<String> {
    env_first(&["DiscordBotToken", "DISCORD_BOT_TOKEN"])
        .or_else(|| non_empty(config.discord.bot_token.as_ref()))
}

/// Resolve the watched channel id (channel reply policy): env overrides config.
pub fn resolve_discord_channel_id(config: &Config) -> Option<String> {
    env_first(&["DiscordClientID", "DISCORD_CHANNEL_ID"])
        .or_else(|| non_empty(config.discord.channel_id.as_ref()))
}

/// Resolve the completion endpoint: env overrides config.
pub fn resolve_completion_endpoint(config: &Config) -> Option<String> {
    env_first(&["AzureAIEndpoint", "AZURE_OPENAI_ENDPOINT"])
        .or_else(|| non_empty(config.completion.endpoint.as_ref()))
}

/// Resolve the completion API key: env overrides config.
pub fn resolve_completion_api_key(config: &Config) -> Option<String> {
    env_first(&["AzureAPIKey", "AZURE_OPENAI_API_KEY"])
        .or_else(|| non_empty(config.completion.api_key.as_ref()))
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".parley").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
