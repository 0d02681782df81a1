//! Settings types with compiled defaults.

use chime_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Default greeting sent in reply to `get_welcome`.
pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Welcome to Chime! Ask me anything and I will do my best to help.";

/// Smallest accepted connection timing value in milliseconds.
pub const MIN_TIMING_MS: u64 = 1_000;
/// Largest accepted connection timing value in milliseconds.
pub const MAX_TIMING_MS: u64 = 3_600_000;

/// Root settings document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChimeSettings {
    /// Listener and connection timing.
    pub server: ServerSettings,
    /// Text generation service.
    pub generation: GenerationSettings,
    /// Speech synthesis service.
    pub synthesis: SynthesisSettings,
    /// Conversation database.
    pub storage: StorageSettings,
    /// Log output.
    pub logging: LoggingSettings,
    /// Greeting text for new conversations.
    pub welcome_message: String,
}

impl Default for ChimeSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            generation: GenerationSettings::default(),
            synthesis: SynthesisSettings::default(),
            storage: StorageSettings::default(),
            logging: LoggingSettings::default(),
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_string(),
        }
    }
}

impl ChimeSettings {
    /// Reject settings the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        let g = &self.generation;
        if g.app_id.trim().is_empty() || g.api_key.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "generation.appId and generation.apiKey are required".into(),
            ));
        }
        if g.api_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("generation.apiUrl is required".into()));
        }
        let s = &self.synthesis;
        if s.api_key.trim().is_empty() || s.voice.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "synthesis.apiKey and synthesis.voice are required".into(),
            ));
        }
        if s.api_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue("synthesis.apiUrl is required".into()));
        }
        let srv = &self.server;
        if srv.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueCapacity must be positive".into(),
            ));
        }
        for (name, value) in [
            ("server.readIdleTimeoutMs", srv.read_idle_timeout_ms),
            ("server.writeTimeoutMs", srv.write_timeout_ms),
            ("server.pingIntervalMs", srv.ping_interval_ms),
            ("server.sendTimeoutMs", srv.send_timeout_ms),
        ] {
            if !(MIN_TIMING_MS..=MAX_TIMING_MS).contains(&value) {
                return Err(SettingsError::InvalidValue(format!(
                    "{name} ({value}) must be between {MIN_TIMING_MS} and {MAX_TIMING_MS}"
                )));
            }
        }
        if srv.ping_interval_ms >= srv.read_idle_timeout_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.pingIntervalMs ({}) must be below server.readIdleTimeoutMs ({})",
                srv.ping_interval_ms, srv.read_idle_timeout_ms
            )));
        }
        if self.welcome_message.trim().is_empty() {
            return Err(SettingsError::InvalidValue("welcomeMessage must not be empty".into()));
        }
        Ok(())
    }
}

/// Listener and per-connection timing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`/ws`, `/health`, `/metrics`).
    pub port: u16,
    /// Upgrades beyond this many live connections are refused.
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Inbound inactivity that closes a connection.
    pub read_idle_timeout_ms: u64,
    /// Deadline for a single outbound write.
    pub write_timeout_ms: u64,
    /// Outbound silence after which a ping is sent.
    pub ping_interval_ms: u64,
    /// Timeout for out-of-band sends through the registry.
    pub send_timeout_ms: u64,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for background tasks.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1000,
            outbound_queue_capacity: 256,
            read_idle_timeout_ms: 60_000,
            write_timeout_ms: 10_000,
            ping_interval_ms: 30_000,
            send_timeout_ms: 5_000,
            max_message_size: 1024 * 1024,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Streaming text generation service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationSettings {
    /// Application id, substituted into `{app_id}` in the URL.
    pub app_id: String,
    /// Bearer token.
    pub api_key: String,
    /// Completion endpoint.
    pub api_url: String,
    /// Whole-request timeout.
    pub timeout_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_key: String::new(),
            api_url: "https://dashscope.aliyuncs.com/api/v1/apps/{app_id}/completion".to_string(),
            timeout_ms: 60_000,
        }
    }
}

/// Speech synthesis service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SynthesisSettings {
    /// Bearer token.
    pub api_key: String,
    /// Synthesis endpoint.
    pub api_url: String,
    /// Voice identifier.
    pub voice: String,
    /// Audio container format.
    pub format: String,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Volume, 0-100.
    pub volume: i32,
    /// Relative speech rate.
    pub speech_rate: i32,
    /// Relative pitch.
    pub pitch_rate: i32,
    /// Whole-request timeout.
    pub timeout_ms: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: String::new(),
            voice: "longxiaochun".to_string(),
            format: "mp3".to_string(),
            sample_rate: 22_050,
            volume: 50,
            speech_rate: 0,
            pitch_rate: 0,
            timeout_ms: 30_000,
        }
    }
}

/// Conversation database and retention.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Database file path (relative paths resolve under `~/.chime`).
    pub db_path: String,
    /// History older than this many days is pruned.
    pub retention_days: u32,
    /// Conversations idle this long are marked ended.
    pub session_timeout_secs: u64,
    /// Interval between maintenance passes.
    pub maintenance_interval_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "chime.db".to_string(),
            retention_days: 30,
            session_timeout_secs: 1800,
            maintenance_interval_secs: 3600,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
