//! Relay server configuration
//!
//! Resolution order, lowest to highest precedence: built-in [`Default`] →
//! optional TOML file (`--config` / `PARLOR_CONFIG`) → `PARLOR_*` environment
//! variables → CLI flags. `validate()` clamps or rejects anything a listener
//! would otherwise fail to bind against.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bind host shared by all listeners (e.g. "0.0.0.0").
    pub bind_host: String,
    /// TCP control-plane port.
    pub tcp_port: u16,
    /// UDP voice media port.
    pub udp_voice_port: u16,
    /// UDP video media port.
    pub udp_video_port: u16,
    /// WebSocket gateway port.
    pub ws_port: u16,
    /// Path to the credential store JSON file.
    pub users_file: String,
    /// Require explicit registration; if false, an unknown username at
    /// login is auto-registered with the supplied password (§4.1).
    pub require_registration: bool,
    /// Idle timeout in seconds for authenticated TCP connections with no
    /// frame in either direction.
    pub idle_timeout_secs: u64,
    /// Maximum individual file size in bytes.
    pub max_file_size: u64,
    /// Maximum individual chunk size in bytes, measured after base64 decode.
    pub max_chunk_size: u64,
    /// Maximum `file_meta` frames per user per rolling 60-second window.
    pub file_meta_rate_limit: u32,
    /// UDP liveness window in seconds; endpoints idle longer are evicted.
    pub udp_liveness_secs: u64,
    /// UDP liveness sweep interval in seconds.
    pub udp_sweep_interval_secs: u64,
    /// Per-source-username UDP packet rate limit, packets per second.
    pub udp_rate_limit_pps: u32,
    /// `tracing-subscriber` env-filter directive, overridable by `RUST_LOG`.
    pub log_level: String,
}

impl RelayConfig {
    /// Floor for the idle timeout, so a misconfigured 0 doesn't evict
    /// connections immediately after every frame.
    const MIN_IDLE_TIMEOUT_SECS: u64 = 10;
    /// Floor for the UDP liveness window.
    const MIN_UDP_LIVENESS_SECS: u64 = 5;

    /// Validate and clamp configuration values, logging any correction made.
    ///
    /// Returns an error for values that cannot be sensibly clamped (e.g. an
    /// unparseable bind host), which the caller should treat as a fatal
    /// startup error.
    pub fn validate(&mut self) -> Result<(), String> {
        if self.idle_timeout_secs < Self::MIN_IDLE_TIMEOUT_SECS {
            tracing::warn!(
                "idle_timeout_secs {} below minimum, clamping to {}",
                self.idle_timeout_secs,
                Self::MIN_IDLE_TIMEOUT_SECS
            );
            self.idle_timeout_secs = Self::MIN_IDLE_TIMEOUT_SECS;
        }
        if self.udp_liveness_secs < Self::MIN_UDP_LIVENESS_SECS {
            self.udp_liveness_secs = Self::MIN_UDP_LIVENESS_SECS;
        }
        if self.udp_sweep_interval_secs == 0 || self.udp_sweep_interval_secs > self.udp_liveness_secs {
            self.udp_sweep_interval_secs = (self.udp_liveness_secs / 2).max(1);
        }
        if self.max_chunk_size > self.max_file_size {
            return Err(format!(
                "max_chunk_size ({}) cannot exceed max_file_size ({})",
                self.max_chunk_size, self.max_file_size
            ));
        }

        for (name, port) in [
            ("tcp_port", self.tcp_port),
            ("udp_voice_port", self.udp_voice_port),
            ("udp_video_port", self.udp_video_port),
            ("ws_port", self.ws_port),
        ] {
            if port == 0 {
                return Err(format!("{name} must be a nonzero port"));
            }
        }
        if format!("{}:{}", self.bind_host, self.tcp_port)
            .parse::<SocketAddr>()
            .is_err()
        {
            return Err(format!("invalid bind host '{}'", self.bind_host));
        }

        Ok(())
    }

    /// TCP control-plane bind address.
    pub fn tcp_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.tcp_port)
    }

    /// UDP voice listener bind address.
    pub fn udp_voice_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_voice_port)
    }

    /// UDP video listener bind address.
    pub fn udp_video_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.udp_video_port)
    }

    /// WebSocket gateway bind address.
    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.ws_port)
    }

    /// Load configuration, overlaying (in increasing precedence) an optional
    /// TOML file and `PARLOR_*` environment variables onto the defaults.
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| format!("failed to read config file '{path}': {e}"))?;
            config = toml::from_str(&contents)
                .map_err(|e| format!("failed to parse config file '{path}': {e}"))?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PARLOR_BIND_HOST") {
            self.bind_host = v;
        }
        set_from_env("PARLOR_TCP_PORT", &mut self.tcp_port);
        set_from_env("PARLOR_UDP_VOICE_PORT", &mut self.udp_voice_port);
        set_from_env("PARLOR_UDP_VIDEO_PORT", &mut self.udp_video_port);
        set_from_env("PARLOR_WS_PORT", &mut self.ws_port);
        if let Ok(v) = std::env::var("PARLOR_USERS_FILE") {
            self.users_file = v;
        }
        if let Ok(v) = std::env::var("PARLOR_REQUIRE_REGISTRATION") {
            self.require_registration = parse_bool(&v, self.require_registration);
        }
        set_from_env("PARLOR_IDLE_TIMEOUT_SECS", &mut self.idle_timeout_secs);
        set_from_env("PARLOR_MAX_FILE_SIZE", &mut self.max_file_size);
        set_from_env("PARLOR_MAX_CHUNK_SIZE", &mut self.max_chunk_size);
        set_from_env("PARLOR_FILE_META_RATE_LIMIT", &mut self.file_meta_rate_limit);
        set_from_env("PARLOR_UDP_LIVENESS_SECS", &mut self.udp_liveness_secs);
        set_from_env("PARLOR_UDP_SWEEP_INTERVAL_SECS", &mut self.udp_sweep_interval_secs);
        set_from_env("PARLOR_UDP_RATE_LIMIT_PPS", &mut self.udp_rate_limit_pps);
        if let Ok(v) = std::env::var("RUST_LOG") {
            self.log_level = v;
        } else if let Ok(v) = std::env::var("PARLOR_LOG_LEVEL") {
            self.log_level = v;
        }
    }
}

fn set_from_env<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key) {
        if let Ok(parsed) = v.parse() {
            *slot = parsed;
        } else {
            tracing::warn!("ignoring unparseable {key}='{v}'");
        }
    }
}

fn parse_bool(v: &str, default: bool) -> bool {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            tcp_port: 8765,
            udp_voice_port: 8766,
            udp_video_port: 8767,
            ws_port: 8080,
            users_file: "users_db.json".to_string(),
            require_registration: false,
            idle_timeout_secs: 300,
            max_file_size: 20 * 1024 * 1024,
            max_chunk_size: 1_500_000,
            file_meta_rate_limit: 5,
            udp_liveness_secs: 20,
            udp_sweep_interval_secs: 10,
            udp_rate_limit_pps: 100,
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let mut config = RelayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_idle_timeout_clamped() {
        let mut config = RelayConfig::default();
        config.idle_timeout_secs = 1;
        config.validate().unwrap();
        assert_eq!(config.idle_timeout_secs, RelayConfig::MIN_IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = RelayConfig::default();
        config.tcp_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chunk_larger_than_file_rejected() {
        let mut config = RelayConfig::default();
        config.max_chunk_size = config.max_file_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sweep_interval_defaults_from_liveness() {
        let mut config = RelayConfig::default();
        config.udp_sweep_interval_secs = 0;
        config.validate().unwrap();
        assert!(config.udp_sweep_interval_secs > 0);
        assert!(config.udp_sweep_interval_secs <= config.udp_liveness_secs);
    }

    #[test]
    fn test_addr_helpers() {
        let config = RelayConfig::default();
        assert_eq!(config.tcp_addr(), "0.0.0.0:8765");
        assert_eq!(config.ws_addr(), "0.0.0.0:8080");
    }
}
