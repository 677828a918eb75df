use relaychat_shared::constants::{
    DEFAULT_HOST, DEFAULT_OTP_EXPIRY_SECS, DEFAULT_OTP_LENGTH, DEFAULT_PORT, MAX_FRAME_BYTES,
    MAX_OTP_EXPIRY_SECS,
};
use relaychat_shared::error::RelayError;
use serde::Deserialize;

/// Relay configuration loaded from config.toml with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to. Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on. Default: 12345
    #[serde(default = "default_port")]
    pub port: u16,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Seconds before an issued OTP expires and is reissued, 1..=86400.
    /// Default: 10
    #[serde(default = "default_otp_expiry_secs")]
    pub otp_expiry_secs: u64,
    /// Digits per OTP. Default: 6
    #[serde(default = "default_otp_length")]
    pub otp_length: usize,
    /// Compare the echoed OTP against the issued one. When false only the
    /// expiry window is checked. Default: true
    #[serde(default = "default_verify_otp_value")]
    pub verify_otp_value: bool,
    /// Wrong OTP echoes, across reissues, before the registration is
    /// abandoned. Default: 3
    #[serde(default = "default_max_otp_attempts")]
    pub max_otp_attempts: u32,
    /// Maximum concurrently served connections. Default: 1024
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum bytes per newline-delimited frame. Default: 65536
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Protocol violations tolerated per connection before it is closed.
    /// 0 disables the limit. Default: 0
    #[serde(default)]
    pub max_protocol_violations: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_otp_expiry_secs() -> u64 {
    DEFAULT_OTP_EXPIRY_SECS
}
fn default_otp_length() -> usize {
    DEFAULT_OTP_LENGTH
}
fn default_verify_otp_value() -> bool {
    true
}
fn default_max_otp_attempts() -> u32 {
    3
}
fn default_max_connections() -> usize {
    1024
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            otp_expiry_secs: default_otp_expiry_secs(),
            otp_length: default_otp_length(),
            verify_otp_value: default_verify_otp_value(),
            max_otp_attempts: default_max_otp_attempts(),
            max_connections: default_max_connections(),
            max_frame_bytes: default_max_frame_bytes(),
            max_protocol_violations: 0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from TOML file with environment variable overrides.
    ///
    /// Reads `config.toml` from CWD (or the path in `CONFIG_PATH`). A missing
    /// `config.toml` falls back to defaults; a missing `CONFIG_PATH` target is
    /// an error.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        match std::env::var("CONFIG_PATH") {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path)?;
                Self::from_toml_str(&contents)
            }
            Err(_) => match std::fs::read_to_string("config.toml") {
                Ok(contents) => Self::from_toml_str(&contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let mut config = Self::default();
                    config.apply_env_overrides()?;
                    config.validate()?;
                    Ok(config)
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ServerConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., PORT=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("PORT") {
            self.port = val
                .parse()
                .map_err(|_| format!("invalid PORT value: {val}"))?;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("OTP_EXPIRY_SECS") {
            self.otp_expiry_secs = val
                .parse()
                .map_err(|_| format!("invalid OTP_EXPIRY_SECS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("OTP_LENGTH") {
            self.otp_length = val
                .parse()
                .map_err(|_| format!("invalid OTP_LENGTH value: {val}"))?;
        }
        if let Ok(val) = std::env::var("VERIFY_OTP_VALUE") {
            self.verify_otp_value = val
                .parse()
                .map_err(|_| format!("invalid VERIFY_OTP_VALUE value: {val}"))?;
        }
        if let Ok(val) = std::env::var("MAX_OTP_ATTEMPTS") {
            self.max_otp_attempts = val
                .parse()
                .map_err(|_| format!("invalid MAX_OTP_ATTEMPTS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("MAX_CONNECTIONS") {
            self.max_connections = val
                .parse()
                .map_err(|_| format!("invalid MAX_CONNECTIONS value: {val}"))?;
        }
        if let Ok(val) = std::env::var("MAX_FRAME_BYTES") {
            self.max_frame_bytes = val
                .parse()
                .map_err(|_| format!("invalid MAX_FRAME_BYTES value: {val}"))?;
        }
        if let Ok(val) = std::env::var("MAX_PROTOCOL_VIOLATIONS") {
            self.max_protocol_violations = val
                .parse()
                .map_err(|_| format!("invalid MAX_PROTOCOL_VIOLATIONS value: {val}"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.otp_length == 0 || self.otp_length > 9 {
            return Err(format!("otp_length must be 1..=9, got {}", self.otp_length).into());
        }
        if !(1..=MAX_OTP_EXPIRY_SECS).contains(&self.otp_expiry_secs) {
            return Err(format!(
                "otp_expiry_secs must be 1..={MAX_OTP_EXPIRY_SECS}, got {}",
                self.otp_expiry_secs
            )
            .into());
        }
        if self.max_otp_attempts == 0 {
            return Err("max_otp_attempts must be positive".into());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be positive".into());
        }
        if self.max_frame_bytes == 0 {
            return Err("max_frame_bytes must be positive".into());
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The OTP validity window. Fails for values `validate` would reject.
    pub fn otp_expiry(&self) -> Result<chrono::TimeDelta, RelayError> {
        i64::try_from(self.otp_expiry_secs)
            .ok()
            .filter(|secs| (1..=MAX_OTP_EXPIRY_SECS as i64).contains(secs))
            .and_then(chrono::TimeDelta::try_seconds)
            .ok_or_else(|| {
                RelayError::Config(format!(
                    "otp_expiry_secs out of range: {}",
                    self.otp_expiry_secs
                ))
            })
    }
}
