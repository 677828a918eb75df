use relaychat_shared::constants::{DEFAULT_HOST, DEFAULT_PORT, MAX_FRAME_BYTES};
use serde::Deserialize;

/// Client configuration loaded from client.toml with env var overrides.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Relay host. Default: "127.0.0.1"
    #[serde(default = "default_host")]
    pub host: String,
    /// Relay port. Default: 12345
    #[serde(default = "default_port")]
    pub port: u16,
    /// Tracing log level. Default: "warn"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Maximum bytes per incoming frame. Default: 65536
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Ask the user to type the OTP instead of echoing it automatically.
    #[serde(default)]
    pub manual_otp: bool,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_max_frame_bytes() -> usize {
    MAX_FRAME_BYTES
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_frame_bytes: default_max_frame_bytes(),
            manual_otp: false,
        }
    }
}

impl ClientConfig {
    /// Load from `client.toml` in CWD (or `CLIENT_CONFIG_PATH`), falling back
    /// to defaults when `client.toml` is absent.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        match std::env::var("CLIENT_CONFIG_PATH") {
            Ok(path) => {
                let contents = std::fs::read_to_string(&path)?;
                Self::from_toml_str(&contents)
            }
            Err(_) => match std::fs::read_to_string("client.toml") {
                Ok(contents) => Self::from_toml_str(&contents),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    let mut config = Self::default();
                    config.apply_env_overrides()?;
                    Ok(config)
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    pub fn from_toml_str(toml_str: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: ClientConfig = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `RELAY_HOST`, `RELAY_PORT`, `LOG_LEVEL` and `MANUAL_OTP`.
    pub fn apply_env_overrides(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        if let Ok(val) = std::env::var("RELAY_HOST") {
            self.host = val;
        }
        if let Ok(val) = std::env::var("RELAY_PORT") {
            self.port = val
                .parse()
                .map_err(|_| format!("invalid RELAY_PORT value: {val}"))?;
        }
        if let Ok(val) = std::env::var("LOG_LEVEL") {
            self.log_level = val;
        }
        if let Ok(val) = std::env::var("MANUAL_OTP") {
            self.manual_otp = val
                .parse()
                .map_err(|_| format!("invalid MANUAL_OTP value: {val}"))?;
        }
        Ok(())
    }

    pub fn relay_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
