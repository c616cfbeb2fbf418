//! Bridge configuration
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Environment variables override file values:
//!
//! | variable | field |
//! |---|---|
//! | `HOOKBRIDGE_CHANNEL` | `channel_name` |
//! | `HOOKBRIDGE_MAILBOX` | `mailbox_name` |
//! | `HOOKBRIDGE_CONNECT_TIMEOUT_MS` | `connect_timeout_ms` |
//! | `HOOKBRIDGE_PULL_TIMEOUT_MS` | `pull_timeout_ms` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::settings::HookSettings;
use crate::{
    DEFAULT_CHANNEL_NAME, DEFAULT_MAILBOX_NAME, MAX_BUFFER_SIZE, NAMED_PIPE_BUFFER_SIZE,
    PIPE_CONNECTION_TIMEOUT_MS,
};

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be parsed
    #[error("invalid value '{value}' for {key}")]
    InvalidOverride {
        /// Environment variable name
        key: &'static str,
        /// Rejected value
        value: String,
    },

    /// A name field is empty
    #[error("{0} must not be empty")]
    EmptyName(&'static str),

    /// Pipe buffer size is zero or larger than the mailbox
    #[error("pipe_buffer_size must be between 1 and {max}, found {found}")]
    InvalidPipeBufferSize {
        /// Rejected size
        found: usize,
        /// Largest accepted size
        max: usize,
    },
}

/// Runtime configuration shared by the controller and target sides
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Well-known return channel name
    pub channel_name: String,
    /// Well-known shared mailbox name
    pub mailbox_name: String,
    /// Size of each read from the return channel
    pub pipe_buffer_size: usize,
    /// How long a target-side write waits for the channel to appear
    pub connect_timeout_ms: u64,
    /// Bound on the controller's pull; `None` waits indefinitely
    pub pull_timeout_ms: Option<u64>,
    /// Module exporting the hook procedures; `None` means the module hosting this crate
    pub callback_module: Option<String>,
    /// Hook to install, for front-ends driven entirely by configuration
    pub hook: Option<HookSettings>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel_name: DEFAULT_CHANNEL_NAME.to_string(),
            mailbox_name: DEFAULT_MAILBOX_NAME.to_string(),
            pipe_buffer_size: NAMED_PIPE_BUFFER_SIZE,
            connect_timeout_ms: PIPE_CONNECTION_TIMEOUT_MS,
            pull_timeout_ms: None,
            callback_module: None,
            hook: None,
        }
    }
}

impl BridgeConfig {
    /// Load from `path` (or defaults), apply environment overrides, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML document without overrides or validation
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `HOOKBRIDGE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(name) = lookup("HOOKBRIDGE_CHANNEL") {
            self.channel_name = name;
        }
        if let Some(name) = lookup("HOOKBRIDGE_MAILBOX") {
            self.mailbox_name = name;
        }
        if let Some(value) = lookup("HOOKBRIDGE_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = parse_millis("HOOKBRIDGE_CONNECT_TIMEOUT_MS", value)?;
        }
        if let Some(value) = lookup("HOOKBRIDGE_PULL_TIMEOUT_MS") {
            self.pull_timeout_ms = Some(parse_millis("HOOKBRIDGE_PULL_TIMEOUT_MS", value)?);
        }
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_name.is_empty() {
            return Err(ConfigError::EmptyName("channel_name"));
        }
        if self.mailbox_name.is_empty() {
            return Err(ConfigError::EmptyName("mailbox_name"));
        }
        if self.pipe_buffer_size == 0 || self.pipe_buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::InvalidPipeBufferSize {
                found: self.pipe_buffer_size,
                max: MAX_BUFFER_SIZE,
            });
        }
        Ok(())
    }

    /// Target-side connect wait
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Controller-side pull bound
    pub fn pull_timeout(&self) -> Option<Duration> {
        self.pull_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_millis(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { key, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{CommunicationMode, HookClass};
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.channel_name, "hookbridge");
        assert_eq!(config.mailbox_name, "hookbridge-mailbox");
        assert_eq!(config.pipe_buffer_size, 1024);
        assert_eq!(config.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(config.pull_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_parse_full_document() {
        let config = BridgeConfig::from_toml_str(
            r#"
            channel_name = "automation"
            pipe_buffer_size = 512
            pull_timeout_ms = 2500
            callback_module = "automation_hooks.dll"

            [hook]
            callback_name = "GetMessageProc"
            callback_class = "get_message"
            mode = "two_way"
            "#,
        )
        .unwrap();

        assert_eq!(config.channel_name, "automation");
        assert_eq!(config.mailbox_name, "hookbridge-mailbox");
        assert_eq!(config.pipe_buffer_size, 512);
        assert_eq!(config.pull_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(
            config.callback_module.as_deref(),
            Some("automation_hooks.dll")
        );

        let hook = config.hook.unwrap();
        assert_eq!(hook.callback_name, "GetMessageProc");
        assert_eq!(hook.callback_class, HookClass::GetMessage);
        assert_eq!(hook.target, None);
        assert_eq!(hook.mode, CommunicationMode::TwoWay);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = BridgeConfig::from_toml_str("chanel_name = \"typo\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connect_timeout_ms = 750").unwrap();

        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.connect_timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_from_missing_file() {
        let result = BridgeConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("HOOKBRIDGE_CHANNEL", "override-channel"),
            ("HOOKBRIDGE_PULL_TIMEOUT_MS", " 100 "),
        ]
        .into_iter()
        .collect();

        let mut config = BridgeConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.channel_name, "override-channel");
        assert_eq!(config.mailbox_name, "hookbridge-mailbox");
        assert_eq!(config.pull_timeout(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_invalid_override() {
        let mut config = BridgeConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "HOOKBRIDGE_CONNECT_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(matches!(
            result,
            Err(ConfigError::InvalidOverride {
                key: "HOOKBRIDGE_CONNECT_TIMEOUT_MS",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_pipe_buffer_size() {
        let config = BridgeConfig {
            pipe_buffer_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPipeBufferSize { found: 0, .. })
        ));

        let config = BridgeConfig {
            pipe_buffer_size: MAX_BUFFER_SIZE + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_empty_names() {
        let config = BridgeConfig {
            channel_name: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyName("channel_name"))
        ));
    }
}
