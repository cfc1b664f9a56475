//! Bridge configuration.

use std::path::{Path, PathBuf};

use plswipl_engine::EngineConfig;
use serde::{Deserialize, Serialize};

use crate::encoding::ServerEncoding;
use crate::error::BridgeError;

// Validation constants
const MIN_INFERENCES: u64 = 1_000;
const MAX_INFERENCES: u64 = 10_000_000_000;
const MIN_TERM_DEPTH: usize = 16;
const MAX_TERM_DEPTH: usize = 10_000;

/// Configuration for a [`Bridge`](crate::Bridge), usually read from TOML.
///
/// ```toml
/// server_encoding = "UTF8"
/// log_filter = "plswipl=debug"
///
/// [engine]
/// boot_file = "/etc/plswipl/boot.pl"
/// library = ["/etc/plswipl/lib/strings.pl"]
/// max_inferences = 1000000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host text encoding.
    pub server_encoding: String,

    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,

    pub engine: EngineSettings,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            server_encoding: "UTF8".to_string(),
            log_filter: "plswipl=info".to_string(),
            engine: EngineSettings::default(),
        }
    }
}

/// Engine bootstrap and resource limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Program loaded after the built-in boot library.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_file: Option<PathBuf>,

    /// Library files loaded after the boot file, in order.
    pub library: Vec<PathBuf>,

    /// Inferences allowed per solution step.
    pub max_inferences: u64,

    /// Deepest term that can be copied out of the engine.
    pub max_term_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            boot_file: None,
            library: Vec::new(),
            max_inferences: engine.max_inferences,
            max_term_depth: engine.max_term_depth,
        }
    }
}

impl EngineSettings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_inferences: self.max_inferences,
            max_term_depth: self.max_term_depth,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, BridgeError> {
        let config: Self = toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check limits and the encoding name.
    pub fn validate(&self) -> Result<(), BridgeError> {
        ServerEncoding::from_name(&self.server_encoding)?;

        let inferences = self.engine.max_inferences;
        if !(MIN_INFERENCES..=MAX_INFERENCES).contains(&inferences) {
            return Err(BridgeError::Config(format!(
                "max_inferences must be between {MIN_INFERENCES} and {MAX_INFERENCES} (got {inferences})"
            )));
        }

        let depth = self.engine.max_term_depth;
        if !(MIN_TERM_DEPTH..=MAX_TERM_DEPTH).contains(&depth) {
            return Err(BridgeError::Config(format!(
                "max_term_depth must be between {MIN_TERM_DEPTH} and {MAX_TERM_DEPTH} (got {depth})"
            )));
        }

        if let Some(path) = &self.engine.boot_file {
            if path.as_os_str().is_empty() {
                return Err(BridgeError::Config("boot_file cannot be empty".to_string()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_toml_str("").unwrap();
        assert_eq!(config, BridgeConfig::default());
        assert_eq!(config.engine.engine_config(), EngineConfig::default());
    }

    #[test]
    fn test_partial_engine_table() {
        let config = BridgeConfig::from_toml_str(
            "server_encoding = \"LATIN1\"\n[engine]\nmax_inferences = 5000\nlibrary = [\"lib.pl\"]\n",
        )
        .unwrap();
        assert_eq!(config.engine.max_inferences, 5000);
        assert_eq!(config.engine.library, vec![PathBuf::from("lib.pl")]);
        assert_eq!(config.engine.max_term_depth, EngineConfig::default().max_term_depth);
    }

    #[test]
    fn test_limits_are_checked() {
        let err = BridgeConfig::from_toml_str("[engine]\nmax_inferences = 10\n").unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"invalid configuration: max_inferences must be between 1000 and 10000000000 (got 10)"
        );
        assert!(BridgeConfig::from_toml_str("server_encoding = \"EBCDIC\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log_filter = \"plswipl=trace\"").unwrap();
        let config = BridgeConfig::load(file.path()).unwrap();
        assert_eq!(config.log_filter, "plswipl=trace");
    }
}
