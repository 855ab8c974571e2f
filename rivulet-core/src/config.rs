//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Deployment mode.
///
/// Governs how the registry treats duplicate stream names: a hard error in
/// production, a state-preserving hot swap in development.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Duplicate stream names are rejected.
    Production,
    /// Duplicate stream names hot-swap, keeping state.
    #[default]
    Development,
}

impl Mode {
    fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Settings read once when a [`Context`](crate::Context) is built.
///
/// Can be embedded in an application's own config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Duplicate-name policy for the state registry.
    pub mode: Mode,

    /// Run glitch detection on every derived stream built through the
    /// context and log what it finds.
    pub strict_glitches: bool,
}

impl Config {
    /// Load from `RIVULET_ENV` and `RIVULET_STRICT_GLITCHES`.
    ///
    /// Unset or unrecognised values fall back to the defaults.
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var("RIVULET_ENV")
                .map(|value| Mode::parse(&value))
                .unwrap_or_default(),
            strict_glitches: std::env::var("RIVULET_STRICT_GLITCHES")
                .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// Default settings with [`Mode::Production`].
    pub fn production() -> Self {
        Self {
            mode: Mode::Production,
            ..Self::default()
        }
    }

    /// Builder-style toggle for [`Config::strict_glitches`].
    pub fn with_strict_glitches(mut self, strict: bool) -> Self {
        self.strict_glitches = strict;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_development() {
        let config = Config::default();
        assert_eq!(config.mode, Mode::Development);
        assert!(!config.strict_glitches);
    }

    #[test]
    fn parses_mode_leniently() {
        assert_eq!(Mode::parse("Production"), Mode::Production);
        assert_eq!(Mode::parse(" prod "), Mode::Production);
        assert_eq!(Mode::parse("staging"), Mode::Development);
    }

    #[test]
    fn mode_serializes_lowercase() {
        let json = serde_json::to_string(&Config::production()).unwrap();
        assert_eq!(json, r#"{"mode":"production","strict_glitches":false}"#);
    }
}
