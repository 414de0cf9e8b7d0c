// Copyright 2024 Cornell University
// released under MIT License

use std::path::Path;

use serde::Deserialize;

use crate::errors::ConfigError;

/// Everything that influences compilation besides the notation itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub emit: EmitConfig,
    #[serde(default)]
    pub arbitration: Vec<StateArbitration>,
}

/// Parameters of the generated program
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmitConfig {
    /// Go package name
    pub package: String,
    /// Capacity of every channel
    pub channel_depth: usize,
    /// Period of the global clock
    pub tick_interval_ms: u64,
    /// How long a worker with nothing enabled sleeps before re-checking
    pub poll_interval_ms: u64,
    /// Fixed RNG seed; when absent the program seeds from the current time
    pub seed: Option<i64>,
    /// Print every state change at runtime
    pub trace: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            package: "main".to_string(),
            channel_depth: 2,
            tick_interval_ms: 100,
            poll_interval_ms: 10,
            seed: None,
            trace: true,
        }
    }
}

/// Priority classes for the outgoing transitions of one state
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateArbitration {
    pub automaton: String,
    pub state: String,
    pub transitions: Vec<TransitionPriority>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransitionPriority {
    /// Position among the state's outgoing transitions, in declaration order
    pub ordinal: usize,
    pub class: ClassKind,
    /// Only meaningful for `ranked`; lower ranks are tried first
    #[serde(default)]
    pub rank: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassKind {
    Exclusive,
    Ranked,
    Default,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        // an empty document means "all defaults"
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks values that deserialize fine but cannot produce a working program
    pub fn validate(&self) -> Result<(), ConfigError> {
        // a send is enabled only while `len < cap`
        if self.emit.channel_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "emit.channel_depth".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.emit.package, "main");
        assert_eq!(config.emit.channel_depth, 2);
        assert_eq!(config.emit.seed, None);
        assert!(config.emit.trace);
        assert!(config.arbitration.is_empty());

        let config = Config::from_yaml_str("emit:\n  seed: 7\n").unwrap();
        assert_eq!(config.emit.seed, Some(7));
        assert_eq!(config.emit.tick_interval_ms, 100);
    }

    #[test]
    fn test_load_producer_consumer() {
        let config = Config::load("tests/producer_consumer.yaml").unwrap();
        assert_eq!(config.emit.seed, Some(42));
        assert_eq!(config.arbitration.len(), 2);

        let q1 = &config.arbitration[0];
        assert_eq!((q1.automaton.as_str(), q1.state.as_str()), ("Q", "q1"));
        assert_eq!(
            q1.transitions,
            vec![
                TransitionPriority {
                    ordinal: 0,
                    class: ClassKind::Exclusive,
                    rank: None
                },
                TransitionPriority {
                    ordinal: 1,
                    class: ClassKind::Ranked,
                    rank: Some(1)
                },
            ]
        );
    }

    #[test]
    fn test_load_from_temporary_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "emit:\n  package: automata\n  trace: false").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.emit.package, "automata");
        assert!(!config.emit.trace);
    }

    #[test]
    fn test_zero_channel_depth_is_rejected() {
        let err = Config::from_yaml_str("emit:\n  channel_depth: 0\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid configuration: `emit.channel_depth` must be at least 1"
        );

        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.emit.channel_depth = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(matches!(
            Config::from_yaml_str("emit:\n  colour: red\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("arbitration:\n  - {automaton: A, state: a0, transitions: [{ordinal: 0, class: urgent}]}\n"),
            Err(ConfigError::Yaml(_))
        ));
        assert!(matches!(
            Config::from_yaml_str("emit:\n  channel_depth: 0\n"),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            Config::load("tests/no_such_config.yaml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
