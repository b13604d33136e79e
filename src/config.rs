use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from pingwatch.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PingwatchConfig {
    pub probe: ProbeConfig,
    pub shutdown: ShutdownConfig,
    pub display: DisplayConfig,
}

/// What to ping and how to label it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub host: String,
    pub interval_secs: u32,
    pub title: String,
    pub command: String,
    pub args: Vec<String>,
}

/// Bounds for the graceful-then-forced termination of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub term_timeout_ms: u64,
    pub kill_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DisplayConfig {
    /// Optional JSON status file mirroring the current label.
    pub status_file: Option<PathBuf>,
    /// Don't print labels to stdout.
    pub quiet_terminal: bool,
}

// --- Default implementations ---

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "1.1.1.1".to_string(),
            interval_secs: 1,
            title: String::new(),
            command: "ping".to_string(),
            args: vec![
                "-n".to_string(),
                "-i".to_string(),
                "{interval}".to_string(),
                "{host}".to_string(),
            ],
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            term_timeout_ms: 5000,
            kill_timeout_ms: 5000,
        }
    }
}

impl ProbeConfig {
    /// Build the probe arguments, replacing `{host}` and `{interval}` placeholders.
    pub fn build_args(&self) -> Vec<String> {
        let interval = self.interval_secs.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace("{host}", &self.host).replace("{interval}", &interval))
            .collect()
    }
}

impl ShutdownConfig {
    pub fn term_timeout(&self) -> Duration {
        Duration::from_millis(self.term_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

/// Errors from loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Load config from `path`. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<PingwatchConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(PingwatchConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PingwatchConfig::default();
        assert_eq!(config.probe.command, "ping");
        assert_eq!(config.probe.interval_secs, 1);
        assert!(config.probe.title.is_empty());
        assert_eq!(config.shutdown.term_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown.kill_timeout(), Duration::from_secs(5));
        assert!(config.display.status_file.is_none());
    }

    #[test]
    fn test_default_args_match_ping_invocation() {
        let probe = ProbeConfig {
            host: "example.org".to_string(),
            interval_secs: 3,
            ..Default::default()
        };
        assert_eq!(probe.build_args(), vec!["-n", "-i", "3", "example.org"]);
    }

    #[test]
    fn test_build_args_without_placeholders() {
        let probe = ProbeConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "echo hi".to_string()],
            ..Default::default()
        };
        assert_eq!(probe.build_args(), vec!["-c", "echo hi"]);
    }

    #[test]
    fn test_build_args_placeholder_inside_arg() {
        let probe = ProbeConfig {
            host: "h".to_string(),
            interval_secs: 2,
            args: vec!["--target={host}:{interval}".to_string()],
            ..Default::default()
        };
        assert_eq!(probe.build_args(), vec!["--target=h:2"]);
    }

    #[test]
    fn test_parse_partial_toml_keeps_defaults() {
        let config: PingwatchConfig = toml::from_str(
            r#"
[probe]
host = "8.8.8.8"
title = "DNS"
"#,
        )
        .unwrap();
        assert_eq!(config.probe.host, "8.8.8.8");
        assert_eq!(config.probe.title, "DNS");
        assert_eq!(config.probe.interval_secs, 1);
        assert_eq!(config.probe.command, "ping");
        assert_eq!(config.shutdown.term_timeout_ms, 5000);
    }

    #[test]
    fn test_parse_full_toml() {
        let config: PingwatchConfig = toml::from_str(
            r#"
[probe]
host = "example.com"
interval_secs = 5
command = "/usr/bin/ping"
args = ["-n", "{host}"]

[shutdown]
term_timeout_ms = 250
kill_timeout_ms = 750

[display]
status_file = "/tmp/pingwatch.json"
quiet_terminal = true
"#,
        )
        .unwrap();
        assert_eq!(config.probe.interval_secs, 5);
        assert_eq!(config.probe.build_args(), vec!["-n", "example.com"]);
        assert_eq!(config.shutdown.term_timeout(), Duration::from_millis(250));
        assert_eq!(config.shutdown.kill_timeout(), Duration::from_millis(750));
        assert_eq!(
            config.display.status_file,
            Some(PathBuf::from("/tmp/pingwatch.json"))
        );
        assert!(config.display.quiet_terminal);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config.probe, ProbeConfig::default());
    }

    #[test]
    fn test_load_invalid_toml_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pingwatch.toml");
        std::fs::write(&path, "[probe\nhost = ").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pingwatch.toml");
        std::fs::write(&path, "[probe]\nhost = \"10.0.0.1\"\n").unwrap();
        let config = load(&path).unwrap();
        assert_eq!(config.probe.host, "10.0.0.1");
    }
}
