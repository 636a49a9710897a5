use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Client configuration loaded from environment variables.
///
/// Defaults target a ComfyUI instance on the local machine.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// ComfyUI base URL.
    pub server_url: String,
    /// Directory holding `t2v.json`, `i2v.json` and `i2i.json`.
    pub template_dir: PathBuf,
    /// Append-only submission log.
    pub audit_log: PathBuf,
    /// Where retrieved outputs are written.
    pub output_dir: PathBuf,
    /// The backend's own output directory, when it is reachable locally.
    /// Outputs are copied from here instead of downloaded.
    pub backend_output_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    /// Per-request HTTP timeout.
    pub http_timeout: Duration,
    /// Extra submission attempts when the backend is unreachable.
    pub submit_retries: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                      |
    /// |-----------------------------|------------------------------|
    /// | `COMFYUI_URL`               | `http://localhost:8188`      |
    /// | `VIDGEN_TEMPLATE_DIR`       | `workflows`                  |
    /// | `VIDGEN_AUDIT_LOG`          | `/var/log/video-prompts.log` |
    /// | `VIDGEN_OUTPUT_DIR`         | `.`                          |
    /// | `VIDGEN_BACKEND_OUTPUT_DIR` | unset                        |
    /// | `VIDGEN_POLL_INTERVAL_MS`   | `2000`                       |
    /// | `VIDGEN_HTTP_TIMEOUT_SECS`  | `30`                         |
    /// | `VIDGEN_SUBMIT_RETRIES`     | `3`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let poll_ms: u64 = parse(&lookup, "VIDGEN_POLL_INTERVAL_MS", 2000, "a positive number of milliseconds")?;
        let timeout_secs: u64 = parse(&lookup, "VIDGEN_HTTP_TIMEOUT_SECS", 30, "a positive number of seconds")?;
        for (name, value) in [("VIDGEN_POLL_INTERVAL_MS", poll_ms), ("VIDGEN_HTTP_TIMEOUT_SECS", timeout_secs)] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var: name,
                    value: "0".into(),
                    expected: "greater than zero",
                });
            }
        }

        Ok(Self {
            server_url: var("COMFYUI_URL", "http://localhost:8188"),
            template_dir: var("VIDGEN_TEMPLATE_DIR", "workflows").into(),
            audit_log: var("VIDGEN_AUDIT_LOG", "/var/log/video-prompts.log").into(),
            output_dir: var("VIDGEN_OUTPUT_DIR", ".").into(),
            backend_output_dir: lookup("VIDGEN_BACKEND_OUTPUT_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            poll_interval: Duration::from_millis(poll_ms),
            http_timeout: Duration::from_secs(timeout_secs),
            submit_retries: parse(&lookup, "VIDGEN_SUBMIT_RETRIES", 3, "a non-negative integer")?,
        })
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid {
                var,
                value,
                expected,
            }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server_url, "http://localhost:8188");
        assert_eq!(config.audit_log, PathBuf::from("/var/log/video-prompts.log"));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.submit_retries, 3);
        assert_eq!(config.backend_output_dir, None);
    }

    #[test]
    fn overrides() {
        let config = load(&[
            ("COMFYUI_URL", "http://gpu-box:8188"),
            ("VIDGEN_POLL_INTERVAL_MS", "500"),
            ("VIDGEN_SUBMIT_RETRIES", "0"),
            ("VIDGEN_BACKEND_OUTPUT_DIR", "/opt/comfyui/ComfyUI/output"),
        ])
        .unwrap();
        assert_eq!(config.server_url, "http://gpu-box:8188");
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.submit_retries, 0);
        assert_eq!(
            config.backend_output_dir,
            Some(PathBuf::from("/opt/comfyui/ComfyUI/output"))
        );
    }

    #[test]
    fn invalid_number_names_variable() {
        let err = load(&[("VIDGEN_HTTP_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "VIDGEN_HTTP_TIMEOUT_SECS", .. });
        assert!(err.to_string().contains("soon"));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let err = load(&[("VIDGEN_POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { var: "VIDGEN_POLL_INTERVAL_MS", .. });
    }
}
