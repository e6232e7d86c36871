//! Readiness check descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a started service signals that it can serve requests.
///
/// Declared per service in the stack manifest:
///
/// ```yaml
/// readiness:
///   http: { url: "http://localhost:8000/health", expected_status: 200 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// HTTP GET; healthy on `expected_status`, or any 2xx when unset
    Http {
        url: String,
        #[serde(default)]
        expected_status: Option<u16>,
    },

    /// TCP connect succeeds
    Tcp { host: String, port: u16 },

    /// Command exits with status 0
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// No probe; healthy as soon as it was started
    #[default]
    None,
}

impl fmt::Display for ReadinessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessCheck::Http {
                url,
                expected_status,
            } => match expected_status {
                Some(code) => write!(f, "GET {} == {}", url, code),
                None => write!(f, "GET {} == 2xx", url),
            },
            ReadinessCheck::Tcp { host, port } => write!(f, "tcp {}:{}", host, port),
            ReadinessCheck::Command { program, args } => {
                write!(f, "exec {}", program)?;
                for arg in args {
                    write!(f, " {}", arg)?;
                }
                Ok(())
            }
            ReadinessCheck::None => write!(f, "none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http_check() {
        let check: ReadinessCheck =
            serde_yaml::from_str("http: { url: \"http://localhost:8000/health\" }").unwrap();
        assert_eq!(
            check,
            ReadinessCheck::Http {
                url: "http://localhost:8000/health".to_string(),
                expected_status: None,
            }
        );
    }

    #[test]
    fn test_parse_command_check() {
        let yaml = "command:\n  program: pg_isready\n  args: [\"-h\", \"localhost\"]\n";
        let check: ReadinessCheck = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(check.to_string(), "exec pg_isready -h localhost");
    }

    #[test]
    fn test_parse_none() {
        let check: ReadinessCheck = serde_yaml::from_str("none").unwrap();
        assert_eq!(check, ReadinessCheck::None);
    }
}
