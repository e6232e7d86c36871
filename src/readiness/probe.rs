use super::check::ReadinessCheck;
use async_trait::async_trait;
use reqwest::Client;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub healthy: bool,
    pub diagnostic: Option<String>,
}

impl ProbeResult {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            diagnostic: None,
        }
    }

    pub fn unhealthy(diagnostic: impl Into<String>) -> Self {
        Self {
            healthy: false,
            diagnostic: Some(diagnostic.into()),
        }
    }
}

/// A single readiness probe attempt. Never errors; failures are diagnostics.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, check: &ReadinessCheck, timeout: Duration) -> ProbeResult;
}

/// Probes real endpoints: HTTP via reqwest, TCP connects and local commands.
#[derive(Debug, Clone, Default)]
pub struct SystemProber {
    client: Client,
}

impl SystemProber {
    pub fn new() -> Self {
        Self::default()
    }

    async fn probe_http(&self, url: &str, expected: Option<u16>, timeout: Duration) -> ProbeResult {
        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return ProbeResult::unhealthy(format!("GET {} timed out", url))
            }
            Err(e) => return ProbeResult::unhealthy(format!("GET {} failed: {}", url, e)),
        };

        let status = response.status();
        let ok = match expected {
            Some(code) => status.as_u16() == code,
            None => status.is_success(),
        };
        if ok {
            ProbeResult::healthy()
        } else {
            ProbeResult::unhealthy(format!("GET {} returned {}", url, status))
        }
    }

    async fn probe_tcp(&self, host: &str, port: u16, timeout: Duration) -> ProbeResult {
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => ProbeResult::healthy(),
            Ok(Err(e)) => ProbeResult::unhealthy(format!("connect {}:{}: {}", host, port, e)),
            Err(_) => ProbeResult::unhealthy(format!("connect {}:{} timed out", host, port)),
        }
    }

    async fn probe_command(&self, program: &str, args: &[String], timeout: Duration) -> ProbeResult {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => ProbeResult::healthy(),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let detail = stderr.lines().last().unwrap_or("").trim().to_string();
                ProbeResult::unhealthy(match output.status.code() {
                    Some(code) if detail.is_empty() => format!("{} exited with {}", program, code),
                    Some(code) => format!("{} exited with {}: {}", program, code, detail),
                    None => format!("{} terminated by signal", program),
                })
            }
            Ok(Err(e)) => ProbeResult::unhealthy(format!("failed to run {}: {}", program, e)),
            Err(_) => ProbeResult::unhealthy(format!("{} timed out", program)),
        }
    }
}

#[async_trait]
impl Prober for SystemProber {
    async fn probe(&self, check: &ReadinessCheck, timeout: Duration) -> ProbeResult {
        match check {
            ReadinessCheck::Http {
                url,
                expected_status,
            } => self.probe_http(url, *expected_status, timeout).await,
            ReadinessCheck::Tcp { host, port } => self.probe_tcp(host, *port, timeout).await,
            ReadinessCheck::Command { program, args } => {
                self.probe_command(program, args, timeout).await
            }
            ReadinessCheck::None => ProbeResult::healthy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let check = ReadinessCheck::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let result = SystemProber::new().probe(&check, Duration::from_secs(2)).await;
        assert!(result.healthy, "{:?}", result.diagnostic);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let check = ReadinessCheck::Tcp {
            host: "127.0.0.1".into(),
            port,
        };
        let result = SystemProber::new().probe(&check, Duration::from_secs(2)).await;
        assert!(!result.healthy);
        assert!(result.diagnostic.unwrap().contains("connect 127.0.0.1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_exit_status() {
        let prober = SystemProber::new();
        let ok = ReadinessCheck::Command {
            program: "true".into(),
            args: vec![],
        };
        let fail = ReadinessCheck::Command {
            program: "sh".into(),
            args: vec!["-c".into(), "echo 'no response' >&2; exit 2".into()],
        };

        assert!(prober.probe(&ok, Duration::from_secs(2)).await.healthy);
        let result = prober.probe(&fail, Duration::from_secs(2)).await;
        assert!(!result.healthy);
        assert_eq!(
            result.diagnostic.as_deref(),
            Some("sh exited with 2: no response")
        );
    }

    #[tokio::test]
    async fn test_missing_command_is_unhealthy() {
        let check = ReadinessCheck::Command {
            program: "definitely-not-a-real-probe".into(),
            args: vec![],
        };
        let result = SystemProber::new().probe(&check, Duration::from_secs(2)).await;
        assert!(!result.healthy);
        assert!(result.diagnostic.unwrap().starts_with("failed to run"));
    }

    #[tokio::test]
    async fn test_http_probe_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let check = ReadinessCheck::Http {
            url: format!("http://127.0.0.1:{}/health", port),
            expected_status: None,
        };
        let result = SystemProber::new().probe(&check, Duration::from_secs(2)).await;
        assert!(!result.healthy);
    }
}
