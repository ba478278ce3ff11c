//! `etcdctl`-backed key-value client

use crate::error::KvError;
use crate::kv::{ClientOptions, Consistency, KvClient};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs the command-line client once per request
#[derive(Debug, Clone)]
pub struct EtcdctlClient {
    bin: PathBuf,
    endpoints: Vec<String>,
    options: ClientOptions,
}

impl EtcdctlClient {
    /// Create for the given members
    #[must_use]
    pub fn new(bin: impl Into<PathBuf>, endpoints: Vec<String>, options: ClientOptions) -> Self {
        Self {
            bin: bin.into(),
            endpoints,
            options,
        }
    }

    /// Arguments shared by every request
    #[must_use]
    pub fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--endpoints={}", self.endpoints.join(",")),
            format!("--dial-timeout={}ms", self.options.dial_timeout.as_millis()),
        ];
        if let Some(tls) = &self.options.tls {
            args.push(format!("--cacert={}", tls.ca_file.display()));
            args.push(format!("--cert={}", tls.cert_file.display()));
            args.push(format!("--key={}", tls.key_file.display()));
        }
        args
    }

    fn put_args(&self, key: &str, value: &str) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["put".to_string(), key.to_string(), value.to_string()]);
        args
    }

    fn get_args(&self, key: &str, consistency: Consistency) -> Vec<String> {
        let mut args = self.base_args();
        args.extend(["get".to_string(), key.to_string()]);
        if consistency == Consistency::Serializable {
            args.push("--consistency=s".to_string());
        }
        args
    }

    async fn run(&self, args: Vec<String>) -> Result<String, KvError> {
        debug!(bin = %self.bin.display(), ?args, "running client");
        let output = Command::new(&self.bin)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.options.request_timeout, output)
            .await
            .map_err(|_| KvError::Timeout(self.options.request_timeout))??;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(status = %output.status, %stderr, "client request failed");
        if stderr.contains("context deadline exceeded") || stderr.contains("DeadlineExceeded") {
            Err(KvError::Unavailable(stderr))
        } else {
            Err(KvError::Rejected(stderr))
        }
    }
}

/// Value for `key` in `get` output, which alternates key and value lines
fn parse_get(stdout: &str, key: &str) -> Result<Option<String>, KvError> {
    let mut lines = stdout.lines();
    match lines.next() {
        None => Ok(None),
        Some(line) if line.is_empty() => Ok(None),
        Some(line) if line == key => lines
            .next()
            .map(|v| Some(v.to_string()))
            .ok_or_else(|| KvError::Malformed(format!("no value line after key {key:?}"))),
        Some(line) => Err(KvError::Malformed(format!(
            "expected key {key:?}, got {line:?}"
        ))),
    }
}

#[async_trait::async_trait]
impl KvClient for EtcdctlClient {
    async fn put(&self, key: &str, value: &str, _consistency: Consistency) -> Result<(), KvError> {
        // writes always go through consensus
        let stdout = self.run(self.put_args(key, value)).await?;
        if stdout.contains("OK") {
            Ok(())
        } else {
            Err(KvError::Malformed(format!(
                "put {key:?} returned {:?}",
                stdout.trim()
            )))
        }
    }

    async fn get(&self, key: &str, consistency: Consistency) -> Result<Option<String>, KvError> {
        let stdout = self.run(self.get_args(key, consistency)).await?;
        parse_get(&stdout, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::ClientTls;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn client() -> EtcdctlClient {
        EtcdctlClient::new(
            "/usr/bin/etcdctl",
            vec!["http://localhost:20000".into(), "http://localhost:20005".into()],
            ClientOptions::default(),
        )
    }

    #[test]
    fn base_args_join_endpoints() {
        assert_eq!(
            client().base_args(),
            vec![
                "--endpoints=http://localhost:20000,http://localhost:20005".to_string(),
                "--dial-timeout=7000ms".to_string(),
            ]
        );
    }

    #[test]
    fn serializable_get_adds_consistency_flag() {
        let c = client();
        assert!(!c.get_args("foo", Consistency::Quorum).contains(&"--consistency=s".to_string()));
        assert!(c
            .get_args("foo", Consistency::Serializable)
            .contains(&"--consistency=s".to_string()));
    }

    #[test]
    fn tls_adds_certificate_flags() {
        let opts = ClientOptions::default()
            .with_dial_timeout(Duration::from_secs(1))
            .with_tls(ClientTls {
                ca_file: "ca.pem".into(),
                cert_file: "c.pem".into(),
                key_file: "k.pem".into(),
            });
        let c = EtcdctlClient::new("etcdctl", vec!["https://localhost:1".into()], opts);
        let args = c.base_args();
        assert!(args.contains(&"--cacert=ca.pem".to_string()));
        assert!(args.contains(&"--dial-timeout=1000ms".to_string()));
    }

    #[test]
    fn parse_get_output() {
        assert_eq!(parse_get("foo0\nbar\n", "foo0").unwrap(), Some("bar".to_string()));
        assert_eq!(parse_get("", "foo0").unwrap(), None);
        assert!(parse_get("foo1\nbar\n", "foo0").is_err());
        assert!(parse_get("foo0\n", "foo0").is_err());
    }
}
