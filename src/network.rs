//! Best-effort online/offline detector. Never fatal: every failure mode
//! just degrades to `Offline` and gets logged.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

const TCP_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const HTTP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkStatus {
    Online,
    Offline,
}

pub struct NetworkProbe {
    dns_host: String,
    dns_port: u16,
    http_host: String,
    cached: Option<(Instant, NetworkStatus)>,
}

impl NetworkProbe {
    pub fn new(dns_host: impl Into<String>, dns_port: u16, http_host: impl Into<String>) -> Self {
        Self {
            dns_host: dns_host.into(),
            dns_port,
            http_host: http_host.into(),
            cached: None,
        }
    }

    pub async fn probe(&mut self) -> NetworkStatus {
        if let Some((at, status)) = self.cached {
            if at.elapsed() < CACHE_TTL {
                return status;
            }
        }

        let status = if self.tcp_probe().await || self.http_probe().await {
            NetworkStatus::Online
        } else {
            NetworkStatus::Offline
        };

        self.cached = Some((Instant::now(), status));
        status
    }

    async fn tcp_probe(&self) -> bool {
        let addr = format!("{}:{}", self.dns_host, self.dns_port);
        match timeout(TCP_PROBE_TIMEOUT, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(%addr, error = %e, "tcp probe failed");
                false
            }
            Err(_) => {
                debug!(%addr, "tcp probe timed out");
                false
            }
        }
    }

    async fn http_probe(&self) -> bool {
        let addr = format!("{}:80", self.http_host);
        let attempt = async {
            let mut stream = TcpStream::connect(&addr).await?;
            let request = format!("HEAD / HTTP/1.0\r\nHost: {}\r\n\r\n", self.http_host);
            stream.write_all(request.as_bytes()).await?;
            Ok::<(), std::io::Error>(())
        };

        match timeout(HTTP_PROBE_TIMEOUT, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(%addr, error = %e, "http probe failed");
                false
            }
            Err(_) => {
                warn!(%addr, "http probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn probe_against_closed_local_port_is_offline() {
        let mut probe = NetworkProbe::new("127.0.0.1", 1, "127.0.0.1");
        assert_eq!(probe.probe().await, NetworkStatus::Offline);
    }

    #[tokio::test]
    async fn probe_result_is_cached() {
        let mut probe = NetworkProbe::new("127.0.0.1", 1, "127.0.0.1");
        let first = probe.probe().await;
        assert!(probe.cached.is_some());
        let second = probe.probe().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn probe_against_open_local_listener_is_online() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let mut probe = NetworkProbe::new("127.0.0.1", port, "127.0.0.1");
        assert_eq!(probe.probe().await, NetworkStatus::Online);
    }
}
