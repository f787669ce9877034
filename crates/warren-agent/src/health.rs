//! Health-check execution: HTTP, TCP, and command probes with
//! consecutive-result thresholds.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;
use warren_types::{Health, HealthProbe};

use crate::runtime::Runtime;

/// Debounces raw probe results into health flips: `retries` consecutive
/// failures mark unhealthy, `retries` consecutive successes mark healthy.
#[derive(Debug)]
pub(crate) struct HealthTracker {
    retries: u32,
    consecutive_ok: u32,
    consecutive_fail: u32,
    current: Health,
}

impl HealthTracker {
    pub(crate) fn new(retries: u32) -> Self {
        Self {
            retries: retries.max(1),
            consecutive_ok: 0,
            consecutive_fail: 0,
            current: Health::Unknown,
        }
    }

    /// Feeds one probe result; returns the new health if it flipped.
    pub(crate) fn observe(&mut self, ok: bool) -> Option<Health> {
        if ok {
            self.consecutive_ok += 1;
            self.consecutive_fail = 0;
            if self.consecutive_ok >= self.retries && self.current != Health::Healthy {
                self.current = Health::Healthy;
                return Some(Health::Healthy);
            }
        } else {
            self.consecutive_fail += 1;
            self.consecutive_ok = 0;
            if self.consecutive_fail >= self.retries && self.current != Health::Unhealthy {
                self.current = Health::Unhealthy;
                return Some(Health::Unhealthy);
            }
        }
        None
    }
}

/// Runs one probe against a container. `true` means the probe passed.
pub(crate) async fn probe<R: Runtime>(
    probe: &HealthProbe,
    runtime: &R,
    runtime_id: &str,
    timeout: Duration,
) -> bool {
    let result = tokio::time::timeout(timeout, async {
        match probe {
            HealthProbe::Tcp { port } => TcpStream::connect(("127.0.0.1", *port)).await.is_ok(),
            HealthProbe::Http { path, port } => http_get_ok(*port, path).await,
            HealthProbe::Command { argv } => {
                matches!(runtime.exec(runtime_id, argv).await, Ok(0))
            }
        }
    })
    .await;
    let passed = result.unwrap_or(false);
    trace!(runtime_id, passed, "health probe");
    passed
}

/// Minimal HTTP/1.1 GET: any 2xx status line passes. Containers publish
/// their check port on the node, so the probe targets loopback.
async fn http_get_ok(port: u16, path: &str) -> bool {
    let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await else {
        return false;
    };
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }
    let mut response = [0u8; 64];
    let Ok(n) = stream.read(&mut response).await else {
        return false;
    };
    // "HTTP/1.1 2xx ..."
    let head = String::from_utf8_lossy(&response[..n]);
    head.split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FakeRuntime, RunConfig};

    #[test]
    fn tracker_requires_consecutive_results() {
        let mut t = HealthTracker::new(3);
        assert_eq!(t.observe(false), None);
        assert_eq!(t.observe(false), None);
        // A pass resets the failure streak.
        assert_eq!(t.observe(true), None);
        assert_eq!(t.observe(false), None);
        assert_eq!(t.observe(false), None);
        assert_eq!(t.observe(false), Some(Health::Unhealthy));
        // Staying unhealthy does not re-announce.
        assert_eq!(t.observe(false), None);

        assert_eq!(t.observe(true), None);
        assert_eq!(t.observe(true), None);
        assert_eq!(t.observe(true), Some(Health::Healthy));
    }

    #[tokio::test]
    async fn tcp_probe_reflects_listener_presence() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let runtime = FakeRuntime::new();

        assert!(
            probe(
                &HealthProbe::Tcp { port },
                &runtime,
                "rt",
                Duration::from_secs(1)
            )
            .await
        );
        drop(listener);
        // The freed port no longer accepts.
        assert!(
            !probe(
                &HealthProbe::Tcp { port },
                &runtime,
                "rt",
                Duration::from_secs(1)
            )
            .await
        );
    }

    #[tokio::test]
    async fn http_probe_checks_the_status_class() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = [0u8; 512];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
                    .await;
            }
        });

        let runtime = FakeRuntime::new();
        assert!(
            probe(
                &HealthProbe::Http {
                    path: "/healthz".into(),
                    port
                },
                &runtime,
                "rt",
                Duration::from_secs(1)
            )
            .await
        );
    }

    #[tokio::test]
    async fn command_probe_uses_runtime_exec() {
        let runtime = FakeRuntime::new();
        let id = runtime.create("c", &RunConfig::default()).await.unwrap();
        runtime.push_exec_result(1);

        let check = HealthProbe::Command {
            argv: vec!["/bin/check".into()],
        };
        assert!(!probe(&check, &runtime, &id, Duration::from_secs(1)).await);
        // Queue exhausted: exec defaults to success.
        assert!(probe(&check, &runtime, &id, Duration::from_secs(1)).await);
    }
}
