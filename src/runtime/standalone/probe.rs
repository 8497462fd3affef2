//! Readiness probing of the sidecar's local ports.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::error::ProcessError;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// "Is something listening on this port within the timeout."
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn wait_listening(&self, port: u16, timeout: Duration) -> Result<(), ProcessError>;
}

/// Probes by opening TCP connections to 127.0.0.1.
#[derive(Debug, Clone, Default)]
pub struct TcpProbe;

#[async_trait]
impl PortProbe for TcpProbe {
    async fn wait_listening(&self, port: u16, timeout: Duration) -> Result<(), ProcessError> {
        let poll = async {
            loop {
                match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(("127.0.0.1", port)))
                    .await
                {
                    Ok(Ok(_)) => return,
                    Ok(Err(e)) => tracing::trace!("Port {} not ready: {}", port, e),
                    Err(_) => tracing::trace!("Connect to port {} timed out", port),
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| ProcessError::NotListening { port, timeout })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_finds_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        TcpProbe
            .wait_listening(port, Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_times_out() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = TcpProbe
            .wait_listening(port, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NotListening { port: p, .. } if p == port));
    }
}
