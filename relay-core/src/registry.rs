//! Typed read/write access to the shared instance registry.
//!
//! Backed by Redis list keys (`service:<ServiceType>`, `LPUSH`/`LRANGE 0 -1`),
//! opened lazily per call rather than held open across the connection's
//! lifetime: the registry is treated as a possibly-absent backing store
//! that degrades gracefully rather than a hard dependency.
//!
//! Construction never blocks: if the initial connection attempt fails, a
//! background task retries with bounded backoff while every `list_instances`
//! call returns an empty list in the meantime.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::error::CoreError;

const RECONNECT_BASE_DELAY_MS: u64 = 100;
const RECONNECT_MAX_DELAY_MS: u64 = 3_000;
const RECONNECT_MAX_ATTEMPTS: u32 = 10;

/// A single instance address registered for a service type.
pub type Instance = String;

struct RegistryInner {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    connected: AtomicBool,
}

/// Typed client for the `service:<ServiceType>` list keys.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<RegistryInner>,
}

impl RegistryClient {
    /// Construct a client and kick off a background connect. Never blocks
    /// the caller even if the registry is completely unreachable.
    pub fn new(redis_url: &str) -> Self {
        let client = match redis::Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "invalid registry URL; registry client will stay disconnected");
                // A Client::open failure here is a misconfiguration, not a
                // connectivity problem; fall back to a client pointed at the
                // same (unparseable-as-live) URL so `connect` always has a
                // concrete error path to retry/log against.
                redis::Client::open("redis://127.0.0.1:0").expect("loopback URL always parses")
            }
        };

        let inner = Arc::new(RegistryInner {
            client,
            connection: Mutex::new(None),
            connected: AtomicBool::new(false),
        });

        let this = Self { inner };
        this.spawn_background_connect();
        this
    }

    fn spawn_background_connect(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            for attempt in 1..=RECONNECT_MAX_ATTEMPTS {
                match inner.client.get_multiplexed_async_connection().await {
                    Ok(conn) => {
                        *inner.connection.lock().await = Some(conn);
                        inner.connected.store(true, Ordering::Release);
                        tracing::info!(attempt, "registry connection established");
                        return;
                    }
                    Err(err) => {
                        let delay_ms =
                            (attempt as u64 * RECONNECT_BASE_DELAY_MS).min(RECONNECT_MAX_DELAY_MS);
                        tracing::warn!(
                            attempt,
                            error = %err,
                            delay_ms,
                            "registry connection attempt failed, retrying"
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
            tracing::error!(
                attempts = RECONNECT_MAX_ATTEMPTS,
                "giving up on registry connection for this cooldown period"
            );
        });
    }

    async fn connection(&self) -> Option<MultiplexedConnection> {
        self.inner.connection.lock().await.clone()
    }

    fn key(service_type: &str) -> String {
        format!("service:{service_type}")
    }

    /// Returns the current instance list for a service type. On registry
    /// disconnection or error, returns an empty list and logs a warning;
    /// never raises.
    pub async fn list_instances(&self, service_type: &str) -> Vec<Instance> {
        let Some(mut conn) = self.connection().await else {
            tracing::warn!(service_type, "registry disconnected; returning empty instance list");
            return Vec::new();
        };

        match conn.lrange::<_, Vec<String>>(Self::key(service_type), 0, -1).await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(service_type, error = %err, "registry read failed; returning empty instance list");
                Vec::new()
            }
        }
    }

    /// Prepends `host` to the front of the service type's list.
    pub async fn register_instance(
        &self,
        service_type: &str,
        host: &str,
    ) -> Result<(), CoreError> {
        let Some(mut conn) = self.connection().await else {
            return Err(CoreError::RegistryUnavailable);
        };

        conn.lpush::<_, _, ()>(Self::key(service_type), host)
            .await
            .map_err(|err| {
                tracing::error!(service_type, error = %err, "registry write failed");
                CoreError::RegistryUnavailable
            })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disconnected_client_returns_empty_list() {
        // An unreachable port: the background connect will never succeed,
        // so every list_instances call observes the disconnected path.
        let client = RegistryClient::new("redis://127.0.0.1:1");
        assert!(!client.is_connected());
        assert_eq!(client.list_instances("A").await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn disconnected_client_rejects_register() {
        let client = RegistryClient::new("redis://127.0.0.1:1");
        let result = client.register_instance("A", "10.0.0.1").await;
        assert!(matches!(result, Err(CoreError::RegistryUnavailable)));
    }
}
