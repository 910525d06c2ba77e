//! Waits for a freshly started database to accept connections.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nestbed_core::backoff::{BackoffPolicy, ExponentialBackoff};
use nestbed_core::{NestbedError, Result};
use sqlx::Connection;
use sqlx::postgres::PgPoolOptions;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Live handle to a cluster database.
pub type ConnectionHandle = sqlx::PgPool;

/// Opens database handles and checks them for liveness.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Build a handle for `url`. Must not require the server to be up yet.
    async fn open(&self, url: &str) -> anyhow::Result<ConnectionHandle>;

    async fn ping(&self, conn: &ConnectionHandle) -> anyhow::Result<()>;
}

/// [`DatabaseConnector`] over the Postgres wire protocol.
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl DatabaseConnector for PgConnector {
    async fn open(&self, url: &str) -> anyhow::Result<ConnectionHandle> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy(url)?;
        Ok(pool)
    }

    async fn ping(&self, conn: &ConnectionHandle) -> anyhow::Result<()> {
        let mut connection = conn.acquire().await?;
        connection.ping().await?;
        Ok(())
    }
}

/// Retries the liveness check under exponential backoff with jitter.
pub struct ConnectionBroker {
    connector: Arc<dyn DatabaseConnector>,
    policy: BackoffPolicy,
    application_name: String,
}

impl ConnectionBroker {
    pub fn new(
        connector: Arc<dyn DatabaseConnector>,
        policy: BackoffPolicy,
        application_name: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            policy,
            application_name: application_name.into(),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// `postgres://root@localhost:<port>[/<database>]?application_name=..&sslmode=disable`
    pub fn connection_url(&self, port: u16, database: &str) -> String {
        let path = if database.is_empty() {
            String::new()
        } else {
            format!("/{database}")
        };
        format!(
            "postgres://root@localhost:{port}{path}?application_name={}&sslmode=disable",
            self.application_name
        )
    }

    /// Try `url` until it answers, `cancel` fires, or the elapsed budget runs out.
    ///
    /// The budget error is never returned before `max_elapsed` has passed.
    pub async fn connect(&self, url: &str, cancel: &CancellationToken) -> Result<ConnectionHandle> {
        let started = Instant::now();
        let deadline = self.policy.max_elapsed().map(|budget| started + budget);
        let mut backoff = ExponentialBackoff::new(&self.policy);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(NestbedError::Connection(format!(
                        "cancelled after {attempt} attempt(s)"
                    )));
                }
                outcome = self.attempt(url) => outcome,
            };

            let err = match outcome {
                Ok(conn) => {
                    info!(attempt, elapsed = ?started.elapsed(), "Database accepts connections");
                    return Ok(conn);
                }
                Err(e) => e,
            };

            let mut delay = backoff.next_delay();
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(NestbedError::Connection(format!(
                        "database not reachable after {attempt} attempt(s) in {:?}: {err:#}",
                        now - started
                    )));
                }
                delay = delay.min(deadline - now);
            }
            warn!(attempt, retry_in = ?delay, error = %format!("{err:#}"), "Database not ready");

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(NestbedError::Connection(format!(
                        "cancelled after {attempt} attempt(s): {err:#}"
                    )));
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, url: &str) -> anyhow::Result<ConnectionHandle> {
        let conn = self.connector.open(url).await?;
        self.connector.ping(&conn).await?;
        Ok(conn)
    }
}
