//! Key-value store clients
//!
//! The pipeline only ever needs one store operation: set a value under a key.
//! [`AppsStore`] captures that, [`MemcacheStore`] speaks the memcached text
//! protocol, and [`DryRunStore`] logs instead of writing.

use crate::app::models::UserApps;
use crate::constants::memcache::{CRLF, MAX_KEY_LENGTH, STORED};
use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::debug;

/// A store that accepts binary values under string keys
pub trait AppsStore: Send {
    /// Address used in log messages
    fn address(&self) -> &str;

    /// Store `value` under `key`, replacing any previous value
    fn set(&mut self, key: &str, value: &[u8]) -> impl Future<Output = Result<()>> + Send;
}

/// Memcached client for a single server
///
/// Connects lazily on the first write. Any failed call drops the connection
/// so that the next call starts from a fresh socket.
pub struct MemcacheStore {
    address: String,
    timeout: Duration,
    connection: Option<BufStream<TcpStream>>,
}

impl MemcacheStore {
    /// Create a client for `address` (`host:port`) with a per-call timeout
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            connection: None,
        }
    }

    async fn store(&mut self, key: &str, value: &[u8]) -> Result<()> {
        if self.connection.is_none() {
            let stream = TcpStream::connect(&self.address)
                .await
                .map_err(|e| Error::store_connect(&self.address, e))?;
            stream
                .set_nodelay(true)
                .map_err(|e| Error::store_connect(&self.address, e))?;
            debug!("Connected to memcache {}", self.address);
            self.connection = Some(BufStream::new(stream));
        }

        let Some(conn) = self.connection.as_mut() else {
            return Err(Error::store_write(&self.address, "no connection"));
        };
        let address = self.address.as_str();
        let write_failed = |e: std::io::Error| Error::store_write(address, e.to_string());

        let header = format!("set {} 0 0 {}{}", key, value.len(), CRLF);
        conn.write_all(header.as_bytes()).await.map_err(write_failed)?;
        conn.write_all(value).await.map_err(write_failed)?;
        conn.write_all(CRLF.as_bytes()).await.map_err(write_failed)?;
        conn.flush().await.map_err(write_failed)?;

        let mut reply = String::new();
        let read = conn.read_line(&mut reply).await.map_err(write_failed)?;
        if read == 0 {
            return Err(Error::store_write(address, "connection closed by server"));
        }

        match reply.trim_end() {
            STORED => Ok(()),
            other => Err(Error::store_write(address, other)),
        }
    }
}

impl AppsStore for MemcacheStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;

        let timeout = self.timeout;
        let outcome = tokio::time::timeout(timeout, self.store(key, value)).await;
        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::store_timeout(&self.address, timeout)),
        };

        if result.is_err() {
            self.connection = None;
        }
        result
    }
}

/// Reject keys memcached would refuse
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_key(key, "key is empty"));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(Error::invalid_key(
            key,
            format!("longer than {} bytes", MAX_KEY_LENGTH),
        ));
    }
    if key.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::invalid_key(
            key,
            "contains whitespace or control characters",
        ));
    }
    Ok(())
}

/// Store that only logs what would have been written
pub struct DryRunStore {
    address: String,
}

impl DryRunStore {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl AppsStore for DryRunStore {
    fn address(&self) -> &str {
        &self.address
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> Result<()> {
        let payload = UserApps::decode(value)?;
        debug!("{} - {} -> {:?}", self.address, key, payload);
        Ok(())
    }
}
