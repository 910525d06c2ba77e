use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{LazyLock, Mutex};

use crate::error::{NestbedError, Result};

/// Source of free host ports. Injected into the cluster so tests can use a fake.
pub trait PortAllocator: Send + Sync {
    /// Reserve a port that no other cluster in this process holds.
    fn acquire(&self) -> Result<u16>;

    /// Return a port to the pool.
    fn release(&self, port: u16);
}

/// Ports handed out by any `HostPortAllocator` in this process.
static RESERVED: LazyLock<Mutex<HashSet<u16>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

const MAX_ATTEMPTS: usize = 64;

/// Asks the OS for free ports and keeps a process-wide reservation list.
///
/// The scratch listener is closed before the port is handed to the container
/// runtime, so another process on the host can still race for it; clusters in
/// this process never collide.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostPortAllocator;

impl HostPortAllocator {
    pub fn new() -> Self {
        Self
    }

    fn free_port() -> Result<u16> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .map_err(|e| NestbedError::PortAllocation(format!("bind failed: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| NestbedError::PortAllocation(format!("local_addr failed: {e}")))?
            .port();
        Ok(port)
    }
}

impl PortAllocator for HostPortAllocator {
    fn acquire(&self) -> Result<u16> {
        let mut reserved = RESERVED
            .lock()
            .map_err(|_| NestbedError::PortAllocation("port registry poisoned".to_string()))?;
        for _ in 0..MAX_ATTEMPTS {
            let port = Self::free_port()?;
            if reserved.insert(port) {
                tracing::debug!(port, "Reserved host port");
                return Ok(port);
            }
        }
        Err(NestbedError::PortAllocation(format!(
            "no unreserved port found after {MAX_ATTEMPTS} attempts"
        )))
    }

    fn release(&self, port: u16) {
        if let Ok(mut reserved) = RESERVED.lock() {
            reserved.remove(&port);
        }
    }
}
