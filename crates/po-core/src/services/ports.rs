use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{OrchestratorError, Result};
use crate::models::PortRange;

use super::engine::LiveInstanceView;
use super::state::StateStore;

/// Host-level check for whether a port can be bound right now.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes by binding a listener on all interfaces.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpPortProbe;

impl PortProbe for TcpPortProbe {
    fn is_free(&self, port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).is_ok()
    }
}

/// Hands out host ports from the configured range.
///
/// Holds no bookkeeping beyond in-flight reservations: occupied ports are
/// recomputed on every call from active deployment records and the live
/// engine listing, so a restarted process cannot drift from reality.
/// Allocation is serialised by the allocator's own lock.
pub struct PortAllocator {
    range: PortRange,
    store: Arc<StateStore>,
    live_view: Arc<dyn LiveInstanceView>,
    probe: Arc<dyn PortProbe>,
    /// Ports handed out whose deployment record does not carry them yet.
    reserved: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(
        range: PortRange,
        store: Arc<StateStore>,
        live_view: Arc<dyn LiveInstanceView>,
        probe: Arc<dyn PortProbe>,
    ) -> Self {
        Self {
            range,
            store,
            live_view,
            probe,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Reserve a port from the configured range.
    pub async fn allocate_default(&self) -> Result<u16> {
        self.allocate(self.range.start, self.range.end, &HashSet::new())
            .await
    }

    /// Reserve a port from the configured range other than those in `avoid`,
    /// for a start whose first port turned out to be taken by something the
    /// allocator cannot see.
    pub async fn allocate_avoiding(&self, avoid: &HashSet<u16>) -> Result<u16> {
        self.allocate(self.range.start, self.range.end, avoid).await
    }

    /// Reserve the lowest free port in `start..=end`. The caller must
    /// [`release`](Self::release) it once the owning record is persisted or
    /// the start has failed.
    async fn allocate(&self, start: u16, end: u16, avoid: &HashSet<u16>) -> Result<u16> {
        let mut reserved = self.reserved.lock().await;
        let occupied = self.occupied(&reserved).await?;
        for port in start..=end {
            if occupied.contains(&port) || avoid.contains(&port) {
                continue;
            }
            if !self.probe.is_free(port) {
                tracing::debug!(port, "port busy on host, trying next");
                continue;
            }
            reserved.insert(port);
            return Ok(port);
        }
        Err(OrchestratorError::ResourceExhausted { start, end })
    }

    /// Reserve a specific port if nothing holds it. Used to bring a stopped
    /// container back on its previous port.
    pub async fn try_reserve(&self, port: u16) -> Result<bool> {
        let mut reserved = self.reserved.lock().await;
        let occupied = self.occupied(&reserved).await?;
        if occupied.contains(&port) || !self.probe.is_free(port) {
            return Ok(false);
        }
        reserved.insert(port);
        Ok(true)
    }

    pub async fn release(&self, port: u16) {
        self.reserved.lock().await.remove(&port);
    }

    async fn occupied(&self, reserved: &HashSet<u16>) -> Result<HashSet<u16>> {
        let mut occupied = self.store.active_ports().await;
        for container in self.live_view.list_owned().await? {
            if container.is_running() {
                occupied.extend(container.host_ports);
            }
        }
        occupied.extend(reserved.iter().copied());
        Ok(occupied)
    }
}
