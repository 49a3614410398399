//! Device registry implementation
//!
//! The single source of truth for which provider serves which device,
//! what sockets are attached, and device health flags. Every mutation
//! serializes through the write side of one lock; the lock is held only
//! for the map operation itself, never across socket I/O. Teardown hooks
//! taken out of the maps run after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::entry::{
    DeviceInfo, DeviceStatus, Geometry, NoticeConn, RelayControl, Subsystem, ViewerConn,
};
use crate::control::ControlChannel;
use crate::net::censor_udid;
use crate::video::PaceState;

#[derive(Default)]
struct Maps {
    /// Provider id to live control channel
    channels: HashMap<i64, Arc<ControlChannel>>,
    /// Device udid to owning provider id
    device_provider: HashMap<String, i64>,
    /// Health flags, present only while bound
    status: HashMap<String, DeviceStatus>,
    /// Display metadata, survives rebinding
    info: HashMap<String, DeviceInfo>,
    /// Attached viewer video connections
    viewers: HashMap<String, ViewerConn>,
    /// Attached notice connections
    notices: HashMap<String, NoticeConn>,
    /// Out-of-band control queues of active relay pipelines
    queues: HashMap<String, mpsc::UnboundedSender<RelayControl>>,
    /// Pacing state of active relay pipelines
    pace: HashMap<String, Arc<PaceState>>,
}

/// Concurrent device registry
pub struct DeviceRegistry {
    inner: RwLock<Maps>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Maps::default()),
        }
    }

    // --- provider channels ---

    /// Install the control channel for a provider
    ///
    /// A provider has at most one active channel; a replaced channel is
    /// simply dropped here, its own teardown runs when its socket dies.
    pub async fn set_channel(&self, provider_id: i64, channel: Arc<ControlChannel>) {
        let old = self
            .inner
            .write()
            .await
            .channels
            .insert(provider_id, channel);
        if old.is_some() {
            tracing::info!(provider = provider_id, "Replaced existing control channel");
        }
    }

    pub async fn channel(&self, provider_id: i64) -> Option<Arc<ControlChannel>> {
        self.inner.read().await.channels.get(&provider_id).cloned()
    }

    /// Resolve a device straight to its provider's channel
    pub async fn channel_for_device(&self, udid: &str) -> Option<Arc<ControlChannel>> {
        let maps = self.inner.read().await;
        let provider_id = maps.device_provider.get(udid)?;
        maps.channels.get(provider_id).cloned()
    }

    /// Remove a dead provider: its channel registration and every device
    /// bound to it
    ///
    /// Only acts if `dying` is still the registered channel. A reconnected
    /// provider's replacement channel must survive the old socket's late
    /// teardown.
    pub async fn drop_provider(&self, provider_id: i64, dying: &ControlChannel) {
        let mut maps = self.inner.write().await;
        match maps.channels.get(&provider_id) {
            Some(current) if std::ptr::eq(Arc::as_ptr(current), dying) => {}
            _ => {
                tracing::debug!(provider = provider_id, "Stale channel teardown ignored");
                return;
            }
        }
        maps.channels.remove(&provider_id);

        let udids: Vec<String> = maps
            .device_provider
            .iter()
            .filter(|(_, p)| **p == provider_id)
            .map(|(udid, _)| udid.clone())
            .collect();
        for udid in &udids {
            maps.device_provider.remove(udid);
            maps.status.remove(udid);
        }
        drop(maps);

        if !udids.is_empty() {
            tracing::info!(
                provider = provider_id,
                devices = udids.len(),
                "Unbound devices of dead provider"
            );
        }
    }

    // --- device bindings ---

    /// Bind a device to a provider and create a fresh status entry
    pub async fn bind_device(&self, udid: &str, provider_id: i64) {
        let mut maps = self.inner.write().await;
        maps.device_provider.insert(udid.to_string(), provider_id);
        maps.status.insert(udid.to_string(), DeviceStatus::default());
        drop(maps);
        tracing::info!(udid = %censor_udid(udid), provider = provider_id, "Device bound");
    }

    /// Unbind a device; status goes with the binding, info stays
    pub async fn unbind_device(&self, udid: &str) {
        let mut maps = self.inner.write().await;
        maps.device_provider.remove(udid);
        maps.status.remove(udid);
        drop(maps);
        tracing::info!(udid = %censor_udid(udid), "Device unbound");
    }

    pub async fn provider_for(&self, udid: &str) -> Option<i64> {
        self.inner.read().await.device_provider.get(udid).copied()
    }

    // --- status and info ---

    /// Update one subsystem flag; no-op when the device is unbound
    pub async fn set_status(&self, udid: &str, subsystem: Subsystem, up: bool) {
        let mut maps = self.inner.write().await;
        if let Some(status) = maps.status.get_mut(udid) {
            status.set(subsystem, up);
        }
    }

    pub async fn status(&self, udid: &str) -> Option<DeviceStatus> {
        self.inner.read().await.status.get(udid).copied()
    }

    pub async fn info(&self, udid: &str) -> DeviceInfo {
        self.inner.read().await.info.get(udid).cloned().unwrap_or_default()
    }

    pub async fn set_orientation(&self, udid: &str, orientation: &str) {
        let mut maps = self.inner.write().await;
        maps.info.entry(udid.to_string()).or_default().orientation = orientation.to_string();
    }

    pub async fn set_capabilities(&self, udid: &str, raw_json: &str) {
        let mut maps = self.inner.write().await;
        maps.info
            .entry(udid.to_string())
            .or_default()
            .capabilities_json = raw_json.to_string();
    }

    pub async fn set_geometry(&self, udid: &str, geometry: Geometry) {
        let mut maps = self.inner.write().await;
        maps.info.entry(udid.to_string()).or_default().geometry = Some(geometry);
    }

    // --- viewer video connections ---

    /// Attach a viewer connection, evicting any previous one
    ///
    /// The previous connection's teardown hook runs exactly once, after
    /// the lock is released, so a reloading viewer cleanly replaces its
    /// predecessor.
    pub async fn attach_viewer(&self, udid: &str, conn: ViewerConn) {
        let old = {
            let mut maps = self.inner.write().await;
            maps.viewers.insert(udid.to_string(), conn)
        };
        if let Some(old) = old {
            tracing::info!(udid = %censor_udid(udid), rid = %old.rid, "Evicting previous viewer");
            old.run_done();
        }
    }

    pub async fn viewer(&self, udid: &str) -> Option<ViewerConn> {
        self.inner.read().await.viewers.get(udid).cloned()
    }

    /// Detach the viewer connection if `rid` still owns it
    ///
    /// A stale rid (the session was already evicted by a newer one) leaves
    /// the current connection untouched.
    pub async fn detach_viewer(&self, udid: &str, rid: &str) {
        let removed = {
            let mut maps = self.inner.write().await;
            match maps.viewers.get(udid) {
                Some(current) if current.rid == rid => maps.viewers.remove(udid),
                _ => None,
            }
        };
        if let Some(conn) = removed {
            conn.run_done();
        }
    }

    // --- notice connections ---

    pub async fn attach_notice(&self, udid: &str, conn: NoticeConn) {
        self.inner
            .write()
            .await
            .notices
            .insert(udid.to_string(), conn);
    }

    pub async fn notice(&self, udid: &str) -> Option<NoticeConn> {
        self.inner.read().await.notices.get(udid).cloned()
    }

    pub async fn detach_notice(&self, udid: &str) {
        self.inner.write().await.notices.remove(udid);
    }

    // --- relay control queues ---

    pub async fn add_control_queue(&self, udid: &str, queue: mpsc::UnboundedSender<RelayControl>) {
        self.inner
            .write()
            .await
            .queues
            .insert(udid.to_string(), queue);
    }

    pub async fn remove_control_queue(&self, udid: &str) {
        self.inner.write().await.queues.remove(udid);
    }

    /// Push a kick into the device's active relay pipeline, if any
    pub async fn kick(&self, udid: &str) -> bool {
        let queue = self.inner.read().await.queues.get(udid).cloned();
        match queue {
            Some(queue) => queue.send(RelayControl::Kick).is_ok(),
            None => false,
        }
    }

    // --- pacing ---

    /// Create and register the pacing state for a device's relay pipeline
    pub async fn register_pace(&self, udid: &str, unmetered_bps: i64) -> Arc<PaceState> {
        let pace = Arc::new(PaceState::new(unmetered_bps));
        self.inner
            .write()
            .await
            .pace
            .insert(udid.to_string(), Arc::clone(&pace));
        pace
    }

    pub async fn remove_pace(&self, udid: &str) {
        self.inner.write().await.pace.remove(udid);
    }

    /// Route a provider bandwidth report to the device's pacing state
    pub async fn update_pace(&self, udid: &str, bps: i64, avg_frame: i64) {
        let pace = self.inner.read().await.pace.get(udid).cloned();
        match pace {
            Some(pace) => pace.update(bps, avg_frame),
            None => {
                tracing::debug!(
                    udid = %censor_udid(udid),
                    "Bandwidth report for device with no active relay"
                );
            }
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
