//! HMR wiring (spec §4.7 HMR state machine / §6.5 wire format):
//! classifies a changed VFS path into `{type, path, timestamp}`,
//! fans it out over an internal `tokio::sync::broadcast` channel, and
//! additionally delivers it to a registered `postMessage`-equivalent
//! target-window callback, swallowing delivery failures.
//!
//! Watches [`Vfs::watch`] rather than the `notify` crate: this
//! workspace has no real OS filesystem underneath the VFS abstraction
//! (the Service Worker bridge's embedder supplies its own VFS backed
//! by IndexedDB or similar), so the VFS's own change notifications are
//! the only genuine signal available — `notify` would have to watch a
//! real disk that isn't the one requests are served from.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use almostnode_core::model::HmrUpdate;
use almostnode_vfs::{Vfs, WatchHandle, WatchOptions};

/// The registered `postMessage`-equivalent target: whatever the
/// embedder wired up to receive `{channel: 'next-hmr', ...}` messages
/// (spec §6.5). Held as a plain callback rather than a real `Window`
/// handle since this crate has no browser to post to directly.
pub type HmrTarget = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Owns the broadcast channel HMR updates fan out over, the optional
/// target-window callback, and the live VFS watch handle. Dropping
/// this (or calling [`HmrHub::stop`]) closes the watch.
pub struct HmrHub {
    sender: tokio::sync::broadcast::Sender<HmrUpdate>,
    target: parking_lot::Mutex<Option<HmrTarget>>,
    watch_handle: parking_lot::Mutex<Option<Box<dyn WatchHandle>>>,
}

impl HmrHub {
    pub fn new() -> Arc<Self> {
        let (sender, _receiver) = tokio::sync::broadcast::channel(256);
        Arc::new(HmrHub {
            sender,
            target: parking_lot::Mutex::new(None),
            watch_handle: parking_lot::Mutex::new(None),
        })
    }

    /// Subscribes to HMR updates, e.g. for a long-poll endpoint or an
    /// in-process streaming bridge.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<HmrUpdate> {
        self.sender.subscribe()
    }

    /// Registers (or replaces) the target-window callback.
    pub fn set_target(&self, target: HmrTarget) {
        *self.target.lock() = Some(target);
    }

    /// Starts watching `root` recursively on `vfs`, emitting a
    /// classified [`HmrUpdate`] on every change. Call once per
    /// `DevServer` lifetime; calling again replaces the previous watch.
    pub fn start(self: &Arc<Self>, vfs: &dyn Vfs, root: &str) {
        let hub = self.clone();
        let handle = vfs.watch(
            root,
            WatchOptions { recursive: true },
            Arc::new(move |_event, path| hub.emit(path)),
        );
        *self.watch_handle.lock() = Some(handle);
    }

    pub fn stop(&self) {
        if let Some(handle) = self.watch_handle.lock().take() {
            handle.close();
        }
    }

    /// Classifies `path` and delivers it to both the broadcast channel
    /// and the registered target, per spec §4.7's "Delivery: always via
    /// an internal event emitter; additionally postMessage(...) to the
    /// registered target window" rule. Delivery failures (no
    /// subscribers, no target registered) are swallowed — HMR is
    /// best-effort, never a request-path failure.
    pub fn emit(&self, path: &str) {
        let update = HmrUpdate::classify(path, now_millis());
        let _ = self.sender.send(update.clone());
        if let Some(target) = self.target.lock().as_ref() {
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                target(update.to_wire_json());
            }));
        } else {
            tracing::warn!(path, "HMR update emitted with no registered target window");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use almostnode_core::model::HmrUpdateKind;
    use almostnode_vfs::InMemoryVfs;

    #[tokio::test]
    async fn write_through_vfs_emits_classified_update() {
        let vfs = InMemoryVfs::new();
        vfs.seed_dir("/pages");
        let hub = HmrHub::new();
        let mut rx = hub.subscribe();
        hub.start(&vfs, "/pages");

        vfs.write_file("/pages/index.tsx", b"export default () => null;").unwrap();

        let update = rx.recv().await.unwrap();
        assert!(matches!(update.kind, HmrUpdateKind::Update));
        assert_eq!(update.path, "/pages/index.tsx");
    }

    #[tokio::test]
    async fn target_callback_receives_wire_shaped_message() {
        let vfs = InMemoryVfs::new();
        vfs.seed_dir("/public");
        let hub = HmrHub::new();
        hub.start(&vfs, "/public");

        let received: Arc<parking_lot::Mutex<Option<serde_json::Value>>> =
            Arc::new(parking_lot::Mutex::new(None));
        let received_clone = received.clone();
        hub.set_target(Arc::new(move |msg| *received_clone.lock() = Some(msg)));

        vfs.write_file("/public/logo.png", b"\x89PNG").unwrap();

        let msg = received.lock().clone().unwrap();
        assert_eq!(msg["channel"], "next-hmr");
        assert_eq!(msg["type"], "full-reload");
    }

    #[test]
    fn delivery_with_no_target_does_not_panic() {
        let vfs = InMemoryVfs::new();
        vfs.seed_dir("/pages");
        let hub = HmrHub::new();
        hub.start(&vfs, "/pages");
        vfs.write_file("/pages/a.ts", b"export {};").unwrap();
    }
}
