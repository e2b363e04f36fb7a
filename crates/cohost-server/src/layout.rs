//! State synchronization surface for display layout preferences.
//!
//! The in-memory value is authoritative. Durable storage is read once at
//! startup and written on every successful update; a failed write is logged
//! and the update still takes effect.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use cohost_core::events::OverlayEvent;
use cohost_core::layout::{LayoutPatch, LayoutSettings};

use crate::client::ClientRegistry;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Durable storage collaborator for layout preferences.
pub trait LayoutStore: Send + Sync {
    /// Read the stored value, if any. Called once at startup.
    fn load(&self) -> Result<Option<LayoutPatch>, StoreError>;
    /// Persist the full merged value. Called on every successful update.
    fn save(&self, settings: &LayoutSettings) -> Result<(), StoreError>;
}

/// JSON file store, one pretty-printed document.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl LayoutStore for JsonFileStore {
    fn load(&self) -> Result<Option<LayoutPatch>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&self.path)?;
        // Stored files from older versions may be partial; parse as a patch.
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, settings: &LayoutSettings) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(settings)?)?;
        Ok(())
    }
}

/// Load stored preferences merged over defaults. Read/parse failures fall
/// back to defaults and are logged, never fatal.
pub fn load_initial(store: &dyn LayoutStore) -> LayoutSettings {
    match store.load() {
        Ok(Some(patch)) => LayoutSettings::default().merge(&patch),
        Ok(None) => LayoutSettings::default(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to load layout settings, using defaults");
            LayoutSettings::default()
        }
    }
}

/// Owns the shared layout value; all mutation funnels through `update`.
pub struct LayoutSurface {
    // Updates hold the lock through merge + persist + broadcast, so
    // concurrent partial merges cannot lose keys.
    current: Mutex<LayoutSettings>,
    store: Arc<dyn LayoutStore>,
    registry: Arc<ClientRegistry>,
}

impl LayoutSurface {
    pub fn new(
        initial: LayoutSettings,
        store: Arc<dyn LayoutStore>,
        registry: Arc<ClientRegistry>,
    ) -> Self {
        Self {
            current: Mutex::new(initial),
            store,
            registry,
        }
    }

    /// Current in-memory value. Never touches durable storage.
    pub async fn get(&self) -> LayoutSettings {
        *self.current.lock().await
    }

    /// Merge `patch` over the current value, persist, push the full merged
    /// value to every display, and return it.
    pub async fn update(&self, patch: &LayoutPatch) -> LayoutSettings {
        let mut current = self.current.lock().await;
        let merged = current.merge(patch);
        *current = merged;

        if let Err(e) = self.store.save(&merged) {
            tracing::warn!(error = %e, "failed to persist layout settings");
        }

        match serde_json::to_string(&OverlayEvent::LayoutUpdate { payload: merged }) {
            Ok(json) => {
                self.registry.broadcast_all(&json);
            }
            Err(e) => tracing::error!(error = %e, "failed to serialize layout update"),
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory store with a switchable failure mode.
    struct MemStore {
        saved: std::sync::Mutex<Option<LayoutSettings>>,
        fail_saves: AtomicBool,
    }

    impl MemStore {
        fn new() -> Self {
            Self {
                saved: std::sync::Mutex::new(None),
                fail_saves: AtomicBool::new(false),
            }
        }
    }

    impl LayoutStore for MemStore {
        fn load(&self) -> Result<Option<LayoutPatch>, StoreError> {
            Ok(None)
        }

        fn save(&self, settings: &LayoutSettings) -> Result<(), StoreError> {
            if self.fail_saves.load(Ordering::Relaxed) {
                return Err(StoreError::Io(std::io::Error::other("disk full")));
            }
            *self.saved.lock().unwrap() = Some(*settings);
            Ok(())
        }
    }

    fn surface() -> (Arc<LayoutSurface>, Arc<MemStore>, Arc<ClientRegistry>) {
        let registry = Arc::new(ClientRegistry::new(32));
        let store = Arc::new(MemStore::new());
        let surface = Arc::new(LayoutSurface::new(
            LayoutSettings::default(),
            Arc::clone(&store) as Arc<dyn LayoutStore>,
            Arc::clone(&registry),
        ));
        (surface, store, registry)
    }

    #[tokio::test]
    async fn update_merges_persists_and_returns() {
        let (surface, store, _registry) = surface();

        let merged = surface
            .update(&LayoutPatch {
                show_face_cam: Some(false),
                ..Default::default()
            })
            .await;

        assert!(!merged.show_face_cam);
        assert!(merged.show_hand_cam);
        assert!(merged.show_room_cam);
        assert_eq!(*store.saved.lock().unwrap(), Some(merged));
        assert_eq!(surface.get().await, merged);
    }

    #[tokio::test]
    async fn disjoint_updates_both_take_effect() {
        let (surface, _store, _registry) = surface();

        surface
            .update(&LayoutPatch {
                show_face_cam: Some(false),
                ..Default::default()
            })
            .await;
        let merged = surface
            .update(&LayoutPatch {
                show_room_cam: Some(false),
                ..Default::default()
            })
            .await;

        assert!(!merged.show_face_cam);
        assert!(merged.show_hand_cam);
        assert!(!merged.show_room_cam);
    }

    #[tokio::test]
    async fn update_broadcasts_full_value() {
        let (surface, _store, registry) = surface();
        let (_id, mut rx) = registry.register();

        surface
            .update(&LayoutPatch {
                show_hand_cam: Some(false),
                ..Default::default()
            })
            .await;

        let msg: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(msg["type"], "layout-update");
        assert_eq!(msg["payload"]["showFaceCam"], true);
        assert_eq!(msg["payload"]["showHandCam"], false);
        assert_eq!(msg["payload"]["showRoomCam"], true);
    }

    #[tokio::test]
    async fn persistence_failure_keeps_memory_value() {
        let (surface, store, _registry) = surface();
        store.fail_saves.store(true, Ordering::Relaxed);

        let merged = surface
            .update(&LayoutPatch {
                show_face_cam: Some(false),
                ..Default::default()
            })
            .await;

        assert!(!merged.show_face_cam);
        assert_eq!(surface.get().await, merged);
        assert!(store.saved.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn get_does_not_touch_store() {
        let (surface, store, _registry) = surface();
        store.fail_saves.store(true, Ordering::Relaxed);
        // Would panic inside the store if get() called load/save
        let value = surface.get().await;
        assert_eq!(value, LayoutSettings::default());
    }

    #[test]
    fn json_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("cohost-layout-{}", uuid::Uuid::now_v7()));
        let store = JsonFileStore::new(dir.join("layout-settings.json"));

        assert!(store.load().unwrap().is_none());

        let settings = LayoutSettings {
            show_face_cam: false,
            show_hand_cam: true,
            show_room_cam: false,
        };
        store.save(&settings).unwrap();

        let patch = store.load().unwrap().unwrap();
        assert_eq!(LayoutSettings::default().merge(&patch), settings);
    }

    #[test]
    fn load_initial_tolerates_corrupt_file() {
        let dir = std::env::temp_dir().join(format!("cohost-layout-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout-settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(path);
        assert_eq!(load_initial(&store), LayoutSettings::default());
    }

    #[test]
    fn load_initial_merges_partial_file_over_defaults() {
        let dir = std::env::temp_dir().join(format!("cohost-layout-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("layout-settings.json");
        std::fs::write(&path, r#"{"showRoomCam":false}"#).unwrap();

        let store = JsonFileStore::new(path);
        let initial = load_initial(&store);
        assert!(initial.show_face_cam);
        assert!(!initial.show_room_cam);
    }
}
