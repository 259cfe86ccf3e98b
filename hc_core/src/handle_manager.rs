use std::sync::{Arc, RwLock};
use tracing::{Level, span};

/// Opaque, type-tagged object handle handed across the C API boundary.
/// The `magic` tag guards against stale or forged handles: a slot index can
/// be reused, but only with a fresh magic value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handle {
    pub id: u64,
    pub magic: u64,
}

struct HandleValue<T> {
    magic: u64,
    value: Option<Arc<T>>,
}

/// Slot table mapping handles to shared objects. Handles of distinct kinds
/// live in distinct `HandleManager` instances, so a call handle can never
/// resolve against the websocket table.
pub struct HandleManager<T> {
    handles: RwLock<Vec<HandleValue<T>>>,
}

impl<T> Default for HandleManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleManager<T> {
    pub const fn new() -> Self {
        HandleManager {
            handles: RwLock::new(Vec::new()),
        }
    }

    pub fn add_handle(&self, obj: Arc<T>) -> Handle {
        let span = span!(target: "handle_manager", Level::INFO, "HandleManager::add_handle");
        let _enter = span.enter();
        let mut handles = self.handles.write().unwrap();

        let magic = rand::random::<u64>();
        // Reuse a freed slot when one exists, otherwise grow the table.
        let id = match handles.iter().position(|slot| slot.value.is_none()) {
            Some(free) => {
                handles[free] = HandleValue {
                    magic,
                    value: Some(obj),
                };
                free as u64
            }
            None => {
                handles.push(HandleValue {
                    magic,
                    value: Some(obj),
                });
                (handles.len() - 1) as u64
            }
        };

        let handle = Handle { id, magic };
        tracing::trace!(target: "handle_manager", "Handle {:?} added successfully", handle);
        handle
    }

    pub fn get_obj(&self, handle: Handle) -> Option<Arc<T>> {
        let span = span!(target: "handle_manager", Level::INFO, "HandleManager::get_obj", handle_id = handle.id, handle_magic = handle.magic);
        let _enter = span.enter();

        let index = handle.id as usize;
        let handles = self.handles.read().unwrap();

        if index >= handles.len() {
            tracing::error!("Handle index out of bounds, cannot get object");
            return None;
        }

        let slot = &handles[index];
        match slot.value.as_ref() {
            Some(val) if slot.magic == handle.magic => Some(val.clone()),
            Some(_) => {
                tracing::error!("Handle magic mismatch, cannot get object");
                None
            }
            None => {
                tracing::error!("Handle not found, cannot get object");
                None
            }
        }
    }

    pub fn delete_handle(&self, handle: Handle) -> bool {
        let span = span!(target: "handle_manager", Level::INFO, "HandleManager::delete_handle", handle_id = handle.id, handle_magic = handle.magic);
        let _enter = span.enter();
        let index = handle.id as usize;
        let mut handles = self.handles.write().unwrap();

        if index >= handles.len() {
            tracing::error!("Handle index out of bounds, cannot delete handle");
            return false;
        }

        let slot = &mut handles[index];
        if slot.magic != handle.magic {
            tracing::error!("Handle magic mismatch, cannot delete handle");
            return false;
        }

        match slot.value.take() {
            Some(_) => {
                tracing::trace!(target: "handle_manager", "Handle deleted successfully");
                true
            }
            None => {
                tracing::error!("Handle not found, cannot delete handle");
                false
            }
        }
    }
}
