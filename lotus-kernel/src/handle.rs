//! Per-process handle tables.
//!
//! Handles are opaque 32-bit tokens. Live handles are never reused; the
//! allocator is a monotonic counter, so a closed handle stays dead for the
//! lifetime of the process.

use std::collections::BTreeMap;

use lotus_abi::result::{ERR_INVALID_HANDLE, ERR_OUT_OF_HANDLES};
use lotus_abi::Handle;

use crate::object::{HandleKind, Object};
use crate::SvcResult;

/// First handle value handed out; zero stays invalid.
const FIRST_HANDLE: Handle = 0x100;

/// Most handles a single table may hold at once.
const MAX_HANDLES: usize = 0x1000;

pub struct HandleTable {
    handles: BTreeMap<Handle, Object>,
    next: Handle,
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            handles: BTreeMap::new(),
            next: FIRST_HANDLE,
        }
    }

    /// Insert `object` and return its fresh handle.
    pub fn create(&mut self, object: Object) -> SvcResult<Handle> {
        if self.handles.len() >= MAX_HANDLES {
            return Err(ERR_OUT_OF_HANDLES);
        }
        let handle = self.next;
        self.next += 1;
        self.handles.insert(handle, object);
        Ok(handle)
    }

    /// Look a handle up, any variant.
    pub fn get(&self, handle: Handle) -> Option<Object> {
        self.handles.get(&handle).cloned()
    }

    /// Look a handle up and require a specific variant.
    pub fn get_kind(&self, handle: Handle, kind: HandleKind) -> Option<Object> {
        self.get(handle).filter(|o| o.kind() == kind)
    }

    /// Remove a handle, dropping the table's reference to the object.
    pub fn close(&mut self, handle: Handle) -> SvcResult<Object> {
        self.handles.remove(&handle).ok_or(ERR_INVALID_HANDLE)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Handle, &Object)> {
        self.handles.iter()
    }

    /// Drop every handle at once; used during process teardown.
    pub fn clear(&mut self) {
        self.handles.clear();
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        HandleTable::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Event;
    use lotus_abi::ResetType;
    use std::sync::Arc;

    fn event_object() -> Object {
        Object::Event(Arc::new(Event::new(ResetType::OneShot, "test".into())))
    }

    #[test]
    fn create_get_close() {
        let mut table = HandleTable::new();
        let h = table.create(event_object()).unwrap();
        assert!(h >= FIRST_HANDLE);
        assert!(table.get(h).is_some());
        assert!(table.close(h).is_ok());
        assert!(table.get(h).is_none());
        assert_eq!(table.close(h).unwrap_err(), ERR_INVALID_HANDLE);
    }

    #[test]
    fn handles_are_never_reused() {
        let mut table = HandleTable::new();
        let a = table.create(event_object()).unwrap();
        table.close(a).unwrap();
        let b = table.create(event_object()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut table = HandleTable::new();
        let h = table.create(event_object()).unwrap();
        assert!(table.get_kind(h, HandleKind::Event).is_some());
        assert!(table.get_kind(h, HandleKind::Mutex).is_none());
    }
}
