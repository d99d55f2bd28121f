//! Allocates the three independent identifier spaces (definition, request, event)
//! and maps inbound request/event IDs back to the manager-internal index that owns
//! them.
//!
//! Owners are recorded as indices into the owning manager's `Vec`, never as
//! pointers: a `Vec` can reallocate and move its backing storage on growth, but an
//! index survives that move unchanged.

use rustc_hash::FxHashMap;

/// Request IDs are handed out in widely spaced buckets so the vendor library never
/// sees two adjacent IDs. The rationale behind the spacing is not documented
/// anywhere reachable; it is preserved rather than second-guessed.
const REQUEST_ID_BUCKET: u32 = 1000;

/// Event IDs start here to stay clear of any user-chosen IDs the library might
/// accept directly in the future.
const EVENT_ID_BASE: u32 = 1000;

#[derive(Default)]
pub struct Registry {
    next_definition_id: u32,
    next_request_id: u32,
    next_event_id: u32,
    request_owners: FxHashMap<u32, usize>,
    event_owners: FxHashMap<u32, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            next_event_id: EVENT_ID_BASE,
            ..Default::default()
        }
    }

    /// Allocates the next definition ID. Monotonic, never reused.
    pub fn next_definition_id(&mut self) -> u32 {
        let id = self.next_definition_id;
        self.next_definition_id += 1;
        id
    }

    /// Allocates the next request ID, widely spaced from the previous one.
    pub fn next_request_id(&mut self) -> u32 {
        self.next_request_id += REQUEST_ID_BUCKET;
        self.next_request_id
    }

    /// Allocates the next event ID.
    pub fn next_event_id(&mut self) -> u32 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }

    /// Records which Variable Manager index owns a request ID.
    pub fn register_request_owner(&mut self, request_id: u32, owner_index: usize) {
        self.request_owners.insert(request_id, owner_index);
    }

    /// Looks up the Variable Manager index that owns a request ID, if any.
    pub fn lookup_request_owner(&self, request_id: u32) -> Option<usize> {
        self.request_owners.get(&request_id).copied()
    }

    /// Records which Event Manager index owns an event ID.
    pub fn register_event_owner(&mut self, event_id: u32, owner_index: usize) {
        self.event_owners.insert(event_id, owner_index);
    }

    /// Looks up the Event Manager index that owns an event ID, if any.
    pub fn lookup_event_owner(&self, event_id: u32) -> Option<usize> {
        self.event_owners.get(&event_id).copied()
    }

    /// Forgets an event ID's owner, used by `unsubscribe`/`unsubscribe_all`.
    pub fn forget_event_owner(&mut self, event_id: u32) {
        self.event_owners.remove(&event_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_widely_spaced_and_monotonic() {
        let mut reg = Registry::new();
        let a = reg.next_request_id();
        let b = reg.next_request_id();
        let c = reg.next_request_id();
        assert_eq!(a, 1000);
        assert_eq!(b, 2000);
        assert_eq!(c, 3000);
    }

    #[test]
    fn event_ids_start_at_the_high_base() {
        let mut reg = Registry::new();
        assert_eq!(reg.next_event_id(), EVENT_ID_BASE);
        assert_eq!(reg.next_event_id(), EVENT_ID_BASE + 1);
    }

    #[test]
    fn lookup_miss_returns_none_without_panicking() {
        let reg = Registry::new();
        assert_eq!(reg.lookup_request_owner(99_999), None);
        assert_eq!(reg.lookup_event_owner(99_999), None);
    }

    #[test]
    fn definition_ids_are_never_reused() {
        let mut reg = Registry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(reg.next_definition_id()));
        }
    }
}
