//! Identity registry: stable surrogate ids for host allocations
//!
//! Maps a live host allocation to the surrogate id it was first assigned.
//! Keys are allocation addresses (FNV-hashed, like the other u64-keyed
//! tables in this crate) and every entry keeps only a [`Weak`] handle, so the
//! registry never extends a traced value's lifetime.
//!
//! An address can only be recycled by the allocator once the previous
//! allocation is gone. A live weak handle therefore proves the entry still
//! belongs to the same value; a dead one marks the entry stale.

use crate::value::{HostObject, ObjectRef};
use fnv::FnvHashMap;
use std::rc::{Rc, Weak};

/// Registry compaction starts once this many entries exist
const INITIAL_PRUNE_THRESHOLD: usize = 1024;

struct Entry {
    value: Weak<dyn HostObject>,
    id: u64,
}

/// Weak identity map with a monotonic id sequence
///
/// The recorder owns two of these: one for object identities and one for
/// function descriptions.
pub struct IdentityRegistry {
    entries: FnvHashMap<usize, Entry>,
    next_id: u64,
    prune_at: usize,
}

fn address_of(value: &ObjectRef) -> usize {
    Rc::as_ptr(value) as *const () as usize
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self {
            entries: FnvHashMap::default(),
            next_id: 0,
            prune_at: INITIAL_PRUNE_THRESHOLD,
        }
    }

    /// Return the id of `value`, assigning the next id on first sight
    ///
    /// The boolean is `true` when the id was freshly assigned. Never fails,
    /// and is safe to call while another id is being described.
    pub fn resolve_or_assign(&mut self, value: &ObjectRef) -> (u64, bool) {
        if let Some(id) = self.lookup(value) {
            return (id, false);
        }

        if self.entries.len() >= self.prune_at {
            self.prune();
            self.prune_at = (self.entries.len() * 2).max(INITIAL_PRUNE_THRESHOLD);
        }

        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            address_of(value),
            Entry {
                value: Rc::downgrade(value),
                id,
            },
        );
        (id, true)
    }

    /// Id previously assigned to `value`, if it is still tracked
    pub fn lookup(&self, value: &ObjectRef) -> Option<u64> {
        self.entries
            .get(&address_of(value))
            .filter(|entry| entry.value.strong_count() > 0)
            .map(|entry| entry.id)
    }

    /// Drop entries whose values are no longer alive
    ///
    /// Ids are never handed out again; only the map shrinks.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.value.strong_count() > 0);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "pruned identity registry");
        }
        removed
    }

    /// Number of ids assigned so far
    pub fn assigned(&self) -> u64 {
        self.next_id
    }

    /// Number of entries currently held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
