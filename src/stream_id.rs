//! Stream id allocator (C4, spec §4.7): starts at 1 (client, odd) or 2
//! (server, even), advances by `wrapping_add(2)`, and probes forward past
//! ids already present in the stream table instead of assuming none
//! collide.

use crate::frame::MAX_STREAM_ID;

/// Which side of the connection this engine instance is acting as, for the
/// purpose of stream id parity (spec §4.7, invariant 3 in spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Monotonic odd/even stream id allocator that wraps at 2^31 and skips ids
/// already occupied in the stream table (spec invariant: "at most one stream
/// object exists per stream id at any instant").
pub struct StreamIdAllocator {
    next: u32,
    role: Role,
}

impl StreamIdAllocator {
    pub fn new(role: Role) -> Self {
        Self {
            next: match role {
                Role::Client => 1,
                Role::Server => 2,
            },
            role,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Allocate the next free stream id, probing forward over ids already
    /// present in `is_occupied` until a free one is found. The wrap at
    /// `MAX_STREAM_ID` skips back to the role's starting parity rather than
    /// to zero, since zero is reserved for connection-level frames (spec
    /// §3).
    pub fn allocate(&mut self, is_occupied: impl Fn(u32) -> bool) -> u32 {
        loop {
            let candidate = self.next;
            self.advance();
            if !is_occupied(candidate) {
                return candidate;
            }
        }
    }

    fn advance(&mut self) {
        let bumped = self.next.wrapping_add(2);
        self.next = if bumped == 0 || bumped > MAX_STREAM_ID {
            match self.role {
                Role::Client => 1,
                Role::Server => 2,
            }
        } else {
            bumped
        };
    }

    /// Whether `id` has the parity this allocator's role originates (used by
    /// the connection driver to reject ids the peer should never have
    /// produced — spec §3 invariant 3).
    pub fn is_own_parity(&self, id: u32) -> bool {
        match self.role {
            Role::Client => id % 2 == 1,
            Role::Server => id % 2 == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn client_allocates_odd_ids() {
        let mut alloc = StreamIdAllocator::new(Role::Client);
        let a = alloc.allocate(|_| false);
        let b = alloc.allocate(|_| false);
        assert_eq!(a, 1);
        assert_eq!(b, 3);
        assert!(alloc.is_own_parity(a));
        assert!(alloc.is_own_parity(b));
    }

    #[test]
    fn server_allocates_even_ids() {
        let mut alloc = StreamIdAllocator::new(Role::Server);
        let a = alloc.allocate(|_| false);
        let b = alloc.allocate(|_| false);
        assert_eq!(a, 2);
        assert_eq!(b, 4);
    }

    #[test]
    fn skips_occupied_ids() {
        let mut alloc = StreamIdAllocator::new(Role::Client);
        let occupied: HashSet<u32> = [1, 3].into_iter().collect();
        let id = alloc.allocate(|id| occupied.contains(&id));
        assert_eq!(id, 5);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let mut alloc = StreamIdAllocator::new(Role::Client);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = alloc.allocate(|id| seen.contains(&id));
            assert!(seen.insert(id), "duplicate id allocated: {id}");
            assert_eq!(id % 2, 1);
        }
    }

    #[test]
    fn wraps_at_max_stream_id() {
        let mut alloc = StreamIdAllocator::new(Role::Client);
        alloc.next = MAX_STREAM_ID - 1; // odd value close to the ceiling
        let a = alloc.allocate(|_| false);
        assert_eq!(a, MAX_STREAM_ID - 1);
        let b = alloc.allocate(|_| false);
        assert_eq!(b, 1);
    }
}
