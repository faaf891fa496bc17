//
//   This Source Code Form is subject to the terms of the Mozilla Public
//   License, v. 2.0. If a copy of the MPL was not distributed with this
//   file, You can obtain one at http://mozilla.org/MPL/2.0/.
//

use std::collections::HashSet;
use std::sync::Mutex;

use mqtt_wire::v3::identifier::PacketIdentifier;

use crate::error::MqttError;

/// Dispenses message identifiers for one session.
///
/// Identifiers count up from 1, wrap at 65535 back to 1 and never take the
/// value zero. An identifier stays reserved until it is released, so a
/// value that is live in any in-flight table is skipped over. The usage
/// label only shows up in logs.
pub(crate) struct PacketIdentifierAllocator {
    inner: Mutex<AllocatorState>,
}

struct AllocatorState {
    next: u16,
    live: HashSet<u16>,
}

impl PacketIdentifierAllocator {
    pub(crate) fn new() -> PacketIdentifierAllocator {
        PacketIdentifierAllocator {
            inner: Mutex::new(AllocatorState {
                next: 1,
                live: HashSet::new(),
            }),
        }
    }

    pub(crate) fn allocate(&self, usage: &'static str) -> Result<PacketIdentifier, MqttError> {
        let mut state = self.inner.lock().expect("allocator lock poisoned");

        for _ in 0..u16::MAX {
            let candidate = state.next;
            state.next = if candidate == u16::MAX {
                1
            } else {
                candidate + 1
            };

            if state.live.insert(candidate) {
                tracing::trace!(usage, id = candidate, "Allocated packet identifier");
                return Ok(PacketIdentifier::new(candidate)
                    .expect("allocator never produces zero identifiers"));
            }
        }

        Err(MqttError::PacketIdentifiersExhausted)
    }

    pub(crate) fn release(&self, id: PacketIdentifier) {
        let mut state = self.inner.lock().expect("allocator lock poisoned");

        if state.live.remove(&id.get()) {
            tracing::trace!(id = id.get(), "Released packet identifier");
        }
    }

    pub(crate) fn is_live(&self, id: PacketIdentifier) -> bool {
        self.inner
            .lock()
            .expect("allocator lock poisoned")
            .live
            .contains(&id.get())
    }

    /// Drops every reservation. Used when the session is torn down.
    pub(crate) fn reset(&self) {
        let mut state = self.inner.lock().expect("allocator lock poisoned");
        state.live.clear();
        state.next = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::PacketIdentifierAllocator;

    #[test]
    fn check_identifiers_count_up_from_one() {
        let allocator = PacketIdentifierAllocator::new();

        assert_eq!(allocator.allocate("publish").unwrap().get(), 1);
        assert_eq!(allocator.allocate("publish").unwrap().get(), 2);
        assert_eq!(allocator.allocate("subscriptions").unwrap().get(), 3);
    }

    #[test]
    fn check_live_identifiers_are_skipped() {
        let allocator = PacketIdentifierAllocator::new();

        let first = allocator.allocate("publish").unwrap();
        let second = allocator.allocate("publish").unwrap();
        allocator.release(first);

        // The counter has moved on; the released value is handed out again
        // only after a full wrap.
        let third = allocator.allocate("publish").unwrap();
        assert_eq!(third.get(), 3);
        assert!(allocator.is_live(second));
        assert!(!allocator.is_live(first));
    }

    #[test]
    fn check_wrap_at_maximum_skips_zero() {
        let allocator = PacketIdentifierAllocator::new();

        {
            let mut state = allocator.inner.lock().unwrap();
            state.next = u16::MAX;
        }

        assert_eq!(allocator.allocate("publish").unwrap().get(), u16::MAX);
        assert_eq!(allocator.allocate("publish").unwrap().get(), 1);
    }

    #[test]
    fn check_exhaustion_is_reported() {
        let allocator = PacketIdentifierAllocator::new();

        {
            let mut state = allocator.inner.lock().unwrap();
            for id in 1..=u16::MAX {
                state.live.insert(id);
            }
        }

        allocator.allocate("publish").unwrap_err();
    }
}
