//! System event bits
//!
//! A lock-free event group shared between tasks. Producers set bits, the
//! interested consumer takes (reads and clears) them. Bits are sticky until
//! consumed, so a slow consumer never misses an edge, only coalesces repeats.

use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    /// Event bits published by the modem orchestrator and its clients
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SystemEvents: u32 {
        /// Cellular link is attached with an active PDP context
        const CELLULAR_READY = 1 << 0;
        /// A client requested a fresh GNSS fix out of cycle
        const GNSS_UPDATE_REQ = 1 << 1;
        /// New telemetry records are queued for MQTT publication
        const MQTT_DATA_READY = 1 << 2;
        /// The orchestrator hit an unrecoverable modem error
        const ERROR_DETECTED = 1 << 3;
        /// The modem lifecycle state changed
        const STATUS_CHANGE = 1 << 4;
    }
}

/// Atomic event group
///
/// Safe to share between embassy tasks and interrupt context.
pub struct EventGroup {
    bits: AtomicU32,
}

impl EventGroup {
    /// Create an empty event group
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Set the given event bits
    pub fn set(&self, events: SystemEvents) {
        self.bits.fetch_or(events.bits(), Ordering::Release);
    }

    /// Clear the given event bits
    pub fn clear(&self, events: SystemEvents) {
        self.bits.fetch_and(!events.bits(), Ordering::Release);
    }

    /// Check whether all of the given bits are currently set
    pub fn contains(&self, events: SystemEvents) -> bool {
        SystemEvents::from_bits_truncate(self.bits.load(Ordering::Acquire)).contains(events)
    }

    /// Read and clear the intersection with `mask`
    ///
    /// Returns the bits that were set. Bits outside `mask` are left alone.
    pub fn take(&self, mask: SystemEvents) -> SystemEvents {
        let taken = self.bits.fetch_and(!mask.bits(), Ordering::AcqRel);
        SystemEvents::from_bits_truncate(taken) & mask
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_contains() {
        let group = EventGroup::new();
        assert!(!group.contains(SystemEvents::CELLULAR_READY));
        group.set(SystemEvents::CELLULAR_READY);
        assert!(group.contains(SystemEvents::CELLULAR_READY));
        assert!(!group.contains(SystemEvents::MQTT_DATA_READY));
    }

    #[test]
    fn test_take_clears_only_mask() {
        let group = EventGroup::new();
        group.set(SystemEvents::CELLULAR_READY | SystemEvents::MQTT_DATA_READY);

        let taken = group.take(SystemEvents::MQTT_DATA_READY);
        assert_eq!(taken, SystemEvents::MQTT_DATA_READY);
        assert!(group.contains(SystemEvents::CELLULAR_READY));
        assert!(!group.contains(SystemEvents::MQTT_DATA_READY));
    }

    #[test]
    fn test_take_empty() {
        let group = EventGroup::new();
        assert_eq!(group.take(SystemEvents::ERROR_DETECTED), SystemEvents::empty());
    }

    #[test]
    fn test_repeated_set_coalesces() {
        let group = EventGroup::new();
        group.set(SystemEvents::STATUS_CHANGE);
        group.set(SystemEvents::STATUS_CHANGE);
        let taken = group.take(SystemEvents::STATUS_CHANGE);
        assert_eq!(taken, SystemEvents::STATUS_CHANGE);
        assert_eq!(group.take(SystemEvents::STATUS_CHANGE), SystemEvents::empty());
    }

    #[test]
    fn test_clear() {
        let group = EventGroup::new();
        group.set(SystemEvents::ERROR_DETECTED | SystemEvents::STATUS_CHANGE);
        group.clear(SystemEvents::ERROR_DETECTED);
        assert!(!group.contains(SystemEvents::ERROR_DETECTED));
        assert!(group.contains(SystemEvents::STATUS_CHANGE));
    }
}
