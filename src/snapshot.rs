//! Shared store bridging the RTU master pollers (writers) to the TCP slave
//! projector and MQTT publisher (readers). One row per configured poll
//! group; each row is single-writer (its own poller thread) and
//! multi-reader, guarded by a `parking_lot::Mutex` per row rather than the
//! original firmware's bare shared arrays. The firmware tolerates torn reads
//! because on its target no reader preempts a write mid-memcpy; nothing in
//! safe Rust gives us that guarantee, so each row gets its own lock instead
//! of one global one, keeping readers of unrelated groups from blocking each
//! other.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::config::{MAX_BITS, MAX_REGS};

/// One poll group's most recently completed read. Bits are packed LSB-first
/// within each byte, exactly as the wire format packs them, so the
/// projector and publisher can reuse the same unpacking logic. `count` is
/// the logical number of values read (bits or words, whichever the group
/// uses) — bit-mode rows pad their packed bytes out to a whole number of
/// bytes, so `bits.len() * 8` alone overstates how many of those bits are
/// real data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRow {
    pub bits: Vec<u8>,
    pub words: Vec<u16>,
    pub count: u16,
}

struct Slot {
    row: Mutex<GroupRow>,
    ready: AtomicBool,
}

/// Fixed-size table of group rows, indexed by poll group index.
pub struct SnapshotStore {
    slots: Vec<Slot>,
}

impl SnapshotStore {
    pub fn new(group_count: usize) -> Self {
        Self {
            slots: (0..group_count)
                .map(|_| Slot {
                    row: Mutex::new(GroupRow::default()),
                    ready: AtomicBool::new(false),
                })
                .collect(),
        }
    }

    pub fn group_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_ready(&self, group: usize) -> bool {
        self.slots[group].ready.load(Ordering::Acquire)
    }

    /// Called by a poller after a failed poll: clears `ready` without
    /// touching stale data, matching the firmware setting
    /// `register_ready[i] = false` on a negative read return.
    pub fn mark_not_ready(&self, group: usize) {
        self.slots[group].ready.store(false, Ordering::Release);
    }

    /// Writes a successfully-decoded bit read (coils/discrete inputs) for
    /// `group`, packing LSB-first, then publishes `ready`.
    pub fn write_bits(&self, group: usize, values: &[bool]) {
        debug_assert!(values.len() <= MAX_BITS);
        let mut packed = vec![0u8; values.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if *value {
                packed[i / 8] |= 1 << (i % 8);
            }
        }
        {
            let mut row = self.slots[group].row.lock();
            row.bits = packed;
            row.words.clear();
            row.count = values.len() as u16;
        }
        self.slots[group].ready.store(true, Ordering::Release);
    }

    /// Writes a successfully-decoded register read (holding/input
    /// registers) for `group`, then publishes `ready`.
    pub fn write_words(&self, group: usize, values: &[u16]) {
        debug_assert!(values.len() <= MAX_REGS);
        {
            let mut row = self.slots[group].row.lock();
            row.words = values.to_vec();
            row.bits.clear();
            row.count = values.len() as u16;
        }
        self.slots[group].ready.store(true, Ordering::Release);
    }

    /// Reads a copy of `group`'s row if it is currently ready. Returns
    /// `None` for a group that has never completed a poll or whose most
    /// recent poll failed, per the "skip groups with `ready=false`" rule
    /// shared by the projector and the publisher.
    pub fn read(&self, group: usize) -> Option<GroupRow> {
        if !self.is_ready(group) {
            return None;
        }
        Some(self.slots[group].row.lock().clone())
    }

    /// Extracts a single bit at `offset` from a bit-packed row, LSB-first.
    pub fn bit_at(row: &GroupRow, offset: u16) -> bool {
        let byte = row.bits[offset as usize / 8];
        (byte >> (offset % 8)) & 1 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_is_not_ready_until_first_successful_write() {
        let store = SnapshotStore::new(2);
        assert!(!store.is_ready(0));
        store.write_words(0, &[1, 2, 3]);
        assert!(store.is_ready(0));
        assert!(!store.is_ready(1));
    }

    #[test]
    fn a_failed_poll_clears_ready_without_touching_old_data() {
        let store = SnapshotStore::new(1);
        store.write_words(0, &[42]);
        store.mark_not_ready(0);
        assert!(!store.is_ready(0));
        assert_eq!(store.read(0), None);
    }

    #[test]
    fn bits_pack_lsb_first() {
        let store = SnapshotStore::new(1);
        // bit 0 = true, bit 1..7 = false, bit 8 = true
        let mut bits = vec![false; 9];
        bits[0] = true;
        bits[8] = true;
        store.write_bits(0, &bits);
        let row = store.read(0).expect("ready");
        assert_eq!(row.bits[0], 0b0000_0001);
        assert_eq!(row.bits[1], 0b0000_0001);
        assert_eq!(row.count, 9);
    }
}
