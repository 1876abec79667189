//! Neighbour table (C3), grounded on `umesh_l2_nbtable.c`/`.h`.
//!
//! A fixed-size array of slots keyed by peer TID. No dynamic growth: once
//! full, new neighbours are simply not learned until a slot frees up.

use umesh_core::mac::PacketInfo;

/// Tick cadence this table is designed to be driven at.
pub const STEP_INTERVAL_MS: u32 = 100;

/// Once `unreachable_time_ms` crosses this, the record is considered lost
/// and moved to [`NeighbourState::Old`].
pub const UNREACHABLE_TIME_THRESHOLD_MS: u32 = 2_000;

/// Ceiling `unreachable_time_ms` is clamped to (saturating add guard).
pub const UNREACHABLE_TIME_MAX_MS: u32 = 30_000;

const NEW_TIMEOUT_MS: u32 = 5_000;
const VALID_TIMEOUT_MS: u32 = 600_000;
const GUARD_TIMEOUT_MS: u32 = 30_000;
const OLD_TIMEOUT_MS: u32 = u32::MAX;

/// Lifecycle state of a neighbour record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourState {
    /// Slot unused.
    Empty,
    /// Learned from an advertisement, not yet handed to the key manager.
    New,
    /// Key manager has been asked to manage this peer.
    Valid,
    /// Backoff state entered after a failed validation attempt.
    Guard,
    /// Unreachable or expired; reclaimed to [`NeighbourState::Empty`] on the
    /// next tick.
    Old,
}

fn state_timeout_ms(state: NeighbourState) -> u32 {
    match state {
        NeighbourState::Empty => 0,
        NeighbourState::New => NEW_TIMEOUT_MS,
        NeighbourState::Valid => VALID_TIMEOUT_MS,
        NeighbourState::Guard => GUARD_TIMEOUT_MS,
        NeighbourState::Old => OLD_TIMEOUT_MS,
    }
}

/// One neighbour's state: radio stats, lifecycle, and per-key send counter.
#[derive(Debug, Clone)]
pub struct NeighbourRecord {
    /// Peer TID this record is keyed by. Meaningless while `state == Empty`.
    pub tid: u32,
    /// Lifecycle state.
    pub state: NeighbourState,
    /// Milliseconds remaining before the current state times out.
    pub state_timeout_ms: u32,
    /// Milliseconds since the last successfully received frame.
    pub unreachable_time_ms: u32,
    /// Last observed RSSI, tenths of a dBm.
    pub last_rssi_10dbm: i16,
    /// Last observed frequency error, Hz.
    pub last_fei_hz: i32,
    /// Link quality indicator, 0-100.
    pub lqi_percent: u8,
    /// Per-key TX counter; monotone across successful sends under one key.
    pub tx_counter: u32,
    /// Received packet count.
    pub rx_packets: u32,
    /// Received byte count.
    pub rx_bytes: u64,
    /// Frames dropped for this neighbour.
    pub rx_dropped: u32,
    /// Sent packet count.
    pub tx_packets: u32,
    /// Sent byte count.
    pub tx_bytes: u64,
}

impl NeighbourRecord {
    fn empty() -> Self {
        Self {
            tid: 0,
            state: NeighbourState::Empty,
            state_timeout_ms: 0,
            unreachable_time_ms: 0,
            last_rssi_10dbm: 0,
            last_fei_hz: 0,
            lqi_percent: 0,
            tx_counter: 0,
            rx_packets: 0,
            rx_bytes: 0,
            rx_dropped: 0,
            tx_packets: 0,
            tx_bytes: 0,
        }
    }

    fn set_state(&mut self, state: NeighbourState) {
        self.state = state;
        self.state_timeout_ms = state_timeout_ms(state);
    }
}

/// A fixed-capacity table of [`NeighbourRecord`]s.
pub struct NeighbourTable {
    slots: Vec<NeighbourRecord>,
}

impl NeighbourTable {
    /// A table with `capacity` pre-allocated, always-empty slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| NeighbourRecord::empty()).collect(),
        }
    }

    /// All non-empty records, for introspection.
    pub fn records(&self) -> impl Iterator<Item = &NeighbourRecord> {
        self.slots
            .iter()
            .filter(|r| r.state != NeighbourState::Empty)
    }

    /// Whether `tid` has a non-empty record.
    #[must_use]
    pub fn is_known(&self, tid: u32) -> bool {
        self.find(tid).is_some()
    }

    fn find(&self, tid: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|r| r.state != NeighbourState::Empty && r.tid == tid)
    }

    fn find_free(&self) -> Option<usize> {
        self.slots.iter().position(|r| r.state == NeighbourState::Empty)
    }

    /// Record reception of a frame from `tid`: reset unreachable-time and
    /// refresh radio stats, inserting a new NEW-state record if unknown.
    pub fn note_reception(&mut self, tid: u32, info: PacketInfo) {
        let idx = match self.find(tid) {
            Some(idx) => idx,
            None => match self.find_free() {
                Some(idx) => {
                    self.slots[idx] = NeighbourRecord::empty();
                    self.slots[idx].tid = tid;
                    self.slots[idx].set_state(NeighbourState::New);
                    idx
                }
                None => return,
            },
        };
        let record = &mut self.slots[idx];
        record.unreachable_time_ms = 0;
        record.last_rssi_10dbm = info.rssi_10dbm;
        record.last_fei_hz = info.fei_hz;
        record.rx_packets += 1;
    }

    /// Increment the drop counter for a known neighbour; no-op otherwise.
    pub fn record_drop(&mut self, tid: u32) {
        if let Some(idx) = self.find(tid) {
            self.slots[idx].rx_dropped += 1;
        }
    }

    /// Advance the TX counter for `tid` and return the value to use on the
    /// wire, or `None` if `tid` is unknown.
    pub fn next_tx_counter(&mut self, tid: u32) -> Option<u32> {
        let idx = self.find(tid)?;
        let current = self.slots[idx].tx_counter;
        self.slots[idx].tx_counter = self.slots[idx].tx_counter.wrapping_add(1);
        self.slots[idx].tx_packets += 1;
        Some(current)
    }

    /// Move a NEW record to VALID once the key manager has been asked to
    /// manage it (§4.2 lifecycle transition driven externally by whoever
    /// owns the key manager).
    pub fn mark_valid(&mut self, tid: u32) {
        if let Some(idx) = self.find(tid) {
            if self.slots[idx].state == NeighbourState::New {
                self.slots[idx].set_state(NeighbourState::Valid);
            }
        }
    }

    /// Advance every slot by `dt_ms`, applying unreachable and state-timeout
    /// transitions. Mirrors `umesh_l2_nbtable_loop`'s per-tick order:
    /// unreachable check, then state-timeout check.
    pub fn step(&mut self, dt_ms: u32) {
        for record in &mut self.slots {
            if record.state == NeighbourState::Empty {
                continue;
            }

            record.unreachable_time_ms =
                (record.unreachable_time_ms + dt_ms).min(UNREACHABLE_TIME_MAX_MS);
            if record.unreachable_time_ms >= UNREACHABLE_TIME_THRESHOLD_MS
                && record.state != NeighbourState::Old
            {
                record.set_state(NeighbourState::Old);
                continue;
            }

            if record.state_timeout_ms > dt_ms {
                record.state_timeout_ms -= dt_ms;
                continue;
            }
            record.state_timeout_ms = 0;

            match record.state {
                NeighbourState::New => record.set_state(NeighbourState::Guard),
                NeighbourState::Valid => record.set_state(NeighbourState::New),
                NeighbourState::Guard => record.set_state(NeighbourState::Old),
                NeighbourState::Old => *record = NeighbourRecord::empty(),
                NeighbourState::Empty => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> PacketInfo {
        PacketInfo {
            fei_hz: 10,
            rssi_10dbm: -500,
            bit_errors: 0,
        }
    }

    #[test]
    fn unknown_tid_is_inserted_as_new() {
        let mut table = NeighbourTable::new(4);
        assert!(!table.is_known(7));
        table.note_reception(7, info());
        assert!(table.is_known(7));
        let record = table.records().find(|r| r.tid == 7).unwrap();
        assert_eq!(record.state, NeighbourState::New);
    }

    #[test]
    fn new_record_times_out_to_guard_then_old_then_empty() {
        let mut table = NeighbourTable::new(4);
        table.note_reception(7, info());
        table.step(NEW_TIMEOUT_MS);
        assert_eq!(table.records().next().unwrap().state, NeighbourState::Guard);
        table.step(GUARD_TIMEOUT_MS);
        assert_eq!(table.records().next().unwrap().state, NeighbourState::Old);
        table.step(1);
        assert_eq!(table.records().count(), 0);
    }

    #[test]
    fn unreachable_time_moves_any_state_to_old() {
        let mut table = NeighbourTable::new(4);
        table.note_reception(7, info());
        table.mark_valid(7);
        table.step(UNREACHABLE_TIME_THRESHOLD_MS);
        assert_eq!(table.records().next().unwrap().state, NeighbourState::Old);
    }

    #[test]
    fn reception_resets_unreachable_time() {
        let mut table = NeighbourTable::new(4);
        table.note_reception(7, info());
        table.step(UNREACHABLE_TIME_THRESHOLD_MS - 1);
        table.note_reception(7, info());
        table.step(UNREACHABLE_TIME_THRESHOLD_MS - 1);
        assert_ne!(table.records().next().unwrap().state, NeighbourState::Old);
    }

    #[test]
    fn table_does_not_grow_past_capacity() {
        let mut table = NeighbourTable::new(2);
        table.note_reception(1, info());
        table.note_reception(2, info());
        table.note_reception(3, info());
        assert_eq!(table.records().count(), 2);
        assert!(!table.is_known(3));
    }

    #[test]
    fn tx_counter_is_monotone() {
        let mut table = NeighbourTable::new(4);
        table.note_reception(7, info());
        let a = table.next_tx_counter(7).unwrap();
        let b = table.next_tx_counter(7).unwrap();
        assert_eq!(b, a + 1);
    }
}
