//! MAC (radio) capability trait (§6, §9; grounded on `interface_mac.h`).
//!
//! The core never talks to a concrete radio driver; it depends only on this
//! trait, injected at construction, per the re-architecture guidance in §9
//! ("model virtual method tables on driver structs as capability traits").

/// Receive-side metadata the MAC attaches to every frame (§3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketInfo {
    /// Frequency error estimate in Hz.
    pub fei_hz: i32,
    /// Received signal strength, tenths of a dBm.
    pub rssi_10dbm: i16,
    /// Bit errors the PHY corrected, if it can report them.
    pub bit_errors: i16,
}

/// Counters and gauges the MAC can optionally report (supplemented from
/// `interface_mac.h`'s `interface_mac_statistics`; observability only, never
/// consulted by routing or crypto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacStatistics {
    /// Bytes received (counter).
    pub rx_bytes: u32,
    /// Packets received (counter).
    pub rx_packets: u32,
    /// Bit errors observed on receive (counter).
    pub rx_bit_errors: u32,
    /// RX slots used (gauge).
    pub rx_slots: u32,
    /// Bytes sent (counter).
    pub tx_bytes: u32,
    /// Packets sent (counter).
    pub tx_packets: u32,
    /// TX slots used (gauge).
    pub tx_slots: u32,
    /// Medium utilization, 0-255 representing 0%-100% (gauge).
    pub medium_usage: u8,
    /// Total slots available (gauge).
    pub slots_total: u32,
}

/// Outcome of a non-blocking receive poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacRecv {
    /// A frame of up to 140 bytes was read, with its receive metadata.
    Frame(Vec<u8>, PacketInfo),
    /// Nothing was ready within the poll.
    NotReady,
}

/// The MAC boundary (§6): a best-effort datagram pipe. The radio is modelled
/// as "not ready" rather than blocking; callers poll it from their own tick.
pub trait Mac {
    /// Non-blocking receive of the next frame, if any.
    fn recv(&mut self) -> MacRecv;

    /// Hand a frame (already framed per §4.1, ≤140 bytes) to the radio.
    /// Returns `false` if the MAC is saturated ("busy"); the caller must not
    /// retry automatically (§5 backpressure policy).
    fn send(&mut self, frame: &[u8]) -> bool;

    /// Optional interface statistics; `None` if the driver can't report them.
    fn statistics(&self) -> Option<MacStatistics> {
        None
    }
}

/// The RNG boundary (§6; grounded on `interface_rng.h`): cryptographically
/// adequate random bytes for TID/session-id allocation and ephemeral keys.
pub trait Rng {
    /// Fill `buf` with random bytes.
    fn fill(&mut self, buf: &mut [u8]);

    /// Whether the source currently has entropy to give. Callers that must
    /// not block (§4.6's NEW→AKE step: "if allocatable") check this before
    /// drawing from `fill`; the default assumes an always-available source.
    fn available(&self) -> bool {
        true
    }

    /// Generate a random `u32` in `[1, u32::MAX]`, rejecting 0 (§4.3: "reject
    /// 0" for newly allocated TIDs).
    fn random_nonzero_u32(&mut self) -> u32 {
        loop {
            let mut buf = [0u8; 4];
            self.fill(&mut buf);
            let value = u32::from_be_bytes(buf);
            if value != 0 {
                return value;
            }
        }
    }
}

/// In-memory [`Mac`]/[`Rng`] doubles shared by every crate's unit tests.
/// Built only under `cfg(test)` (this crate's own tests) or the
/// `test-support` feature (dev-dependents), since `cfg(test)` never applies
/// to a path dependency compiled normally.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::{Mac, MacRecv, Rng};
    use std::collections::VecDeque;

    /// Deterministic RNG for tests: cycles through a fixed sequence.
    pub struct FixedRng {
        values: VecDeque<u32>,
        available: bool,
    }

    impl FixedRng {
        pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
            Self {
                values: values.into_iter().collect(),
                available: true,
            }
        }

        /// An RNG with no entropy to give, for exercising callers' "no RNG
        /// available" paths (spec.md §8 scenario 5).
        pub fn unavailable() -> Self {
            Self {
                values: VecDeque::new(),
                available: false,
            }
        }
    }

    impl Rng for FixedRng {
        fn fill(&mut self, buf: &mut [u8]) {
            let next = self.values.pop_front().unwrap_or(0xdead_beef);
            self.values.push_back(next);
            let bytes = next.to_be_bytes();
            for (i, b) in buf.iter_mut().enumerate() {
                *b = bytes[i % 4];
            }
        }

        fn available(&self) -> bool {
            self.available
        }
    }

    /// In-memory loopback MAC: frames `send` are immediately available to
    /// `recv`, for single-process tests.
    #[derive(Default)]
    pub struct LoopbackMac {
        pub inbox: VecDeque<(Vec<u8>, super::PacketInfo)>,
        pub sent: Vec<Vec<u8>>,
        pub busy: bool,
    }

    impl Mac for LoopbackMac {
        fn recv(&mut self) -> MacRecv {
            match self.inbox.pop_front() {
                Some((frame, info)) => MacRecv::Frame(frame, info),
                None => MacRecv::NotReady,
            }
        }

        fn send(&mut self, frame: &[u8]) -> bool {
            if self.busy {
                return false;
            }
            self.sent.push(frame.to_vec());
            true
        }
    }
}
