//! Sensor/power status broadcaster (C11).
//!
//! Periodically sends one verify-only broadcast frame per registered sensor
//! or power device, carrying just a name and a value. Grounded on
//! `umesh_l2_status.c`: the original keeps two fixed-size arrays (sensors,
//! power devices) and walks both once per cadence, building one small
//! tagged message per entry rather than batching them into one frame.

use tracing::{trace, warn};

use crate::frame::SecurityClass;
use crate::mac::Mac;
use crate::registry::{L3Handler, L3Message, PROTO_STATUS};
use crate::routing::NeighbourKeys;
use crate::send::send_frame;

/// Maximum number of sensors or power devices that can be registered.
pub const MAX_SENSORS: usize = 8;

/// Cadence at which [`StatusBroadcaster::step`] should be called, in ms.
pub const STEP_INTERVAL_MS: u32 = 5_000;

/// A single named, unit-tagged reading.
#[derive(Debug, Clone)]
pub struct Reading {
    /// Short identifying name (e.g. sensor label), truncated to fit the frame.
    pub name: String,
    /// Unit symbol, e.g. "C" or "mV".
    pub unit: String,
    /// The measured value.
    pub value: f32,
}

/// Pull the latest value from a registered sensor or power device.
pub trait ReadingSource {
    /// Return the current reading, or `None` if transiently unavailable.
    fn read(&mut self) -> Option<Reading>;
}

enum Slot {
    Empty,
    Occupied(Box<dyn ReadingSource>),
}

/// Broadcasts sensor and power-device readings at a fixed cadence.
///
/// Holds up to [`MAX_SENSORS`] sensors and [`MAX_SENSORS`] power devices in
/// fixed-size slots (no dynamic growth, matching the resource policy the
/// rest of the stack follows). Each call to [`Self::step`] that crosses the
/// cadence boundary emits one broadcast frame per occupied slot.
pub struct StatusBroadcaster {
    sensors: Vec<Slot>,
    power: Vec<Slot>,
    elapsed_ms: u32,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    /// An empty broadcaster.
    #[must_use]
    pub fn new() -> Self {
        let mut sensors = Vec::with_capacity(MAX_SENSORS);
        let mut power = Vec::with_capacity(MAX_SENSORS);
        for _ in 0..MAX_SENSORS {
            sensors.push(Slot::Empty);
            power.push(Slot::Empty);
        }
        Self {
            sensors,
            power,
            elapsed_ms: 0,
        }
    }

    /// Register a sensor in the first free slot.
    ///
    /// Returns `false` without registering anything if all [`MAX_SENSORS`]
    /// sensor slots are occupied.
    pub fn add_sensor(&mut self, source: Box<dyn ReadingSource>) -> bool {
        add_to(&mut self.sensors, source)
    }

    /// Register a power device in the first free slot.
    ///
    /// Returns `false` without registering anything if all [`MAX_SENSORS`]
    /// power-device slots are occupied.
    pub fn add_power_device(&mut self, source: Box<dyn ReadingSource>) -> bool {
        add_to(&mut self.power, source)
    }

    /// Advance by `dt_ms`; broadcast a frame for every occupied slot once
    /// the cadence has elapsed.
    pub fn step<M: Mac, K: NeighbourKeys>(
        &mut self,
        dt_ms: u32,
        mac: &mut M,
        keys: &mut K,
        local_tid: u32,
    ) {
        self.elapsed_ms += dt_ms;
        if self.elapsed_ms < STEP_INTERVAL_MS {
            return;
        }
        self.elapsed_ms = 0;

        broadcast_slots(&mut self.sensors, mac, keys, local_tid);
        broadcast_slots(&mut self.power, mac, keys, local_tid);
    }
}

fn add_to(slots: &mut [Slot], source: Box<dyn ReadingSource>) -> bool {
    for slot in slots.iter_mut() {
        if matches!(slot, Slot::Empty) {
            *slot = Slot::Occupied(source);
            return true;
        }
    }
    false
}

fn broadcast_slots<M: Mac, K: NeighbourKeys>(
    slots: &mut [Slot],
    mac: &mut M,
    keys: &mut K,
    local_tid: u32,
) {
    for slot in slots.iter_mut() {
        let Slot::Occupied(source) = slot else {
            continue;
        };
        let Some(reading) = source.read() else {
            continue;
        };
        let payload = encode_reading(&reading);
        let result = send_frame(
            mac,
            keys,
            local_tid,
            SecurityClass::Verify,
            true,
            None,
            PROTO_STATUS,
            false,
            &payload,
        );
        if let Err(e) = result {
            warn!(error = %e, name = %reading.name, "status: broadcast failed");
        } else {
            trace!(name = %reading.name, value = reading.value, "status: broadcast sent");
        }
    }
}

/// `name_len(1) name unit_len(1) unit value(4 LE f32)`.
fn encode_reading(reading: &Reading) -> Vec<u8> {
    let name = reading.name.as_bytes();
    let name_len = name.len().min(255);
    let unit = reading.unit.as_bytes();
    let unit_len = unit.len().min(255);

    let mut out = Vec::with_capacity(2 + name_len + unit_len + 4);
    out.push(name_len as u8);
    out.extend_from_slice(&name[..name_len]);
    out.push(unit_len as u8);
    out.extend_from_slice(&unit[..unit_len]);
    out.extend_from_slice(&reading.value.to_le_bytes());
    out
}

fn decode_reading(buf: &[u8]) -> Option<Reading> {
    let name_len = *buf.first()? as usize;
    let mut pos = 1;
    let name = std::str::from_utf8(buf.get(pos..pos + name_len)?).ok()?;
    pos += name_len;
    let unit_len = *buf.get(pos)? as usize;
    pos += 1;
    let unit = std::str::from_utf8(buf.get(pos..pos + unit_len)?).ok()?;
    pos += unit_len;
    let value = f32::from_le_bytes(buf.get(pos..pos + 4)?.try_into().ok()?);
    Some(Reading {
        name: name.to_string(),
        unit: unit.to_string(),
        value,
    })
}

/// Receive-side handler: logs decoded readings from peers.
///
/// Observability only, matching `umesh_l2_status_receive_handler`, which
/// logs receipt and otherwise does not process the payload further.
#[derive(Debug, Default)]
pub struct StatusReceiver;

impl L3Handler for StatusReceiver {
    fn on_receive(&mut self, msg: L3Message) {
        match decode_reading(&msg.payload) {
            Some(reading) => {
                tracing::debug!(
                    src = msg.src_tid,
                    name = %reading.name,
                    value = reading.value,
                    unit = %reading.unit,
                    "status: reading received"
                );
            }
            None => {
                trace!(src = msg.src_tid, "status: malformed reading, dropping");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::test_support::LoopbackMac;
    use crate::mac::PacketInfo;

    #[derive(Default)]
    struct FakeKeys;
    impl NeighbourKeys for FakeKeys {
        fn is_known(&self, _tid: u32) -> bool {
            false
        }
        fn rx_key(&self, _tid: u32) -> Option<[u8; 32]> {
            None
        }
        fn take_tx_key_and_nonce(&mut self, _tid: u32) -> Option<([u8; 32], u16)> {
            None
        }
        fn note_reception(&mut self, _tid: u32, _info: PacketInfo) {}
        fn record_drop(&mut self, _tid: u32) {}
    }

    struct FixedReading(Reading);
    impl ReadingSource for FixedReading {
        fn read(&mut self) -> Option<Reading> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn reading_round_trips_through_wire_encoding() {
        let reading = Reading {
            name: "batt".to_string(),
            unit: "mV".to_string(),
            value: 3710.0,
        };
        let encoded = encode_reading(&reading);
        let decoded = decode_reading(&encoded).unwrap();
        assert_eq!(decoded.name, "batt");
        assert_eq!(decoded.unit, "mV");
        assert_eq!(decoded.value, 3710.0);
    }

    #[test]
    fn broadcasts_only_after_cadence_elapses() {
        let mut status = StatusBroadcaster::new();
        assert!(status.add_sensor(Box::new(FixedReading(Reading {
            name: "temp".to_string(),
            unit: "C".to_string(),
            value: 21.5,
        }))));

        let mut mac = LoopbackMac::default();
        let mut keys = FakeKeys;

        status.step(1_000, &mut mac, &mut keys, 1);
        assert!(mac.sent.is_empty());

        status.step(4_000, &mut mac, &mut keys, 1);
        assert_eq!(mac.sent.len(), 1);
    }

    #[test]
    fn registering_beyond_capacity_is_rejected() {
        let mut status = StatusBroadcaster::new();
        for _ in 0..MAX_SENSORS {
            assert!(status.add_sensor(Box::new(FixedReading(Reading {
                name: "s".to_string(),
                unit: "".to_string(),
                value: 0.0,
            }))));
        }
        assert!(!status.add_sensor(Box::new(FixedReading(Reading {
            name: "overflow".to_string(),
            unit: "".to_string(),
            value: 0.0,
        }))));
    }
}
