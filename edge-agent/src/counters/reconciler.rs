use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::store::{DirectionRecord, InterfaceRecord, PersistedCounters};

/// Raw byte counters of one interface as read from the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCounters {
    pub tx: u64,
    pub rx: u64,
}

/// Cumulative traffic of one interface, as reported upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceTraffic {
    pub interface: String,
    #[serde(rename = "bytes-transmitted")]
    pub tx_bytes: u64,
    #[serde(rename = "bytes-received")]
    pub rx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counter {
    baseline: u64,
    carry: u64,
    total: u64,
}

impl Counter {
    fn from_record(record: &DirectionRecord) -> Self {
        Self {
            baseline: record.baseline,
            carry: record.carry,
            total: record.total,
        }
    }

    /// Apply one raw reading. Returns `true` when the reading is a reset.
    fn observe(&mut self, raw: u64, persisted: Option<&DirectionRecord>) -> bool {
        if raw < self.baseline {
            self.rebase(raw, persisted.map_or(0, |r| r.total));
            true
        } else {
            self.total = self.carry + (raw - self.baseline);
            false
        }
    }

    /// Restart from `raw`, keeping `carry` as the accrued history.
    fn rebase(&mut self, raw: u64, carry: u64) {
        self.baseline = raw;
        self.carry = carry;
        self.total = carry + raw;
    }

    fn record(&self) -> DirectionRecord {
        DirectionRecord {
            baseline: self.baseline,
            carry: self.carry,
            total: self.total,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct InterfaceState {
    tx: Counter,
    rx: Counter,
}

impl InterfaceState {
    fn cold(raw: RawCounters) -> Self {
        Self {
            tx: Counter {
                baseline: raw.tx,
                ..Counter::default()
            },
            rx: Counter {
                baseline: raw.rx,
                ..Counter::default()
            },
        }
    }

    fn resume(record: &InterfaceRecord) -> Self {
        Self {
            tx: Counter::from_record(&record.tx),
            rx: Counter::from_record(&record.rx),
        }
    }
}

/// Turns resettable raw counters into cumulative totals.
///
/// Per interface and direction it keeps a baseline (the raw value treated
/// as zero) and a carry (traffic accrued before that baseline). A reading
/// below the baseline is a reset of that direction only: it is rebased on
/// the new reading and its carry is taken from the persisted total passed in
/// for that poll, or zero when there is none.
#[derive(Debug, Default)]
pub struct CounterReconciler {
    states: BTreeMap<String, InterfaceState>,
}

impl CounterReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile one poll of raw readings.
    ///
    /// `persisted` is the state loaded from durable storage for this poll.
    /// Reports are ordered by interface name.
    pub fn reconcile(
        &mut self,
        readings: &BTreeMap<String, RawCounters>,
        persisted: Option<&PersistedCounters>,
    ) -> Vec<InterfaceTraffic> {
        readings
            .iter()
            .map(|(interface, raw)| {
                let record = persisted.and_then(|p| p.get(interface));
                let (tx_bytes, rx_bytes) = self.poll(interface, *raw, record);
                InterfaceTraffic {
                    interface: interface.clone(),
                    tx_bytes,
                    rx_bytes,
                }
            })
            .collect()
    }

    fn poll(
        &mut self,
        interface: &str,
        raw: RawCounters,
        record: Option<&InterfaceRecord>,
    ) -> (u64, u64) {
        let state = match self.states.entry(interface.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => match record {
                Some(record) => {
                    debug!(interface, "Resuming traffic counters from persisted state");
                    entry.insert(InterfaceState::resume(record))
                }
                None => {
                    debug!(interface, "First reading, traffic counters start at zero");
                    entry.insert(InterfaceState::cold(raw));
                    return (0, 0);
                }
            },
        };

        let tx_reset = state.tx.observe(raw.tx, record.map(|r| &r.tx));
        let rx_reset = state.rx.observe(raw.rx, record.map(|r| &r.rx));
        if tx_reset || rx_reset {
            info!(
                interface,
                tx_reset,
                rx_reset,
                tx_carry = state.tx.carry,
                rx_carry = state.rx.carry,
                "Traffic counter reset detected, rebasing"
            );
        }

        (state.tx.total, state.rx.total)
    }

    /// Current state of every known interface, ready to persist.
    pub fn records(&self) -> PersistedCounters {
        self.states
            .iter()
            .map(|(name, state)| {
                (
                    name.clone(),
                    InterfaceRecord {
                        tx: state.tx.record(),
                        rx: state.rx.record(),
                    },
                )
            })
            .collect()
    }

    /// Baseline of an interface, if it has been observed.
    pub fn baseline(&self, interface: &str) -> Option<RawCounters> {
        self.states.get(interface).map(|s| RawCounters {
            tx: s.tx.baseline,
            rx: s.rx.baseline,
        })
    }

    /// Carry of an interface, if it has been observed.
    pub fn carry(&self, interface: &str) -> Option<RawCounters> {
        self.states.get(interface).map(|s| RawCounters {
            tx: s.tx.carry,
            rx: s.rx.carry,
        })
    }
}
