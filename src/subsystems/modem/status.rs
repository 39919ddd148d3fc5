//! Status records for the storage collaborator
//!
//! One JSON line per GNSS fix update and one per cellular status change,
//! pushed through a bounded queue. The orchestrator never blocks on storage:
//! when the queue is full the record is dropped and counted.

use crate::devices::sim7080::{CellularLink, GnssFix, MAX_OPERATOR_LEN};
use core::sync::atomic::{AtomicU32, Ordering};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use heapless::String;
use serde::Serialize;

/// Records buffered between storage-task drains
pub const STATUS_QUEUE_DEPTH: usize = 8;

/// Longest serialized record line
pub const MAX_RECORD_LEN: usize = 192;

/// One GNSS fix snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GnssRecord {
    /// Monotonic milliseconds when the fix was captured
    pub t: u64,
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
    pub spd: f32,
    pub sat: u8,
    pub valid: bool,
}

impl GnssRecord {
    pub fn from_fix(fix: &GnssFix) -> Self {
        Self {
            t: fix.captured_at,
            lat: fix.latitude,
            lon: fix.longitude,
            alt: fix.altitude,
            spd: fix.speed,
            sat: fix.satellites,
            valid: fix.valid,
        }
    }
}

/// One cellular link snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRecord {
    /// Monotonic milliseconds of the snapshot
    pub t: u64,
    pub op: String<MAX_OPERATOR_LEN>,
    pub rssi: i8,
    pub conn: bool,
    pub tx_bps: u32,
    pub rx_bps: u32,
    pub tx_bytes: u64,
    pub rx_bytes: u64,
}

impl CellRecord {
    pub fn from_link(link: &CellularLink) -> Self {
        Self {
            t: link.last_update,
            op: link.operator_name.clone(),
            rssi: link.signal_dbm,
            conn: link.connected,
            tx_bps: link.tx_bps,
            rx_bps: link.rx_bps,
            tx_bytes: link.tx_bytes,
            rx_bytes: link.rx_bytes,
        }
    }
}

/// Either kind of record, as queued
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusRecord {
    Gnss(GnssRecord),
    Cell(CellRecord),
}

impl StatusRecord {
    /// Serialize to one JSON line
    pub fn to_json(&self) -> Result<String<MAX_RECORD_LEN>, serde_json_core::ser::Error> {
        serde_json_core::to_string(self)
    }
}

/// Bounded, never-blocking record queue
pub struct StatusReporter {
    channel: Channel<CriticalSectionRawMutex, StatusRecord, STATUS_QUEUE_DEPTH>,
    dropped: AtomicU32,
}

impl StatusReporter {
    /// Const constructor for static initialization
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Queue a GNSS fix record, dropping (and counting) on overflow
    pub fn publish_gnss(&self, fix: &GnssFix) {
        self.push(StatusRecord::Gnss(GnssRecord::from_fix(fix)));
    }

    /// Queue a cellular link record, dropping (and counting) on overflow
    pub fn publish_cell(&self, link: &CellularLink) {
        self.push(StatusRecord::Cell(CellRecord::from_link(link)));
    }

    fn push(&self, record: StatusRecord) {
        if self.channel.try_send(record).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Non-blocking drain point for the storage task
    pub fn try_next(&self) -> Option<StatusRecord> {
        self.channel.try_receive().ok()
    }

    /// Records dropped because the queue was full
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}
