//! Fixed-stride record codec.
//!
//! One record is exactly [`RECORD_SIZE`] bytes on disk, with the `(rev, ts)`
//! key in the leading [`KEY_SIZE`] bytes so a key can be decoded from any
//! slot without reading the rest of it. All quantities are cumulative
//! integrals; clients derive rates by differencing two records.
//!
//! The byte order is the host's. The file never leaves the appliance, so
//! cross-architecture portability is a non-goal.

/// Maximum number of metered devices tracked per record.
pub const MAX_DEVICES: usize = 15;

/// Byte length of the `(rev, ts)` key prefix.
pub const KEY_SIZE: usize = 8;

/// Byte stride of one record slot.
pub const RECORD_SIZE: usize = KEY_SIZE + 2 * 8 + 3 * MAX_DEVICES * 8;

// The stride is load-bearing: slot offsets are computed from it.
const _: () = assert!(RECORD_SIZE == 384);

/// The `(rev, ts)` pair identifying a record.
///
/// `rev` is the monotonic ordinal assigned at append time and is the primary
/// key; `ts` is the interval-aligned Unix timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Key {
    /// Monotonic revision ordinal.
    pub rev: u32,
    /// Unix timestamp in seconds.
    pub ts: u32,
}

impl Key {
    /// Decode a key from the leading bytes of a slot.
    pub fn decode(buf: &[u8; KEY_SIZE]) -> Self {
        Key {
            rev: get_u32(buf, 0),
            ts: get_u32(buf, 4),
        }
    }

    /// Encode to the on-disk prefix layout.
    pub fn encode(&self) -> [u8; KEY_SIZE] {
        let mut buf = [0u8; KEY_SIZE];
        buf[0..4].copy_from_slice(&self.rev.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.ts.to_ne_bytes());
        buf
    }
}

/// One accumulator record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// Monotonic revision, assigned by the writer on append.
    pub rev: u32,
    /// Unix timestamp in seconds, aligned to the log interval.
    pub ts: u32,
    /// Total hours observed by this record.
    pub log_hours: f64,
    /// Cumulative frequency-hours, averaged over enabled devices.
    pub hz_hrs: f64,
    /// Per-device cumulative voltage-hours.
    pub volt_hrs: [f64; MAX_DEVICES],
    /// Per-device cumulative watt-hours.
    pub watt_hrs: [f64; MAX_DEVICES],
    /// Per-device cumulative volt-ampere-hours.
    pub va_hrs: [f64; MAX_DEVICES],
}

impl Default for Record {
    fn default() -> Self {
        Record {
            rev: 0,
            ts: 0,
            log_hours: 0.0,
            hz_hrs: 0.0,
            volt_hrs: [0.0; MAX_DEVICES],
            watt_hrs: [0.0; MAX_DEVICES],
            va_hrs: [0.0; MAX_DEVICES],
        }
    }
}

impl Record {
    /// The record's `(rev, ts)` key.
    pub fn key(&self) -> Key {
        Key {
            rev: self.rev,
            ts: self.ts,
        }
    }

    /// Encode into exactly [`RECORD_SIZE`] bytes, key first.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.rev.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.ts.to_ne_bytes());
        buf[8..16].copy_from_slice(&self.log_hours.to_ne_bytes());
        buf[16..24].copy_from_slice(&self.hz_hrs.to_ne_bytes());
        let mut off = 24;
        for bank in [&self.volt_hrs, &self.watt_hrs, &self.va_hrs] {
            for v in bank {
                buf[off..off + 8].copy_from_slice(&v.to_ne_bytes());
                off += 8;
            }
        }
        buf
    }

    /// Decode a whole slot.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Self {
        let mut rec = Record {
            rev: get_u32(buf, 0),
            ts: get_u32(buf, 4),
            log_hours: get_f64(buf, 8),
            hz_hrs: get_f64(buf, 16),
            ..Record::default()
        };
        let mut off = 24;
        for i in 0..MAX_DEVICES {
            rec.volt_hrs[i] = get_f64(buf, off);
            off += 8;
        }
        for i in 0..MAX_DEVICES {
            rec.watt_hrs[i] = get_f64(buf, off);
            off += 8;
        }
        for i in 0..MAX_DEVICES {
            rec.va_hrs[i] = get_f64(buf, off);
            off += 8;
        }
        rec
    }
}

fn get_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn get_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_ne_bytes([
        buf[off],
        buf[off + 1],
        buf[off + 2],
        buf[off + 3],
        buf[off + 4],
        buf[off + 5],
        buf[off + 6],
        buf[off + 7],
    ])
}
