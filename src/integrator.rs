//! Writer/integrator: the sole producer of datalog records.
//!
//! Once per log interval the integrator folds every enabled device's
//! accumulator delta into its in-progress record, adds the monotonic elapsed
//! hours, and appends the record. The in-progress record is owned
//! exclusively by this task; readers only ever see what the datalog has
//! accepted.
//!
//! The task seeds itself from the log tail on first run (or after a
//! rejected append) and does not backfill gaps: if the appliance was off,
//! the log is simply sparse there.

use crate::clock;
use crate::datalog::{DataLog, Record, MAX_DEVICES};
use crate::device::DeviceBank;
use crate::error::MeterError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Wall clock not yet synchronized; retry shortly.
const CLOCK_RETRY_MS: u64 = 10;
/// Scheduler fired a touch early; come straight back.
const EARLY_RETRY_MS: u64 = 2;
/// Behind the wall clock; write again at the next possible moment.
const CATCHUP_DELAY_MS: u64 = 1;

const SEED_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Periodic integration task feeding the datalog.
pub struct Integrator {
    datalog: Arc<DataLog>,
    devices: Arc<DeviceBank>,
    rec: Record,
    seeded: bool,
    last_ms: u64,
    volt_base: [f64; MAX_DEVICES],
    watt_base: [f64; MAX_DEVICES],
    va_base: [f64; MAX_DEVICES],
    hz_base: f64,
}

impl Integrator {
    /// An unseeded integrator; it seeds itself on its first run.
    pub fn new(datalog: Arc<DataLog>, devices: Arc<DeviceBank>) -> Self {
        Integrator {
            datalog,
            devices,
            rec: Record::default(),
            seeded: false,
            last_ms: clock::uptime_ms(),
            volt_base: [0.0; MAX_DEVICES],
            watt_base: [0.0; MAX_DEVICES],
            va_base: [0.0; MAX_DEVICES],
            hz_base: 0.0,
        }
    }

    /// Scheduler entry point; returns ms until the next run.
    pub fn run(&mut self) -> u64 {
        self.tick(clock::unix_now(), clock::uptime_ms())
    }

    fn tick(&mut self, now: u32, now_ms: u64) -> u64 {
        let started = clock::uptime_ms();
        let interval = self.datalog.interval();

        if now < clock::CLOCK_SANE_EPOCH {
            return CLOCK_RETRY_MS;
        }

        if !self.seeded {
            if self.datalog.entries() > 0 {
                match self.datalog.read(self.datalog.last_ts(), SEED_READ_TIMEOUT) {
                    Ok(lookup) => self.rec = lookup.into_record(),
                    Err(err) => {
                        warn!(%err, "could not seed from the log tail");
                        return CLOCK_RETRY_MS;
                    }
                }
            }

            // Do not try to fill the gaps, just skip ahead.
            self.rec.ts = now - now % interval;
            self.seeded = true;

            // We are early; come back on the boundary.
            let off = now % interval;
            if off > 0 {
                self.rec.ts += interval;
                return u64::from(interval - off) * 1000;
            }
        }

        if now < self.rec.ts {
            return EARLY_RETRY_MS;
        }

        let elapsed_hrs = now_ms.saturating_sub(self.last_ms) as f64 / MS_PER_HOUR;

        let mut curr_hz_hrs = 0.0;
        let mut count = 0u32;
        {
            let mut slots = self.devices.lock();
            for (i, slot) in slots.iter_mut().enumerate() {
                match slot {
                    Some(dev) if dev.enabled => {
                        dev.accumulate(now_ms);
                        self.rec.volt_hrs[i] += dev.current.volt_hrs - self.volt_base[i];
                        self.volt_base[i] = dev.current.volt_hrs;
                        self.rec.watt_hrs[i] += dev.current.watt_hrs - self.watt_base[i];
                        self.watt_base[i] = dev.current.watt_hrs;
                        self.rec.va_hrs[i] += dev.current.va_hrs - self.va_base[i];
                        self.va_base[i] = dev.current.va_hrs;
                        curr_hz_hrs += dev.current.hz_hrs;
                        count += 1;
                    }
                    _ => {
                        // Disabled slots restart from a clean baseline.
                        self.volt_base[i] = 0.0;
                        self.watt_base[i] = 0.0;
                        self.va_base[i] = 0.0;
                    }
                }
            }
        }
        if count > 0 {
            let curr = curr_hz_hrs / f64::from(count);
            self.rec.hz_hrs += curr - self.hz_base;
            self.hz_base = curr;
        }

        self.last_ms = now_ms;
        self.rec.log_hours += elapsed_hrs;

        match self.datalog.write(&mut self.rec) {
            Ok(()) => {
                debug!(ts = self.rec.ts, rev = self.rec.rev, "wrote record to log");
            }
            Err(MeterError::NonIncreasingTimestamp { ts, last }) => {
                // Something else moved the tail under us; drop the record
                // and re-sync on the next tick.
                error!(ts, last, "record does not advance the log, re-seeding");
                self.seeded = false;
                return u64::from(interval) * 1000;
            }
            Err(err) => {
                error!(%err, "could not write record to log");
                return u64::from(interval) * 1000;
            }
        }

        self.rec.ts += interval;
        if self.rec.ts < now {
            return CATCHUP_DELAY_MS;
        }
        let took = clock::uptime_ms().saturating_sub(started);
        (u64::from(self.rec.ts - now) * 1000)
            .saturating_sub(took)
            .max(1)
    }

    #[cfg(test)]
    fn set_last_ms(&mut self, ms: u64) {
        self.last_ms = ms;
    }
}
