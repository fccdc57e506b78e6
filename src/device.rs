//! Metered device model.
//!
//! Each meter on the field bus is one [`Device`] slot. The sampler refreshes
//! its instantaneous values once per second; the [`Bucket`] integrates them
//! into running hour-integrals that the writer folds into log records as
//! deltas. The integrals are per-device and process-local; only the deltas
//! reach the datalog.

use crate::config::DeviceConfig;
use crate::datalog::MAX_DEVICES;
use parking_lot::{Mutex, MutexGuard};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Running accumulator for one device.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bucket {
    /// Instantaneous voltage, calibrated and sign-corrected.
    pub volts: f64,
    /// Instantaneous real power.
    pub watts: f64,
    /// Instantaneous apparent power.
    pub va: f64,
    /// Instantaneous line frequency.
    pub hz: f64,
    /// Cumulative voltage-hours.
    pub volt_hrs: f64,
    /// Cumulative watt-hours.
    pub watt_hrs: f64,
    /// Cumulative volt-ampere-hours.
    pub va_hrs: f64,
    /// Cumulative frequency-hours.
    pub hz_hrs: f64,
    /// Monotonic time the integrals were last advanced to.
    pub ts_ms: u64,
}

/// One metered input on the field bus.
#[derive(Debug, Clone)]
pub struct Device {
    /// Whether the sampler polls this device and the writer logs it.
    pub enabled: bool,
    /// Field-bus address.
    pub addr: u8,
    /// Display name, used as the CSV column prefix.
    pub name: String,
    /// Voltage calibration factor applied to raw frames.
    pub calibration: f32,
    /// Whether the current transformer is mounted backwards.
    pub reversed: bool,
    /// Live accumulator.
    pub current: Bucket,
}

impl Device {
    /// A disabled device at `addr` with default calibration.
    pub fn new(addr: u8, name: impl Into<String>) -> Self {
        Device {
            enabled: false,
            addr,
            name: name.into(),
            calibration: 1.0,
            reversed: false,
            current: Bucket::default(),
        }
    }

    /// Whether the device participates in sampling and logging.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Advance the hour-integrals to `now_ms` using the held instantaneous
    /// values. A stale `now_ms` is a no-op.
    pub fn accumulate(&mut self, now_ms: u64) {
        if now_ms <= self.current.ts_ms {
            return;
        }
        let hrs = (now_ms - self.current.ts_ms) as f64 / MS_PER_HOUR;
        self.current.volt_hrs += self.current.volts * hrs;
        self.current.watt_hrs += self.current.watts * hrs;
        self.current.va_hrs += self.current.va * hrs;
        self.current.hz_hrs += self.current.hz * hrs;
        self.current.ts_ms = now_ms;
    }

    /// Fold a fresh sample in: update the instantaneous values and integrate
    /// up to the sample time.
    pub fn set_energy(&mut self, volts: f64, watts: f64, va: f64, hz: f64, now_ms: u64) {
        self.current.volts = volts;
        self.current.watts = watts;
        self.current.va = va;
        self.current.hz = hz;
        self.accumulate(now_ms);
    }

    /// Disable the slot and clear its accumulated state so a re-enabled
    /// device starts from a clean baseline.
    pub fn reset(&mut self) {
        self.enabled = false;
        self.name.clear();
        self.calibration = 1.0;
        self.reversed = false;
        self.current = Bucket::default();
    }
}

/// Fixed bank of device slots shared by the sampler, the writer and the API.
pub struct DeviceBank {
    slots: Mutex<Vec<Option<Device>>>,
}

impl DeviceBank {
    /// An empty bank of [`MAX_DEVICES`] slots.
    pub fn new() -> Self {
        DeviceBank {
            slots: Mutex::new(vec![None; MAX_DEVICES]),
        }
    }

    /// Populate slots in configuration order.
    pub fn from_config(devices: &[DeviceConfig]) -> Self {
        let bank = Self::new();
        {
            let mut slots = bank.slots.lock();
            for (i, cfg) in devices.iter().take(MAX_DEVICES).enumerate() {
                let mut dev = Device::new(cfg.addr, cfg.name.clone());
                dev.enabled = cfg.enabled;
                dev.calibration = cfg.calibration;
                dev.reversed = cfg.reversed;
                slots[i] = Some(dev);
            }
        }
        bank
    }

    /// Lock the bank for direct slot access.
    pub fn lock(&self) -> MutexGuard<'_, Vec<Option<Device>>> {
        self.slots.lock()
    }

    /// Slot indices and bus addresses of enabled devices.
    pub fn enabled_addrs(&self) -> Vec<(usize, u8)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|dev| dev.enabled)
                    .map(|dev| (i, dev.addr))
            })
            .collect()
    }

    /// Slot indices and names of enabled, named devices (the response
    /// columns of the energy endpoint).
    pub fn columns(&self) -> Vec<(usize, String)> {
        self.slots
            .lock()
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.as_ref()
                    .filter(|dev| dev.enabled && !dev.name.is_empty())
                    .map(|dev| (i, dev.name.clone()))
            })
            .collect()
    }
}

impl Default for DeviceBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulate_integrates_by_elapsed_hours() {
        let mut dev = Device::new(1, "mains");
        dev.set_energy(230.0, 1000.0, 1100.0, 50.0, 0);
        dev.accumulate(3_600_000); // one hour later

        assert!((dev.current.volt_hrs - 230.0).abs() < 1e-9);
        assert!((dev.current.watt_hrs - 1000.0).abs() < 1e-9);
        assert!((dev.current.va_hrs - 1100.0).abs() < 1e-9);
        assert!((dev.current.hz_hrs - 50.0).abs() < 1e-9);
    }

    #[test]
    fn accumulate_ignores_stale_time() {
        let mut dev = Device::new(1, "mains");
        dev.set_energy(230.0, 1000.0, 1100.0, 50.0, 5_000);
        dev.accumulate(4_000);
        assert_eq!(dev.current.ts_ms, 5_000);
        assert_eq!(dev.current.volt_hrs, 0.0);
    }

    #[test]
    fn set_energy_attributes_the_elapsed_window_to_the_new_sample() {
        let mut dev = Device::new(1, "mains");
        dev.set_energy(230.0, 0.0, 0.0, 50.0, 0);
        dev.set_energy(231.0, 0.0, 0.0, 50.0, 1_000);
        // The second sample's voltage covers the elapsed second.
        assert!((dev.current.volt_hrs - 231.0 / 3600.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut dev = Device::new(1, "mains");
        dev.enabled = true;
        dev.set_energy(230.0, 1000.0, 1100.0, 50.0, 1_000);
        dev.reset();
        assert!(!dev.enabled);
        assert_eq!(dev.current.watt_hrs, 0.0);
        assert_eq!(dev.current.ts_ms, 0);
    }

    #[test]
    fn bank_reports_enabled_columns_only() {
        let bank = DeviceBank::from_config(&[
            DeviceConfig {
                addr: 1,
                name: "mains".to_string(),
                calibration: 1.0,
                reversed: false,
                enabled: true,
            },
            DeviceConfig {
                addr: 2,
                name: "solar".to_string(),
                calibration: 1.0,
                reversed: true,
                enabled: false,
            },
        ]);
        assert_eq!(bank.enabled_addrs(), vec![(0, 1)]);
        assert_eq!(bank.columns(), vec![(0, "mains".to_string())]);
    }
}
