//! Once-per-second collection of instantaneous meter values.
//!
//! The sampler polls every enabled device over the field bus, applies
//! calibration and polarity reversal, derives apparent and real power, and
//! folds the sample into the device's accumulator. It runs on the
//! data-plane task queue and paces itself to one pass per second.

use crate::bus::MeterBus;
use crate::clock;
use crate::device::DeviceBank;
use crate::metrics::{COLLECT_DEVICE_AVG_MS, COLLECT_ERRORS, COLLECT_TIME_MS};
use metrics::{counter, gauge};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Periodic collection task.
pub struct Sampler {
    bus: Box<dyn MeterBus>,
    devices: Arc<DeviceBank>,
}

impl Sampler {
    /// A sampler polling `devices` over `bus`.
    pub fn new(bus: Box<dyn MeterBus>, devices: Arc<DeviceBank>) -> Self {
        Sampler { bus, devices }
    }

    /// Scheduler entry point; returns ms until the next collection pass.
    pub fn run(&mut self) -> u64 {
        let start = clock::uptime_ms();
        let targets = self.devices.enabled_addrs();
        let mut polled = 0u32;

        for (slot, addr) in targets {
            let t0 = clock::uptime_ms();
            let frame = match self.bus.read_frame(addr) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(addr, %err, "could not read data from device");
                    counter!(COLLECT_ERRORS).increment(1);
                    continue;
                }
            };

            let now_ms = clock::uptime_ms();
            let mut slots = self.devices.lock();
            let Some(dev) = slots.get_mut(slot).and_then(Option::as_mut) else {
                continue;
            };
            if !dev.enabled {
                continue;
            }
            let mut volts = frame.volts * f64::from(dev.calibration);
            let mut amps = frame.amps;
            if dev.reversed {
                volts = -volts;
                amps = -amps;
            }
            let va = volts * amps;
            let watts = va * frame.pf;
            dev.set_energy(volts, watts, va, frame.hz, now_ms);
            polled += 1;
            trace!(
                addr,
                volts,
                watts,
                va,
                hz = frame.hz,
                took_ms = clock::uptime_ms() - t0,
                "sampled device"
            );
        }

        let took = clock::uptime_ms().saturating_sub(start);
        counter!(COLLECT_TIME_MS).increment(took);
        if polled > 0 {
            gauge!(COLLECT_DEVICE_AVG_MS).set(took as f64 / f64::from(polled));
        }
        debug!(took_ms = took, polled, "collection pass complete");

        1000u64.saturating_sub(took).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MeterFrame;
    use crate::config::DeviceConfig;
    use crate::error::{MeterError, MeterResult};

    /// Bus that answers from a fixed table and fails unknown addresses.
    struct ScriptedBus {
        frames: Vec<(u8, MeterFrame)>,
    }

    impl MeterBus for ScriptedBus {
        fn read_frame(&mut self, addr: u8) -> MeterResult<MeterFrame> {
            self.frames
                .iter()
                .find(|(a, _)| *a == addr)
                .map(|(_, f)| *f)
                .ok_or_else(|| MeterError::Bus(format!("no reply from {addr}")))
        }
    }

    fn bank() -> Arc<DeviceBank> {
        Arc::new(DeviceBank::from_config(&[
            DeviceConfig {
                addr: 1,
                name: "mains".to_string(),
                calibration: 2.0,
                reversed: false,
                enabled: true,
            },
            DeviceConfig {
                addr: 2,
                name: "solar".to_string(),
                calibration: 1.0,
                reversed: true,
                enabled: true,
            },
        ]))
    }

    #[test]
    fn pass_applies_calibration_and_reversal() {
        let devices = bank();
        let bus = ScriptedBus {
            frames: vec![
                (
                    1,
                    MeterFrame {
                        volts: 115.0,
                        amps: 4.0,
                        pf: 0.5,
                        hz: 50.0,
                    },
                ),
                (
                    2,
                    MeterFrame {
                        volts: 230.0,
                        amps: 2.0,
                        pf: 1.0,
                        hz: 50.0,
                    },
                ),
            ],
        };
        let mut sampler = Sampler::new(Box::new(bus), Arc::clone(&devices));
        let next = sampler.run();
        assert!(next >= 1 && next <= 1000);

        let slots = devices.lock();
        let mains = slots[0].as_ref().map(|d| d.current).unwrap_or_default();
        // 115 V × 2.0 calibration, 4 A: va = 920, watts = 460.
        assert!((mains.volts - 230.0).abs() < 1e-9);
        assert!((mains.va - 920.0).abs() < 1e-9);
        assert!((mains.watts - 460.0).abs() < 1e-9);

        let solar = slots[1].as_ref().map(|d| d.current).unwrap_or_default();
        // Reversed: both legs negated, so apparent power stays positive.
        assert!((solar.volts + 230.0).abs() < 1e-9);
        assert!((solar.va - 460.0).abs() < 1e-9);
    }

    #[test]
    fn bus_failure_skips_the_device_and_continues() {
        let devices = bank();
        let bus = ScriptedBus {
            frames: vec![(
                2,
                MeterFrame {
                    volts: 230.0,
                    amps: 1.0,
                    pf: 1.0,
                    hz: 50.0,
                },
            )],
        };
        let mut sampler = Sampler::new(Box::new(bus), Arc::clone(&devices));
        sampler.run();

        let slots = devices.lock();
        // Device 1 got nothing; device 2 was still sampled.
        assert_eq!(slots[0].as_ref().map(|d| d.current.volts), Some(0.0));
        assert_eq!(slots[1].as_ref().map(|d| d.current.volts), Some(-230.0));
    }
}
