//! Field-bus seam.
//!
//! The bus client proper (transport, register maps, retries) lives outside
//! this crate; the sampler only needs one instantaneous frame per device per
//! pass, so that is the whole contract. [`SimBus`] stands in for real
//! hardware when running on a bench.

use crate::error::MeterResult;
use rand::Rng;
use std::collections::HashMap;

/// One instantaneous reading from a meter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterFrame {
    /// Line voltage, uncalibrated.
    pub volts: f64,
    /// Line current.
    pub amps: f64,
    /// Power factor.
    pub pf: f64,
    /// Line frequency.
    pub hz: f64,
}

/// Transport used by the sampler to poll meters.
pub trait MeterBus: Send {
    /// Read the instantaneous register frame of the meter at `addr`.
    fn read_frame(&mut self, addr: u8) -> MeterResult<MeterFrame>;
}

/// Simulated bus: a mains-ish voltage with a slowly wandering load per
/// address, for running the appliance without hardware.
pub struct SimBus {
    load: HashMap<u8, f64>,
}

impl SimBus {
    /// A fresh simulated bus.
    pub fn new() -> Self {
        SimBus {
            load: HashMap::new(),
        }
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MeterBus for SimBus {
    fn read_frame(&mut self, addr: u8) -> MeterResult<MeterFrame> {
        let mut rng = rand::thread_rng();
        let load = self
            .load
            .entry(addr)
            .or_insert_with(|| rng.gen_range(0.5..8.0));
        *load = (*load + rng.gen_range(-0.2..0.2)).clamp(0.1, 40.0);
        Ok(MeterFrame {
            volts: 230.0 + rng.gen_range(-2.0..2.0),
            amps: *load,
            pf: rng.gen_range(0.85..0.99),
            hz: 50.0 + rng.gen_range(-0.05..0.05),
        })
    }
}
