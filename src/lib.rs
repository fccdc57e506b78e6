//! # metermon
//!
//! Core library of the energy-metering appliance. The appliance samples a
//! fleet of electrical meters once per second over a field bus, integrates
//! per-device voltage-hours, watt-hours and volt-ampere-hours, and appends
//! one accumulator record per log interval to a circular on-disk datalog
//! that answers timestamp range queries across months of history.
//!
//! ## Crate structure
//!
//! - **`datalog`**: the time-indexed circular record log — fixed-stride
//!   codec, circular file store, advisory caches and the wrap-aware
//!   interpolating search. This is the heart of the appliance.
//! - **`device`**: per-device accumulator buckets and the shared device
//!   bank.
//! - **`sampler`**: the once-per-second collection pass over the field bus.
//! - **`integrator`**: the periodic writer folding accumulator deltas into
//!   log records.
//! - **`bus`**: the field-bus seam (`MeterBus`) plus a simulated
//!   implementation for benches without hardware.
//! - **`scheduler`**: cooperative task queues, one per core.
//! - **`api`**: the HTTP surface (energy CSV stream, status, metrics,
//!   health).
//! - **`config`**: figment-based settings with validation.
//! - **`error`**: the central `MeterError` type.
//! - **`telemetry`** / **`metrics`**: tracing and Prometheus plumbing.
//! - **`clock`**: monotonic uptime and wall-clock helpers.

pub mod api;
pub mod bus;
pub mod clock;
pub mod config;
pub mod datalog;
pub mod device;
pub mod error;
pub mod integrator;
pub mod metrics;
pub mod sampler;
pub mod scheduler;
pub mod telemetry;
