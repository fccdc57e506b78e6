//! Metric names and recorder installation.
//!
//! All counters are monotonic; rates are derived by the scraper. The
//! Prometheus handle returned by [`install`] backs the HTTP `/metrics`
//! route.

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Total disk IOs (reads and appends) issued by the datalog.
pub const DATALOG_IO: &str = "datalog_io_total";

/// Device reads that failed during collection passes.
pub const COLLECT_ERRORS: &str = "collect_errors_total";

/// Cumulative wall time spent in collection passes, in milliseconds.
pub const COLLECT_TIME_MS: &str = "collect_time_ms_total";

/// Mean per-device collection time of the last pass, in milliseconds.
pub const COLLECT_DEVICE_AVG_MS: &str = "collect_device_avg_ms";

/// Install the global Prometheus recorder and describe the appliance
/// metrics. Call once at boot, before the first sample or append.
pub fn install() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_counter!(DATALOG_IO, Unit::Count, "Disk IOs issued by the datalog");
    describe_counter!(COLLECT_ERRORS, Unit::Count, "Device reads that failed");
    describe_counter!(
        COLLECT_TIME_MS,
        Unit::Milliseconds,
        "Cumulative collection time"
    );
    describe_gauge!(
        COLLECT_DEVICE_AVG_MS,
        Unit::Milliseconds,
        "Mean per-device collection time of the last pass"
    );
    Ok(handle)
}
