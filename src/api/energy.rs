//! `/energy`: CSV stream of derived quantities over a time range.
//!
//! The handler reads a baseline record one interval before the range, then
//! walks the range one interval step at a time, emitting per-device mean
//! voltage, current, real power, energy and power factor derived from the
//! difference of consecutive records. Rows are produced lazily into the
//! response body; the whole result is never buffered.

use super::ApiState;
use crate::clock;
use crate::datalog::{DataLog, Record};
use crate::error::MeterError;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use std::convert::Infallible;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Upper bound on rows per response.
const MAX_STEPS: u32 = 100;

#[derive(Debug, Deserialize)]
pub(super) struct EnergyQuery {
    start: u32,
    end: Option<u32>,
    interval: Option<u32>,
}

pub(super) async fn handle_energy(
    State(state): State<Arc<ApiState>>,
    Query(q): Query<EnergyQuery>,
) -> Response {
    let base = state.datalog.interval();
    let mut start = q.start;
    let mut end = q.end.unwrap_or_else(clock::unix_now);
    let mut interval = q.interval.unwrap_or(base);

    start -= start % base;
    end -= end % base;
    interval -= interval % base;

    if start >= end || interval == 0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Invalid parameters"})),
        )
            .into_response();
    }
    if state.datalog.entries() == 0 {
        return StatusCode::NO_CONTENT.into_response();
    }

    let columns = state.devices.columns();
    if columns.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let last_ts = state.datalog.last_ts();
    if start > last_ts {
        return StatusCode::NO_CONTENT.into_response();
    }
    if end > last_ts {
        end = last_ts;
    }
    // Bound the response size.
    end = end.min(start.saturating_add(interval.saturating_mul(MAX_STEPS)));

    debug!(start, end, interval, "energy request");

    let baseline = match state
        .datalog
        .read(start.saturating_sub(interval), state.read_timeout)
    {
        Ok(lookup) => lookup.into_record(),
        Err(MeterError::MutexTimeout) => {
            return (StatusCode::REQUEST_TIMEOUT, "Request Timeout").into_response();
        }
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": "Internal Error",
                    "reason": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    let rows = EnergyRows {
        datalog: Arc::clone(&state.datalog),
        columns: columns.clone(),
        prev: baseline,
        ts: start,
        end,
        interval,
        timeout: state.read_timeout,
        done: false,
    };
    let stream = futures::stream::iter(
        std::iter::once(csv_header(&columns))
            .chain(rows)
            .map(Ok::<_, Infallible>),
    );

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/csv; charset=utf-8")
        .body(Body::from_stream(stream))
    {
        Ok(response) => response,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Lazy row producer walking the range one step per `next` call.
struct EnergyRows {
    datalog: Arc<DataLog>,
    columns: Vec<(usize, String)>,
    prev: Record,
    ts: u32,
    end: u32,
    interval: u32,
    timeout: Duration,
    done: bool,
}

impl Iterator for EnergyRows {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        while !self.done {
            let ts = self.ts;
            if ts > self.end {
                self.done = true;
                break;
            }
            match ts.checked_add(self.interval) {
                Some(next) => self.ts = next,
                None => self.done = true,
            }

            let rec = match self.datalog.read(ts, self.timeout) {
                Ok(lookup) => lookup.into_record(),
                Err(err) => {
                    self.done = true;
                    return Some(format!("#error reading datalog: {err}\n"));
                }
            };
            // The same stored record resolves for every step inside a gap;
            // emit it once.
            if rec.rev == self.prev.rev {
                continue;
            }
            let elapsed_hours = rec.log_hours - self.prev.log_hours;
            if elapsed_hours <= 0.0 {
                self.prev = rec;
                continue;
            }

            let row = render_row(ts, &self.columns, &rec, &self.prev, elapsed_hours);
            self.prev = rec;
            return Some(row);
        }
        None
    }
}

fn csv_header(columns: &[(usize, String)]) -> String {
    let mut header = String::from("timestamp");
    for (_, name) in columns {
        let _ = write!(header, ",{name}.V,{name}.A,{name}.W,{name}.Wh,{name}.PF");
    }
    header.push('\n');
    header
}

fn render_row(
    ts: u32,
    columns: &[(usize, String)],
    rec: &Record,
    prev: &Record,
    elapsed_hours: f64,
) -> String {
    let mut row = ts.to_string();
    for (idx, _) in columns {
        let i = *idx;
        let voltage = (rec.volt_hrs[i] - prev.volt_hrs[i]) / elapsed_hours;
        let mut energy_wh = rec.watt_hrs[i] - prev.watt_hrs[i];
        let power = energy_wh / elapsed_hours;
        let apparent = (rec.va_hrs[i] - prev.va_hrs[i]) / elapsed_hours;
        if energy_wh < 0.0 {
            energy_wh = 0.0;
        }
        let current = if voltage != 0.0 { apparent / voltage } else { 0.0 };
        let power_factor = if apparent > 0.0 { power / apparent } else { 0.0 };

        push_value(&mut row, voltage, 3);
        push_value(&mut row, current, 3);
        push_value(&mut row, power, 3);
        push_value(&mut row, energy_wh, 3);
        push_value(&mut row, power_factor, 4);
    }
    row.push('\n');
    row
}

/// Append one CSV cell; non-finite values render as an empty cell.
fn push_value(row: &mut String, value: f64, precision: usize) {
    row.push(',');
    if value.is_finite() {
        let _ = write!(row, "{value:.precision$}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lists_five_columns_per_device() {
        let header = csv_header(&[(0, "mains".to_string()), (3, "solar".to_string())]);
        assert_eq!(
            header,
            "timestamp,mains.V,mains.A,mains.W,mains.Wh,mains.PF,\
             solar.V,solar.A,solar.W,solar.Wh,solar.PF\n"
        );
    }

    #[test]
    fn non_finite_values_render_empty() {
        let mut row = String::new();
        push_value(&mut row, f64::NAN, 3);
        push_value(&mut row, 1.5, 3);
        assert_eq!(row, ",,1.500");
    }

    #[test]
    fn negative_energy_is_clamped_after_power_is_derived() {
        let mut prev = Record::default();
        prev.rev = 1;
        prev.watt_hrs[0] = 10.0;
        let mut rec = Record::default();
        rec.rev = 2;
        rec.watt_hrs[0] = 4.0;

        let row = render_row(1000, &[(0, "m".to_string())], &rec, &prev, 1.0);
        // Power keeps its sign, the energy cell clamps to zero.
        assert!(row.starts_with("1000,"));
        assert!(row.contains(",-6.000,0.000,"));
    }
}
