//! Custom error types for the appliance.
//!
//! This module defines the primary error type, `MeterError`, for the entire
//! application. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the different kinds of failures that can occur,
//! from configuration and I/O issues to datalog-specific outcomes.
//!
//! The datalog distinguishes *faults* (this enum) from *informational
//! lookup outcomes* ([`crate::datalog::Lookup`]): an out-of-range request
//! still produces a populated record and is not an error.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type MeterResult<T> = std::result::Result<T, MeterError>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum MeterError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Underlying storage I/O failure, bubbled up unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The datalog backing file has not been opened.
    #[error("Datalog is not open")]
    NotOpen,

    /// The datalog holds no records yet.
    #[error("Datalog has no entries")]
    NoEntries,

    /// The bounded wait for the datalog lock expired.
    #[error("Timed out waiting for the datalog lock")]
    MutexTimeout,

    /// A write did not advance past the log tail. This is a programming
    /// model violation on the writer's side; the record is dropped.
    #[error("Record timestamp {ts} does not advance past the log tail {last}")]
    NonIncreasingTimestamp {
        /// Timestamp of the rejected record.
        ts: u32,
        /// Timestamp of the current log tail.
        last: u32,
    },

    /// The backing file failed its consistency check at open and was
    /// removed. Unrecoverable at this level; the writer re-seeds on the
    /// next boot.
    #[error("Datalog file is damaged: {0}")]
    Corruption(String),

    /// A revision outside the retained range was requested.
    #[error("Revision {0} is outside the stored range")]
    RevisionOutOfRange(u32),

    /// The field bus could not produce a frame.
    #[error("Field bus error: {0}")]
    Bus(String),
}
