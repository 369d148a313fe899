//! Shared primitives for the tsi-kernel workspace: the error taxonomy,
//! process diagnostics, content hashing, and small domain newtypes that
//! every other `tsi-*` crate depends on.

pub mod diag;
pub mod domain;
pub mod error;
pub mod hash;

pub use domain::{Interval, RecordType, TimestampMs};
pub use error::{CoreError, CoreResult, ErrorCode, SourceLocation};
