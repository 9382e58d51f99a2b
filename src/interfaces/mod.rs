//! File formats the CLI reads and writes.

pub mod csv;
pub mod json;
