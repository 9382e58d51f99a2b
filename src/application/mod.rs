//! Application layer: the order-to-payment pipeline.
//!
//! Each component receives its collaborators through its constructor and is
//! cheap to clone, so request handlers and consumer tasks can share them.

pub mod gateway;
pub mod ingestion;
pub mod otp;
pub mod publisher;
pub mod service;
pub mod settlement;
