//! Domain types and the capability ports the application layer depends on.

pub mod event;
pub mod order;
pub mod payment;
pub mod ports;
pub mod settlement;
