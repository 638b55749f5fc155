//! Port traits: the narrow interfaces the domain needs from the outside world.

pub mod advisory_port;
pub mod config_port;
pub mod data_port;
pub mod exchange_port;
