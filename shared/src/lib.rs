//! Types shared between the round server and its clients.

pub mod config;
pub mod geometry;
pub mod model;
pub mod protocol;
