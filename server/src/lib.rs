//! Loot rush round server library.
//!
//! The round logic (`controller` and the modules it drives) is host-agnostic;
//! `sim`, `game_loop` and `ws` wire it to a simulated world and a WebSocket
//! admin surface.

pub mod chunks;
pub mod config;
pub mod controller;
pub mod error;
pub mod game_loop;
pub mod host;
pub mod invulnerability;
pub mod items;
pub mod lives;
pub mod placement;
pub mod roles;
pub mod scatter;
pub mod sim;
pub mod swap;
pub mod ws;
