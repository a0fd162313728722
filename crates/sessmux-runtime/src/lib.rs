//! sessmux-runtime: the per-tab session provider.
//!
//! Wires the pure state machines from `sessmux-core` and the transports
//! from `sessmux-bus` into a tokio task per tab: 1-second tick, merged
//! cross-tab event stream, command surface for the UI, navigation and the
//! `401` interceptor.

pub mod clock;
pub mod config;
pub mod interceptor;
pub mod navigator;
pub mod provider;

pub use sessmux_core::types;
