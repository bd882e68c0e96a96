//! Forwarding engine of the cefnd named-data forwarder.
//!
//! Packets enter through [`face`], are cut out of the byte stream by
//! [`framer`], and are matched against the [`pit`], [`cs`] and [`fib`] by
//! the [`forwarder`]. Outgoing frames leave through the priority-aware
//! [`tx`] pipeline. [`daemon`] ties the pieces into one event loop driven
//! by sockets, timers and the [`control`] channel.

pub mod config;
pub mod control;
pub mod cs;
pub mod daemon;
pub mod face;
pub mod fib;
pub mod forwarder;
pub mod framer;
pub mod pit;
pub mod routes;
pub mod strategy;
pub mod tx;

pub use config::ForwarderConfig;
pub use daemon::{Daemon, DaemonHandle};
pub use forwarder::{Action, Forwarder};
