//! `BoardSync` client library.
//!
//! Keeps a local replica of the shared task board converged with the
//! server through independently toggleable sync channels: periodic
//! polling, a server-push event stream, and a presence relay for typing
//! indicators.

pub mod api;
pub mod channels;
pub mod config;
pub mod poller;
pub mod push;
pub mod reconcile;
pub mod typing;
