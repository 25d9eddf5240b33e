//! `BoardSync` server library: REST API, server-push event hub, and
//! presence relay.

pub mod auth;
pub mod comments;
pub mod config;
pub mod hub;
pub mod presence;
pub mod routes;
pub mod store;
pub mod tasks;
