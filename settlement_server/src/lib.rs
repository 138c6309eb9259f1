//! # Settlement server
//! This crate hosts the HTTP surface of the settlement core. It is responsible for:
//! Listening for payment-provider webhook notifications and feeding them to the engine.
//! Exposing the authenticated admin API for refunds, payouts, replay and reconciliation.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `/webhook/payment`: The webhook route for receiving payment events from the provider.
//! * `/api/...`: The admin API. Requires a bearer token; see [routes](routes/index.html).

pub mod auth;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod middleware;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
