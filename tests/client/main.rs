//! Client integration tests over the in-memory broker.
//!
//! Covers the end-to-end behavior of the client facade:
//! - Request/response round trips and correlation under concurrency
//! - Timeouts and late responses
//! - Subscription replay after connection loss
//! - Callback isolation, unsubscribe and undecodable input
//! - Service registration and error translation
//! - Destroy semantics

mod support;
mod correlation;
mod echo;
mod lifecycle;
mod reconnect;
mod services;
