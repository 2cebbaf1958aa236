//! Request/response messaging over a publish/subscribe fabric.
//!
//! A [`Client`] wraps a [`Transport`](transport::Transport) and adds:
//!
//! - a versioned binary envelope for four message kinds ([`message`])
//! - request/response correlation with timeouts ([`RequestCorrelator`])
//! - callback dispatch on a bounded worker pool ([`dispatch`])
//! - subscription replay after reconnects ([`SubscriptionRegistry`])
//! - discoverable services with ttl refresh ([`service`])

mod client;
mod config;
mod correlator;
pub mod dispatch;
mod error;
pub mod message;
pub mod service;
mod subscription;
mod sync;
pub mod topic;
pub mod transport;

pub use client::{Client, Responder};
pub use config::ClientConfig;
pub use correlator::{reply_to_topic, RequestCorrelator, ResponseCallback, REPLY_TO_PREFIX};
pub use dispatch::{CallbackDispatcher, CallbackId, DispatchStats, MessageCallback};
pub use error::{ClientError, Result};
pub use message::{ErrorResponse, Event, Message, MessageType, Request, Response};
pub use service::{HandlerError, ServiceInfo};
pub use subscription::SubscriptionRegistry;
pub use topic::Topics;
