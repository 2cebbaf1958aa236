//! Discoverable services - request handlers announced to the fabric.
//!
//! A [`ServiceInfo`] describes a service: its type, a unique id, a ttl,
//! free-form metadata and one [`RequestHandler`] per request topic. The
//! [`ServiceRegistry`] binds those handlers to the dispatcher and announces
//! the service on the registry topics.
//!
//! ## Quick Start
//!
//! ```
//! use switchboard::message::Request;
//! use switchboard::service::{HandlerError, ServiceInfo};
//!
//! let info = ServiceInfo::new("greeter").add_topic("/svc/greet", |req: &Request| -> Result<Vec<u8>, HandlerError> {
//!     let name = req.payload_str().ok_or_else(|| HandlerError::DecodeFailed("utf-8".into()))?;
//!     Ok(format!("hello {}", name).into_bytes())
//! });
//! assert_eq!(info.service_type(), "greeter");
//! // client.register_service_sync(info, None)?;
//! ```
//!
//! Every inbound request on a service topic is answered on the request's
//! reply-to topic: with a Response carrying the handler's bytes, or with an
//! ErrorResponse carrying [`HandlerError::error_code`] when the handler
//! fails or panics.

mod error;
mod info;
mod registry;

pub use error::HandlerError;
pub use info::{RequestHandler, ServiceInfo, ServiceRegistration, ServiceUnregistration, DEFAULT_TTL};
pub use registry::{ServiceRegistry, REGISTER_TOPIC, UNREGISTER_TOPIC};
