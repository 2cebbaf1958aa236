//! Service descriptions and the registration payloads sent for them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::HandlerError;
use crate::message::Request;

/// Default lifetime of a registration before the fabric forgets it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// How long before expiry a registration is refreshed.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Answers requests addressed to one of a service's topics.
///
/// Closures of the form `Fn(&Request) -> Result<Vec<u8>, HandlerError>`
/// implement this trait. `Ok` bytes become the payload of the Response;
/// an `Err` becomes an ErrorResponse.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &Request) -> Result<Vec<u8>, HandlerError>;
}

impl<F> RequestHandler for F
where
    F: Fn(&Request) -> Result<Vec<u8>, HandlerError> + Send + Sync,
{
    fn handle(&self, request: &Request) -> Result<Vec<u8>, HandlerError> {
        self(request)
    }
}

/// A discoverable service: identity, lifetime, metadata and one request
/// handler per topic.
///
/// ## Example
///
/// ```
/// use std::time::Duration;
/// use switchboard::service::ServiceInfo;
///
/// let info = ServiceInfo::new("echo")
///     .with_ttl(Duration::from_secs(600))
///     .with_metadata("region", "eu")
///     .add_topic("/svc/echo", |req: &switchboard::message::Request| -> Result<Vec<u8>, switchboard::service::HandlerError> {
///         Ok(req.payload().to_vec())
///     });
///
/// assert_eq!(info.topics(), vec!["/svc/echo"]);
/// ```
#[derive(Clone)]
pub struct ServiceInfo {
    service_type: String,
    service_id: String,
    ttl: Duration,
    metadata: BTreeMap<String, String>,
    handlers: BTreeMap<String, Arc<dyn RequestHandler>>,
}

impl ServiceInfo {
    /// Create a service of the given type with a fresh service id.
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: Uuid::new_v4().to_string(),
            ttl: DEFAULT_TTL,
            metadata: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }

    pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
        self.service_id = service_id.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Register a request handler for `topic`. A later handler for the same
    /// topic replaces the earlier one.
    pub fn add_topic<H>(mut self, topic: impl Into<String>, handler: H) -> Self
    where
        H: RequestHandler + 'static,
    {
        self.handlers.insert(topic.into(), Arc::new(handler));
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Request topics, in sorted order.
    pub fn topics(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    pub(crate) fn handlers(&self) -> impl Iterator<Item = (&String, &Arc<dyn RequestHandler>)> {
        self.handlers.iter()
    }

    /// Time after registering when the registration should be sent again.
    ///
    /// One minute before expiry, but never earlier than half the ttl.
    pub fn refresh_after(&self) -> Duration {
        self.ttl
            .checked_sub(REFRESH_MARGIN)
            .filter(|d| *d >= self.ttl / 2)
            .unwrap_or(self.ttl / 2)
    }

    /// Payload announcing this service.
    pub fn registration(&self) -> ServiceRegistration {
        ServiceRegistration {
            service_type: self.service_type.clone(),
            service_id: self.service_id.clone(),
            request_channels: self.handlers.keys().cloned().collect(),
            ttl_mins: ttl_minutes(self.ttl),
            meta_data: self.metadata.clone(),
        }
    }
}

impl fmt::Debug for ServiceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceInfo")
            .field("service_type", &self.service_type)
            .field("service_id", &self.service_id)
            .field("ttl", &self.ttl)
            .field("metadata", &self.metadata)
            .field("topics", &self.topics())
            .finish()
    }
}

/// Whole minutes, rounded up, at least one.
fn ttl_minutes(ttl: Duration) -> u64 {
    ttl.as_secs().div_ceil(60).max(1)
}

/// JSON body of a request to the registration topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    pub service_type: String,
    pub service_id: String,
    pub request_channels: Vec<String>,
    pub ttl_mins: u64,
    #[serde(default)]
    pub meta_data: BTreeMap<String, String>,
}

/// JSON body of a request to the unregistration topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceUnregistration {
    pub service_id: String,
}
