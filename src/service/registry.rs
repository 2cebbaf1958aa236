//! Service registration over the request correlator.
//!
//! Registering a service binds one request callback per service topic and
//! announces the service with a JSON request to [`REGISTER_TOPIC`]. The
//! fabric's registry acknowledges with a Response, or refuses with an
//! ErrorResponse.
//!
//! Registrations expire after the service's ttl, so a background thread
//! re-announces each service shortly before that, and every reconnect
//! re-announces all of them.

use std::collections::{BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use super::error::HandlerError;
use super::info::{RequestHandler, ServiceInfo, ServiceUnregistration};
use crate::correlator::RequestCorrelator;
use crate::dispatch::pool::panic_message;
use crate::dispatch::{CallbackDispatcher, CallbackId, MessageCallback};
use crate::error::{ClientError, Result};
use crate::message::{codec, ErrorResponse, Message, MessageType, Request, Response};
use crate::subscription::SubscriptionRegistry;
use crate::sync::lock;
use crate::transport::{PublishOptions, TransportRef};

/// Topic service registrations are sent to.
pub const REGISTER_TOPIC: &str = "/switchboard/svcregistry/register";

/// Topic service unregistrations are sent to.
pub const UNREGISTER_TOPIC: &str = "/switchboard/svcregistry/unregister";

struct ActiveService {
    info: ServiceInfo,
    callbacks: Vec<(String, CallbackId)>,
    announced: Instant,
}

/// State shared with the ttl refresher thread.
struct Shared {
    services: Mutex<HashMap<String, ActiveService>>,
    correlator: Arc<RequestCorrelator>,
}

impl Shared {
    /// Send a registration without waiting for the acknowledgement.
    fn announce(&self, info: &ServiceInfo) -> Result<()> {
        let request = registration_request(info)?;
        let service_id = info.service_id().to_string();
        self.correlator.send_async(request, move |outcome| {
            match outcome.and_then(check_ack) {
                Ok(()) => debug!(%service_id, "service registration acknowledged"),
                Err(e) => warn!(%service_id, error = %e, "service registration failed"),
            }
        })?;
        Ok(())
    }

    /// Re-announce every service whose registration is due for a refresh.
    fn refresh(&self, now: Instant) {
        let due: Vec<ServiceInfo> = {
            let mut services = lock(&self.services);
            services
                .values_mut()
                .filter(|s| now.saturating_duration_since(s.announced) >= s.info.refresh_after())
                .map(|s| {
                    s.announced = now;
                    s.info.clone()
                })
                .collect()
        };

        for info in due {
            debug!(service_id = info.service_id(), "refreshing service registration");
            if let Err(e) = self.announce(&info) {
                debug!(service_id = info.service_id(), error = %e, "refresh deferred");
            }
        }
    }
}

/// Handle to the ttl refresher thread. Drop or call `stop()` to shut down.
struct Refresher {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl Refresher {
    fn spawn(shared: Arc<Shared>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = channel();
        let handle = thread::Builder::new()
            .name("switchboard-service-ttl".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => shared.refresh(Instant::now()),
                }
            })?;
        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Refresher {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Services this client offers to the fabric.
pub struct ServiceRegistry {
    shared: Arc<Shared>,
    transport: TransportRef,
    subscriptions: Arc<SubscriptionRegistry>,
    dispatcher: Arc<CallbackDispatcher>,
    client_id: String,
    closed: AtomicBool,
    refresher: Mutex<Option<Refresher>>,
}

impl ServiceRegistry {
    pub(crate) fn new(
        transport: TransportRef,
        subscriptions: Arc<SubscriptionRegistry>,
        dispatcher: Arc<CallbackDispatcher>,
        correlator: Arc<RequestCorrelator>,
        client_id: &str,
        ttl_check_interval: Duration,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            services: Mutex::new(HashMap::new()),
            correlator,
        });
        let refresher = Refresher::spawn(Arc::clone(&shared), ttl_check_interval)?;

        Ok(Self {
            shared,
            transport,
            subscriptions,
            dispatcher,
            client_id: client_id.to_string(),
            closed: AtomicBool::new(false),
            refresher: Mutex::new(Some(refresher)),
        })
    }

    /// Bind the service's handlers and register it, waiting for the fabric
    /// to acknowledge (up to `timeout`, or the default request timeout).
    ///
    /// On any failure the handlers are unbound again.
    pub fn register_sync(&self, info: ServiceInfo, timeout: Option<Duration>) -> Result<()> {
        let request = registration_request(&info)?;
        self.bind(&info)?;

        let outcome = self
            .shared
            .correlator
            .send_sync(request, timeout)
            .and_then(check_ack);
        match outcome {
            Ok(()) => {
                info!(
                    service_id = info.service_id(),
                    service_type = info.service_type(),
                    "service registered"
                );
                Ok(())
            }
            Err(e) => {
                self.unbind(info.service_id());
                Err(e)
            }
        }
    }

    /// Bind the service's handlers and send the registration without
    /// waiting. A refused registration is logged; the handlers stay bound.
    pub fn register_async(&self, info: ServiceInfo) -> Result<()> {
        self.bind(&info)?;
        if let Err(e) = self.shared.announce(&info) {
            self.unbind(info.service_id());
            return Err(e);
        }
        debug!(service_id = info.service_id(), "service registration sent");
        Ok(())
    }

    /// Unbind a service and unregister it, waiting for the acknowledgement.
    pub fn unregister_sync(&self, service_id: &str, timeout: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let request = unregistration_request(service_id)?;
        self.unbind(service_id).ok_or_else(|| not_registered(service_id))?;

        self.shared
            .correlator
            .send_sync(request, timeout)
            .and_then(check_ack)?;
        info!(service_id, "service unregistered");
        Ok(())
    }

    /// Unbind a service and send the unregistration without waiting.
    pub fn unregister_async(&self, service_id: &str) -> Result<()> {
        self.ensure_open()?;
        let request = unregistration_request(service_id)?;
        self.unbind(service_id).ok_or_else(|| not_registered(service_id))?;

        let id = service_id.to_string();
        self.shared.correlator.send_async(request, move |outcome| {
            if let Err(e) = outcome.and_then(check_ack) {
                warn!(service_id = %id, error = %e, "service unregistration failed");
            }
        })?;
        Ok(())
    }

    /// Ids of the services currently bound.
    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.shared.services).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_registered(&self, service_id: &str) -> bool {
        lock(&self.shared.services).contains_key(service_id)
    }

    /// Re-announce every bound service on a fresh session.
    pub fn on_connect(&self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        let infos: Vec<ServiceInfo> = lock(&self.shared.services)
            .values_mut()
            .map(|s| {
                s.announced = now;
                s.info.clone()
            })
            .collect();

        if !infos.is_empty() {
            info!(count = infos.len(), "re-registering services after connect");
        }
        for info in infos {
            if let Err(e) = self.shared.announce(&info) {
                warn!(service_id = info.service_id(), error = %e, "failed to re-register service");
            }
        }
    }

    /// Stop refreshing and unregister every service, best effort.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(refresher) = lock(&self.refresher).take() {
            refresher.stop();
        }

        let services: Vec<ActiveService> = lock(&self.shared.services)
            .drain()
            .map(|(_, service)| service)
            .collect();
        for service in services {
            for (topic, id) in &service.callbacks {
                self.dispatcher.remove_callback(MessageType::Request, topic, *id);
            }
            let service_id = service.info.service_id();
            let sent = unregistration_request(service_id).and_then(|request| {
                self.shared.correlator.send_async(request, |_| {})
            });
            match sent {
                Ok(_) => debug!(service_id, "service unregistration sent on shutdown"),
                Err(e) => debug!(service_id, error = %e, "skipping unregistration on shutdown"),
            }
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientDestroyed);
        }
        Ok(())
    }

    /// Reserve the service id and attach one request callback per topic.
    fn bind(&self, info: &ServiceInfo) -> Result<()> {
        self.ensure_open()?;
        if info.topics().is_empty() {
            return Err(ClientError::invalid_argument(format!(
                "service {} has no request topics",
                info.service_id()
            )));
        }

        let service_id = info.service_id().to_string();
        {
            let mut services = lock(&self.shared.services);
            if services.contains_key(&service_id) {
                return Err(ClientError::invalid_argument(format!(
                    "service {} is already registered",
                    service_id
                )));
            }
            services.insert(
                service_id.clone(),
                ActiveService {
                    info: info.clone(),
                    callbacks: Vec::new(),
                    announced: Instant::now(),
                },
            );
        }

        let mut callbacks = Vec::new();
        for (topic, handler) in info.handlers() {
            let callback = ServiceCallback {
                service_id: service_id.clone(),
                client_id: self.client_id.clone(),
                handler: Arc::clone(handler),
                transport: Arc::clone(&self.transport),
            };
            match self
                .dispatcher
                .register_shared(MessageType::Request, topic, Arc::new(callback), true)
            {
                Ok(id) => callbacks.push((topic.clone(), id)),
                Err(e) => {
                    self.remove_callbacks(&callbacks);
                    lock(&self.shared.services).remove(&service_id);
                    return Err(e);
                }
            }
        }

        let orphaned = match lock(&self.shared.services).get_mut(&service_id) {
            Some(active) => {
                active.callbacks = callbacks;
                None
            }
            None => Some(callbacks),
        };
        // Unregistered while the callbacks were being attached.
        if let Some(callbacks) = orphaned {
            self.remove_callbacks(&callbacks);
        }
        Ok(())
    }

    /// Remove a service's callbacks and the topics no other service uses.
    fn unbind(&self, service_id: &str) -> Option<ServiceInfo> {
        let (service, still_used) = {
            let mut services = lock(&self.shared.services);
            let service = services.remove(service_id)?;
            let still_used: BTreeSet<String> = services
                .values()
                .flat_map(|s| s.info.topics().into_iter().map(str::to_string))
                .collect();
            (service, still_used)
        };

        self.remove_callbacks(&service.callbacks);
        let released: Vec<String> = service
            .info
            .topics()
            .into_iter()
            .filter(|t| !still_used.contains(*t))
            .map(str::to_string)
            .collect();
        if !released.is_empty() {
            if let Err(e) = self.subscriptions.unsubscribe(released) {
                warn!(service_id, error = %e, "failed to unsubscribe service topics");
            }
        }
        Some(service.info)
    }

    fn remove_callbacks(&self, callbacks: &[(String, CallbackId)]) {
        for (topic, id) in callbacks {
            self.dispatcher.remove_callback(MessageType::Request, topic, *id);
        }
    }
}

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        if let Some(refresher) = lock(&self.refresher).take() {
            refresher.stop();
        }
    }
}

fn registration_request(info: &ServiceInfo) -> Result<Request> {
    let body = serde_json::to_vec(&info.registration())
        .map_err(|e| ClientError::invalid_argument(format!("unencodable registration: {}", e)))?;
    Ok(Request::new(REGISTER_TOPIC).with_payload(body))
}

fn unregistration_request(service_id: &str) -> Result<Request> {
    let body = serde_json::to_vec(&ServiceUnregistration {
        service_id: service_id.to_string(),
    })
    .map_err(|e| ClientError::invalid_argument(format!("unencodable unregistration: {}", e)))?;
    Ok(Request::new(UNREGISTER_TOPIC).with_payload(body))
}

/// Turn a registry acknowledgement into a result.
fn check_ack(reply: Message) -> Result<()> {
    match reply {
        Message::ErrorResponse(error) => Err(ClientError::ServiceRegistration {
            code: error.error_code(),
            message: error.error_message().to_string(),
        }),
        _ => Ok(()),
    }
}

fn not_registered(service_id: &str) -> ClientError {
    ClientError::invalid_argument(format!("service {} is not registered", service_id))
}

/// Request callback bound to one service topic.
struct ServiceCallback {
    service_id: String,
    client_id: String,
    handler: Arc<dyn RequestHandler>,
    transport: TransportRef,
}

impl ServiceCallback {
    fn reply_for(&self, request: &Request) -> Message {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.handler.handle(request)))
            .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(panic.as_ref()))));

        let response = Response::for_request(request)
            .with_service_id(&self.service_id)
            .with_source_client_id(&self.client_id);
        match outcome {
            Ok(payload) => response.with_payload(payload).into(),
            Err(e) => {
                warn!(
                    service_id = %self.service_id,
                    message_id = request.message_id(),
                    code = e.error_code(),
                    error = %e,
                    "service handler failed"
                );
                ErrorResponse::new(response, e.error_code(), e.to_string()).into()
            }
        }
    }
}

impl MessageCallback for ServiceCallback {
    fn on_message(&self, message: &Message) -> std::result::Result<(), HandlerError> {
        let Message::Request(request) = message else {
            return Ok(());
        };
        if !request.service_id().is_empty() && request.service_id() != self.service_id {
            trace!(
                service_id = %self.service_id,
                requested = request.service_id(),
                "request addressed to another service"
            );
            return Ok(());
        }

        let reply = self.reply_for(request);
        let reply_to = request.reply_to_topic();
        if reply_to.is_empty() {
            debug!(message_id = request.message_id(), "request has no reply-to topic");
            return Ok(());
        }

        self.transport
            .publish(reply_to, codec::encode(&reply), PublishOptions::default())
            .map_err(|e| HandlerError::Unavailable(format!("failed to publish reply: {}", e)))
    }
}
