//! Service registration and request handling.

use std::time::Duration;

use switchboard::service::{REGISTER_TOPIC, UNREGISTER_TOPIC};
use switchboard::transport::InMemoryBroker;
use switchboard::{ClientError, HandlerError, Message, Request, ServiceInfo};

use crate::support::{connected_client, FakeRegistrar};

fn calculator() -> ServiceInfo {
    ServiceInfo::new("calculator")
        .with_service_id("calc-1")
        .with_metadata("version", "2")
        .add_topic("/svc/calc/double", |req: &Request| -> Result<Vec<u8>, HandlerError> {
            let text = req
                .payload_str()
                .ok_or_else(|| HandlerError::DecodeFailed("payload is not utf-8".into()))?;
            let n: i64 = text
                .parse()
                .map_err(|_| HandlerError::Rejected(format!("not a number: {}", text)))?;
            Ok((n * 2).to_string().into_bytes())
        })
        .add_topic("/svc/calc/crash", |_: &Request| -> Result<Vec<u8>, HandlerError> {
            panic!("division by zero")
        })
}

// ============================================================================
// Test 1: registration announces the service and requests are answered
// ============================================================================

#[test]
fn registered_service_answers_requests() {
    let broker = InMemoryBroker::new();
    let registrar = FakeRegistrar::accepting(&broker);
    let (provider, _) = connected_client(&broker, "provider");
    provider.register_service_sync(calculator(), None).unwrap();

    let (topic, body) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(topic, REGISTER_TOPIC);
    assert_eq!(body["serviceType"], "calculator");
    assert_eq!(body["serviceId"], "calc-1");
    assert_eq!(body["ttlMins"], 60);
    assert_eq!(body["metaData"]["version"], "2");
    assert_eq!(provider.services(), vec!["calc-1".to_string()]);

    let (consumer, _) = connected_client(&broker, "consumer");
    let reply = consumer
        .send_request_sync(
            Request::new("/svc/calc/double").with_string_payload("21"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();

    match reply {
        Message::Response(response) => {
            assert_eq!(response.payload_str(), Some("42"));
            assert_eq!(response.service_id(), "calc-1");
            assert_eq!(response.source_client_id(), "provider");
        }
        other => panic!("expected a response, got {:?}", other),
    }
}

// ============================================================================
// Test 2: handler failures come back as error responses with non-zero codes
// ============================================================================

#[test]
fn handler_errors_are_translated() {
    let broker = InMemoryBroker::new();
    let _registrar = FakeRegistrar::accepting(&broker);
    let (provider, _) = connected_client(&broker, "provider");
    provider.register_service_sync(calculator(), None).unwrap();
    let (consumer, _) = connected_client(&broker, "consumer");

    let rejected = consumer
        .send_request_sync(
            Request::new("/svc/calc/double").with_string_payload("twelve"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
    let crashed = consumer
        .send_request_sync(Request::new("/svc/calc/crash"), Some(Duration::from_secs(5)))
        .unwrap();

    for (reply, expected_code) in [(rejected, 422), (crashed, 500)] {
        match reply {
            Message::ErrorResponse(error) => {
                assert_ne!(error.error_code(), 0);
                assert_eq!(error.error_code(), expected_code);
                assert!(!error.error_message().is_empty());
                assert_eq!(error.service_id(), "calc-1");
            }
            other => panic!("expected an error response, got {:?}", other),
        }
    }
    assert!(provider.is_connected());
}

// ============================================================================
// Test 3: requests aimed at another service id are ignored
// ============================================================================

#[test]
fn requests_for_other_instances_are_ignored() {
    let broker = InMemoryBroker::new();
    let _registrar = FakeRegistrar::accepting(&broker);
    let (provider, _) = connected_client(&broker, "provider");
    provider.register_service_sync(calculator(), None).unwrap();
    let (consumer, _) = connected_client(&broker, "consumer");

    let err = consumer
        .send_request_sync(
            Request::new("/svc/calc/double")
                .with_string_payload("1")
                .with_service_id("calc-2"),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
    assert!(err.is_timeout());

    let reply = consumer
        .send_request_sync(
            Request::new("/svc/calc/double")
                .with_string_payload("1")
                .with_service_id("calc-1"),
            Some(Duration::from_secs(5)),
        )
        .unwrap();
    assert_eq!(reply.payload_str(), Some("2"));
}

// ============================================================================
// Test 4: a refused registration surfaces the registry's code and message
// ============================================================================

#[test]
fn refused_registration_fails() {
    let broker = InMemoryBroker::new();
    let _registrar = FakeRegistrar::refusing(&broker, 409, "service id taken");
    let (provider, _) = connected_client(&broker, "provider");

    let err = provider.register_service_sync(calculator(), None).unwrap_err();

    match err {
        ClientError::ServiceRegistration { code, message } => {
            assert_eq!(code, 409);
            assert_eq!(message, "service id taken");
        }
        other => panic!("expected a registration error, got {:?}", other),
    }
    assert!(provider.services().is_empty());
}

// ============================================================================
// Test 5: unregistering sends the unregister request and stops answering
// ============================================================================

#[test]
fn unregistered_service_goes_quiet() {
    let broker = InMemoryBroker::new();
    let registrar = FakeRegistrar::accepting(&broker);
    let (provider, _) = connected_client(&broker, "provider");
    provider.register_service_sync(calculator(), None).unwrap();
    let _ = registrar.next(Duration::from_secs(2)).unwrap();

    provider.unregister_service_sync("calc-1", None).unwrap();

    let (topic, body) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(topic, UNREGISTER_TOPIC);
    assert_eq!(body["serviceId"], "calc-1");
    assert!(provider.services().is_empty());

    let (consumer, _) = connected_client(&broker, "consumer");
    let err = consumer
        .send_request_sync(
            Request::new("/svc/calc/double").with_string_payload("1"),
            Some(Duration::from_millis(200)),
        )
        .unwrap_err();
    assert!(err.is_timeout());
}

// ============================================================================
// Test 6: a short ttl is refreshed before it lapses
// ============================================================================

#[test]
fn short_ttl_is_refreshed() {
    let broker = InMemoryBroker::new();
    let registrar = FakeRegistrar::accepting(&broker);
    let (provider, _) = connected_client(&broker, "provider");
    let info = calculator().with_ttl(Duration::from_millis(200));

    provider.register_service_async(info).unwrap();

    let (first, _) = registrar.next(Duration::from_secs(2)).unwrap();
    let (second, body) = registrar.next(Duration::from_secs(2)).unwrap();
    assert_eq!(first, REGISTER_TOPIC);
    assert_eq!(second, REGISTER_TOPIC);
    assert_eq!(body["serviceId"], "calc-1");
}
