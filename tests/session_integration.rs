// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle tests over in-process providers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{FakeConnector, FakeProvider, HANG_TOOL};
use toolbridge::{BridgeError, ErrorKind, ProviderConfig, Session, SessionState};

fn session(provider: FakeProvider) -> Session {
    let connector = FakeConnector::new().provider("alpha", provider);
    Session::new(
        "alpha",
        ProviderConfig::stdio("fake").with_startup_timeout_sec(5),
        Arc::new(connector),
    )
}

#[test]
fn test_full_lifecycle() {
    let session = session(FakeProvider::with_tools(&["echo"]));
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.carrier_running());

    session.connect().unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert!(session.carrier_running());
    assert!(session.list_tools().is_empty());

    session.initialize().unwrap();
    assert!(session.is_ready());
    assert_eq!(session.server_info().unwrap().name, "fake-alpha");
    assert_eq!(session.list_tools().len(), 1);

    let output = session.call_tool("echo", json!({"value": "x"}), None).unwrap();
    assert_eq!(output.as_text(), "alpha:echo");

    session.disconnect().unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.carrier_running());
    assert!(session.server_info().is_none());
}

#[test]
fn test_out_of_order_calls_are_precondition_errors() {
    let session = session(FakeProvider::with_tools(&["echo"]));

    let err = session.initialize().unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Precondition {
            operation: "initialize",
            expected: SessionState::Connected,
            actual: SessionState::Disconnected,
            ..
        }
    ));

    let err = session.call_tool("echo", json!({}), None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    session.connect().unwrap();
    let err = session.call_tool("echo", json!({}), None).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Precondition {
            actual: SessionState::Connected,
            ..
        }
    ));

    session.initialize().unwrap();
    let err = session.initialize().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Precondition);

    session.disconnect().unwrap();
}

#[test]
fn test_disconnect_before_connect_is_noop() {
    let session = session(FakeProvider::with_tools(&["echo"]));
    session.disconnect().unwrap();
    session.disconnect().unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);
}

#[test]
fn test_refused_connection_leaves_no_thread() {
    let session = session(FakeProvider::refusing());
    let err = session.connect().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(err.is_retryable());
    assert_eq!(session.state(), SessionState::Disconnected);
    assert!(!session.carrier_running());
}

#[test]
fn test_timeout_does_not_poison_session() {
    let session = session(FakeProvider::with_tools(&[HANG_TOOL, "echo"]));
    session.connect().unwrap();
    session.initialize().unwrap();

    for _ in 0..3 {
        let err = session
            .call_tool(HANG_TOOL, json!({}), Some(Duration::from_millis(50)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.to_string().contains("hang"));
    }

    assert!(session.call_tool("echo", json!({}), None).is_ok());
    session.disconnect().unwrap();
}

#[test]
fn test_fifty_concurrent_calls_on_one_session() {
    let session = session(FakeProvider::with_tools(&["echo"]).with_call_delay(Duration::from_millis(10)));
    session.connect().unwrap();
    session.initialize().unwrap();

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..50)
            .map(|i| {
                let session = &session;
                scope.spawn(move || {
                    let output = session
                        .call_tool("echo", json!({"value": i}), None)
                        .unwrap();
                    assert_eq!(output.structured.unwrap()["args"]["value"], i);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    });

    assert!(session.is_ready());
    session.disconnect().unwrap();
}

#[test]
fn test_drop_disconnects() {
    let connector = FakeConnector::new().provider("alpha", FakeProvider::with_tools(&["echo"]));
    let events = connector.events();
    {
        let session = Session::new("alpha", ProviderConfig::stdio("fake"), Arc::new(connector));
        session.connect().unwrap();
        session.initialize().unwrap();
    }
    assert_eq!(
        events.lock().last(),
        Some(&common::Event::Close("alpha".to_string()))
    );
}
