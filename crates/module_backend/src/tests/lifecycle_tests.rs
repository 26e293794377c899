use super::*;
use crate::{
    poller::PollController,
    test_support::{test_target, ScriptedSource, POLL_INTERVAL, SNAPSHOT_JSON},
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use shared::{
    domain::{ExchangeRateSnapshot, PollStatus},
    protocol::{methods, BrokerFrame, SCENE_GRAPH_API},
};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

async fn next_frame(socket: &mut WebSocketStream<TcpStream>) -> BrokerFrame {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("frame in time")
            .expect("socket open")
            .expect("message");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("frame");
        }
    }
}

#[tokio::test]
async fn session_registers_polls_and_exits_when_broker_is_gone() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let settings = Settings {
        hub_host: "127.0.0.1".into(),
        hub_port: port,
        ..Settings::default()
    };

    let link = Arc::new(SceneGraphLink::default());
    let (events, _) = broadcast::channel(64);
    let controller = Arc::new(PollController::new(
        Arc::new(ScriptedSource::always(SNAPSHOT_JSON)),
        link.clone(),
        events.clone(),
        test_target(),
        POLL_INTERVAL,
    ));
    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
        events,
    });

    let session = tokio::spawn({
        let state = Arc::clone(&state);
        let link = Arc::clone(&link);
        async move { run(&settings, state, link).await }
    });

    let (stream, _) = listener.accept().await.expect("accept");
    let mut socket = accept_async(stream).await.expect("handshake");

    let mut registered = None;
    let mut started = false;
    let mut forwarded = None;
    let mut broadcast_snapshot = None;
    while registered.is_none() || !started || forwarded.is_none() || broadcast_snapshot.is_none()
    {
        match next_frame(&mut socket).await {
            BrokerFrame::Register { module, handlers } => registered = Some((module, handlers)),
            BrokerFrame::Emit {
                event: ModuleEvent::StatusChange(report),
                ..
            } => started |= report.status == PollStatus::Started,
            BrokerFrame::Emit {
                event: ModuleEvent::ExchangeRates(snapshot),
                ..
            } => broadcast_snapshot = Some(snapshot),
            BrokerFrame::Invoke {
                id,
                api,
                method,
                params,
            } => {
                assert_eq!(api.as_deref(), Some(SCENE_GRAPH_API));
                assert_eq!(method, methods::SET_NODE_PROPERTY);
                forwarded = Some(params);
                let reply = BrokerFrame::Result {
                    id,
                    value: Some(json!(true)),
                    error: None,
                };
                socket
                    .send(Message::Text(serde_json::to_string(&reply).expect("encode")))
                    .await
                    .expect("reply");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    let (module, handlers) = registered.expect("register frame");
    assert_eq!(module, "zero_density.realityhub_module_example");
    assert_eq!(handlers, vec!["startPolling", "stopPolling", "getStatus"]);

    let forwarded = forwarded.expect("scene call");
    assert_eq!(forwarded["NodePath"], "Forex_0");
    assert_eq!(forwarded["Value"], SNAPSHOT_JSON);
    let scene_snapshot =
        ExchangeRateSnapshot::from_json(forwarded["Value"].as_str().expect("string value"))
            .expect("scene json");
    assert_eq!(Some(scene_snapshot), broadcast_snapshot);
    assert_eq!(controller.status().status, PollStatus::Started);

    drop(socket);
    drop(listener);

    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session ends")
        .expect("join");
    assert!(outcome.is_err());
    assert_eq!(controller.status().status, PollStatus::Stopped);
}

/// Accepts one broker connection and answers scene calls until the module
/// has registered and reported that polling started.
async fn accept_registered_session(
    listener: &TcpListener,
) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("connection in time")
        .expect("accept");
    let mut socket = accept_async(stream).await.expect("handshake");

    let mut registered = None;
    let mut started = false;
    while registered.is_none() || !started {
        match next_frame(&mut socket).await {
            BrokerFrame::Register { module, .. } => registered = Some(module),
            BrokerFrame::Emit {
                event: ModuleEvent::StatusChange(report),
                ..
            } => started |= report.status == PollStatus::Started,
            BrokerFrame::Invoke { id, .. } => {
                let reply = BrokerFrame::Result {
                    id,
                    value: Some(json!(true)),
                    error: None,
                };
                socket
                    .send(Message::Text(serde_json::to_string(&reply).expect("encode")))
                    .await
                    .expect("reply");
            }
            _ => {}
        }
    }
    (socket, registered.expect("register frame"))
}

#[tokio::test]
async fn dropped_session_reconnects_and_restarts_polling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let settings = Settings {
        hub_host: "127.0.0.1".into(),
        hub_port: port,
        ..Settings::default()
    };

    let link = Arc::new(SceneGraphLink::default());
    let (events, _) = broadcast::channel(64);
    let controller = Arc::new(PollController::new(
        Arc::new(ScriptedSource::always(SNAPSHOT_JSON)),
        link.clone(),
        events.clone(),
        test_target(),
        POLL_INTERVAL,
    ));
    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
        events,
    });
    let session = tokio::spawn({
        let link = Arc::clone(&link);
        async move { run(&settings, state, link).await }
    });

    let (first, module) = accept_registered_session(&listener).await;
    assert_eq!(module, "zero_density.realityhub_module_example");
    drop(first);

    let (second, module) = accept_registered_session(&listener).await;
    assert_eq!(module, "zero_density.realityhub_module_example");
    assert_eq!(controller.status().status, PollStatus::Started);
    assert!(!session.is_finished());

    drop(second);
    drop(listener);
    let outcome = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session ends")
        .expect("join");
    assert!(outcome.is_err());
    assert_eq!(controller.status().status, PollStatus::Stopped);
}

#[tokio::test]
async fn unreachable_broker_fails_fast() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    drop(listener);

    let settings = Settings {
        hub_port: port,
        ..Settings::default()
    };
    let link = Arc::new(SceneGraphLink::default());
    let (events, _) = broadcast::channel(8);
    let controller = Arc::new(PollController::new(
        Arc::new(ScriptedSource::always(SNAPSHOT_JSON)),
        link.clone(),
        events.clone(),
        test_target(),
        POLL_INTERVAL,
    ));
    let state = Arc::new(AppState {
        controller: Arc::clone(&controller),
        events,
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), run(&settings, state, link))
        .await
        .expect("fails in time");
    assert!(outcome.is_err());
    assert_eq!(controller.status().status, PollStatus::Stopped);
}
