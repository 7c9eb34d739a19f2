//! Loopback tests for the shared connection against a local WebSocket server.

use std::time::Duration;

use agtdesk_core::Command;
use agtdesk_transport::{
    CommandSink, Connection, ConnectionConfig, ConnectionState, Inbound, TaggedFrame,
    TransportError,
};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(3);

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("client should dial")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<TaggedFrame>) -> TaggedFrame {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("frame should arrive")
        .expect("channel open")
}

async fn wait_for_state(conn: &Connection, want: ConnectionState) {
    let mut state = conn.watch_state();
    tokio::time::timeout(WAIT, state.wait_for(|s| *s == want))
        .await
        .expect("state change")
        .unwrap();
}

fn connect(url: &str) -> (Connection, mpsc::UnboundedReceiver<TaggedFrame>) {
    Connection::new(ConnectionConfig::new(url).with_reconnect_delay(Duration::from_millis(50)))
}

#[tokio::test]
async fn frames_are_tagged_with_generation() {
    let (listener, url) = listen().await;
    let (conn, mut frames) = connect(&url);
    assert_eq!(conn.state(), ConnectionState::Closed);

    conn.acquire();
    let mut server = accept(&listener).await;
    server.send(Message::Text("hello".into())).await.unwrap();
    server.send(Message::Binary(vec![1, b'x', 0xff])).await.unwrap();

    let first = next_frame(&mut frames).await;
    assert_eq!(first.generation, 1);
    assert_eq!(first.inbound, Inbound::Text("hello".into()));
    let second = next_frame(&mut frames).await;
    assert_eq!(second.generation, 1);
    assert_eq!(second.inbound, Inbound::Binary(vec![1, b'x', 0xff]));
}

#[tokio::test]
async fn commands_reach_the_server_once_open() {
    let (listener, url) = listen().await;
    let (conn, _frames) = connect(&url);

    let input = Command::input("t1", b"ls\n");
    assert!(matches!(
        conn.send_command(&input),
        Err(TransportError::NotConnected)
    ));

    conn.acquire();
    let mut server = accept(&listener).await;
    wait_for_state(&conn, ConnectionState::Open).await;

    conn.send_command(&input).unwrap();
    let msg = tokio::time::timeout(WAIT, server.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["type"], "terminal-input");
    assert_eq!(json["id"], "t1");
    assert_eq!(json["data"], "ls\n");
}

#[tokio::test]
async fn reconnects_with_a_new_generation() {
    let (listener, url) = listen().await;
    let (conn, mut frames) = connect(&url);
    conn.acquire();

    let server = accept(&listener).await;
    wait_for_state(&conn, ConnectionState::Open).await;
    drop(server);

    let mut server = accept(&listener).await;
    wait_for_state(&conn, ConnectionState::Open).await;
    assert_eq!(conn.generation(), 2);
    assert_eq!(conn.current_generation(), 2);

    server.send(Message::Text("again".into())).await.unwrap();
    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.generation, 2);
    assert_eq!(frame.inbound, Inbound::Text("again".into()));
}

#[tokio::test]
async fn last_release_closes_and_stops_reconnecting() {
    let (listener, url) = listen().await;
    let (conn, _frames) = connect(&url);

    conn.acquire();
    conn.acquire();
    assert_eq!(conn.consumers(), 2);
    let _server = accept(&listener).await;
    wait_for_state(&conn, ConnectionState::Open).await;

    conn.release();
    assert_eq!(conn.state(), ConnectionState::Open);
    assert_eq!(conn.consumers(), 1);

    let before = conn.generation();
    conn.release();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert!(conn.generation() > before);
    assert!(matches!(
        conn.send_command(&Command::input("t1", b"x")),
        Err(TransportError::NotConnected)
    ));

    // Extra releases are ignored.
    conn.release();
    assert_eq!(conn.consumers(), 0);

    let redial = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(redial.is_err(), "closed connection must not redial");
}

#[tokio::test]
async fn unreachable_server_keeps_retrying() {
    let (listener, url) = listen().await;
    drop(listener);

    let (conn, _frames) = connect(&url);
    conn.acquire();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(conn.generation() >= 2, "each retry takes a new generation");
    assert_ne!(conn.state(), ConnectionState::Open);
    conn.release();
}
