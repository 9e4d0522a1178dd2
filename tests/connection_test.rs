mod common;

use std::sync::Arc;
use std::time::Duration;

use prost::Message;
use tokio::sync::mpsc;

use common::{MockTransport, ServerSide, TransportProbe, frame, unframe_all};
use wacore::binary::{self, Node, attrs};
use wacore::connection::{Connection, ConnectionConfig, ConnectionHandle, ConnectionState};
use wacore::error::ConnectionError;
use wacore::events::{ClientEvent, ConnectionStatus};
use wacore::proto::HandshakeMessage;
use wacore::store::{AuthStateProvider, MemoryDatabase};

async fn new_connection(
    config: ConnectionConfig,
    connect_opens: bool,
) -> anyhow::Result<(
    tokio::task::JoinHandle<()>,
    ConnectionHandle,
    mpsc::Receiver<ClientEvent>,
    TransportProbe,
)> {
    let (transport, transport_rx, probe) = MockTransport::new(connect_opens);
    let auth = AuthStateProvider::init(Arc::new(MemoryDatabase::new())).await?;
    let (connection, handle, events) = Connection::new(transport, transport_rx, auth, config);
    let task = tokio::spawn(connection.run());
    Ok((task, handle, events, probe))
}

/// Runs the server half of the handshake over the probe and returns the
/// scripted server with live transport keys.
async fn drive_handshake(probe: &mut TransportProbe) -> anyhow::Result<ServerSide> {
    let first_write = probe.next_written().await;
    let frames = unframe_all(&first_write);
    let hello = HandshakeMessage::decode(frames[0].as_slice())?;

    let (mut server, server_hello) = ServerSide::respond_to_hello(&hello)?;
    probe.deliver(frame(&server_hello.encode_to_vec())).await;

    let finish_write = probe.next_written().await;
    let finish = HandshakeMessage::decode(unframe_all(&finish_write)[0].as_slice())?;
    server.accept_finish(&finish)?;
    Ok(server)
}

async fn wait_for<F>(events: &mut mpsc::Receiver<ClientEvent>, mut predicate: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(120), events.recv())
            .await
            .expect("event within deadline")
            .expect("event stream open");
        if predicate(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn handshake_opens_the_session_and_dispatches_stanzas() -> anyhow::Result<()> {
    let config = ConnectionConfig {
        keep_alive: None,
        ..ConnectionConfig::default()
    };
    let (task, handle, mut events, mut probe) = new_connection(config, true).await?;

    let mut server = drive_handshake(&mut probe).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::HandshakeComplete)
    })
    .await;

    // Inbound stanza: server-encrypted <success>.
    let success = Node::new("success", attrs([("platform", "smba")]));
    let ciphertext = server.noise.encrypt_transport(&binary::encode(&success)?)?;
    probe.deliver(frame(&ciphertext)).await;

    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::NodeReceived(node) if node.tag == "success")
    })
    .await;
    wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::ConnectionUpdate(update)
                if update.connection == Some(ConnectionStatus::Open)
        )
    })
    .await;

    // Outbound stanza round-trips through the transport cipher.
    let presence = Node::new("presence", attrs([("type", "available")]));
    handle.send_node(presence.clone()).await?;
    let written = probe.next_written().await;
    let decrypted = server.noise.decrypt_transport(&unframe_all(&written)[0])?;
    assert_eq!(binary::decode(&decrypted)?, presence);
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::NodeSent(node) if node.tag == "presence")
    })
    .await;

    // Clean close: code 1000, exactly one ws.close, final state closed.
    handle.close().await;
    let mut ws_close_count = 0;
    let mut saw_closed = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_millis(200), events.recv()).await
    {
        match event {
            ClientEvent::WsClose { code, .. } => {
                ws_close_count += 1;
                assert_eq!(code, 1000);
            }
            ClientEvent::StateChange { state, .. } => {
                saw_closed = state == ConnectionState::Closed;
            }
            _ => {}
        }
    }
    assert_eq!(ws_close_count, 1);
    assert!(saw_closed);

    // Closing again after the task exited is a quiet no-op.
    handle.close().await;
    task.await?;
    Ok(())
}

#[tokio::test]
async fn send_node_outside_open_fails_synchronously() -> anyhow::Result<()> {
    let config = ConnectionConfig {
        keep_alive: None,
        ..ConnectionConfig::default()
    };
    // The transport never reports open, so the state stays Connecting.
    let (task, handle, _events, _probe) = new_connection(config, false).await?;

    let result = handle
        .send_node(Node::new("presence", attrs([("type", "available")])))
        .await;
    assert!(matches!(result, Err(ConnectionError::NotOpen(_))));

    handle.close().await;
    task.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keep_alive_starvation_times_the_connection_out() -> anyhow::Result<()> {
    let config = ConnectionConfig {
        keep_alive: Some(Duration::from_secs(25)),
        ..ConnectionConfig::default()
    };
    let (task, _handle, mut events, mut probe) = new_connection(config, true).await?;

    let _server = drive_handshake(&mut probe).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::HandshakeComplete)
    })
    .await;

    // No inbound bytes at all: the second tick exceeds interval + grace.
    let event = wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::StateChange {
                state: ConnectionState::Closed,
                error: Some(_),
            }
        )
    })
    .await;
    let ClientEvent::StateChange {
        error: Some(error), ..
    } = event
    else {
        unreachable!()
    };
    assert!(error.contains("timed out"), "error: {error}");

    let closed = probe.closed.lock().expect("closed lock").clone();
    assert_eq!(closed.map(|(code, _)| code), Some(1011));

    task.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn keep_alive_pings_while_the_stream_is_live() -> anyhow::Result<()> {
    let config = ConnectionConfig {
        keep_alive: Some(Duration::from_secs(25)),
        ..ConnectionConfig::default()
    };
    let (task, handle, mut events, mut probe) = new_connection(config, true).await?;

    let mut server = drive_handshake(&mut probe).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::HandshakeComplete)
    })
    .await;

    // First tick: inbound is fresh enough, a ping goes out.
    let written = probe.next_written().await;
    let decrypted = server.noise.decrypt_transport(&unframe_all(&written)[0])?;
    let ping = binary::decode(&decrypted)?;
    assert_eq!(ping.tag, "iq");
    assert_eq!(ping.attr("xmlns"), Some("w:p"));
    assert_eq!(ping.attr("type"), Some("get"));
    assert_eq!(ping.attr("to"), Some("s.whatsapp.net"));
    assert!(ping.child("ping").is_some());

    handle.close().await;
    task.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn qr_pairing_rotates_and_exhausts_over_the_wire() -> anyhow::Result<()> {
    let config = ConnectionConfig {
        keep_alive: None,
        ..ConnectionConfig::default()
    };
    let (task, _handle, mut events, mut probe) = new_connection(config, true).await?;

    let mut server = drive_handshake(&mut probe).await?;
    wait_for(&mut events, |event| {
        matches!(event, ClientEvent::HandshakeComplete)
    })
    .await;

    // Server offers a single pairing ref.
    let pair_device = Node::with_children(
        "iq",
        attrs([("id", "q-1"), ("type", "set"), ("from", "@s.whatsapp.net")]),
        vec![Node::with_children(
            "pair-device",
            attrs([]),
            vec![Node::with_bytes("ref", attrs([]), b"2@only-ref".to_vec())],
        )],
    );
    let ciphertext = server.noise.encrypt_transport(&binary::encode(&pair_device)?)?;
    probe.deliver(frame(&ciphertext)).await;

    // The ack goes out and the QR is surfaced.
    let written = probe.next_written().await;
    let ack = binary::decode(&server.noise.decrypt_transport(&unframe_all(&written)[0])?)?;
    assert_eq!(ack.attr("id"), Some("q-1"));
    assert_eq!(ack.attr("type"), Some("result"));

    let event = wait_for(&mut events, |event| {
        matches!(event, ClientEvent::ConnectionUpdate(update) if update.qr.is_some())
    })
    .await;
    let ClientEvent::ConnectionUpdate(update) = event else {
        unreachable!()
    };
    assert!(update.qr.expect("qr").starts_with("2@only-ref,"));

    // The 60s deadline fires with no refs left: fatal pairing failure.
    let event = wait_for(&mut events, |event| {
        matches!(
            event,
            ClientEvent::StateChange {
                state: ConnectionState::Closed,
                ..
            }
        )
    })
    .await;
    let ClientEvent::StateChange { error, .. } = event else {
        unreachable!()
    };
    assert!(error.unwrap_or_default().contains("qr refs exhausted"));

    task.await?;
    Ok(())
}
