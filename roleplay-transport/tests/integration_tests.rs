use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use roleplay_transport::{
    Connector, EventSink, InboundMessage, SessionSetup, SessionTransport, TransportConfig,
    TransportError, TransportEvent, WebSocketConnector,
};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

type ServerSocket = WebSocketStream<TcpStream>;

const SETUP_COMPLETE: &str = r#"{"setupComplete":{}}"#;

/// Accept one websocket client on a random port and hand it to `handler`
async fn spawn_server<F, Fut>(handler: F) -> String
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });

    format!("ws://{}/live?key=test-key", addr)
}

fn setup() -> SessionSetup {
    SessionSetup {
        model: "gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
        system_instruction: "You are a helpful narrator".to_string(),
        voice: "Kore".to_string(),
    }
}

fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<TransportEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink: EventSink = Arc::new(move |event| {
        let _ = tx.send(event);
    });
    (sink, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for transport event")
        .expect("event stream ended")
}

async fn read_json(ws: &mut ServerSocket) -> Value {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("unexpected frame: {:?}", other),
        }
    }
}

fn connector(url: String) -> WebSocketConnector {
    WebSocketConnector::new(TransportConfig::new(url).with_setup_timeout(Duration::from_secs(3)))
}

#[tokio::test]
async fn test_setup_then_queued_audio_in_order() {
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<(Value, Vec<String>)>();

    let url = spawn_server(|mut ws| async move {
        let setup = read_json(&mut ws).await;

        // Hold the acknowledgement so the client queues its sends
        tokio::time::sleep(Duration::from_millis(100)).await;
        ws.send(Message::Text(SETUP_COMPLETE.to_string())).await.unwrap();

        let mut chunks = Vec::new();
        for _ in 0..5 {
            let frame = read_json(&mut ws).await;
            let chunk = &frame["realtimeInput"]["mediaChunks"][0];
            assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
            chunks.push(chunk["data"].as_str().unwrap().to_string());
        }
        let _ = done_tx.send((setup, chunks));
    })
    .await;

    let (sink, mut events) = event_channel();
    let session = connector(url).open(setup(), sink).unwrap();

    for i in 0..5 {
        session.send_audio(&format!("block-{}", i)).unwrap();
    }

    assert!(matches!(next_event(&mut events).await, TransportEvent::Opened));

    let (setup_frame, chunks) = tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .unwrap()
        .unwrap();

    let voice = &setup_frame["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]
        ["prebuiltVoiceConfig"]["voiceName"];
    assert_eq!(voice, "Kore");
    assert_eq!(
        setup_frame["setup"]["systemInstruction"]["parts"][0]["text"],
        "You are a helpful narrator"
    );
    assert_eq!(
        chunks,
        (0..5).map(|i| format!("block-{}", i)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_inbound_interruption_and_audio() {
    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        ws.send(Message::Text(SETUP_COMPLETE.to_string())).await.unwrap();

        ws.send(Message::Text(
            r#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}]}}}"#.to_string(),
        ))
        .await
        .unwrap();
        // Binary JSON is accepted too
        ws.send(Message::Binary(
            br#"{"serverContent":{"interrupted":true,"modelTurn":{"parts":[{"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"BBBB"}}]}}}"#.to_vec(),
        ))
        .await
        .unwrap();
        // Malformed frames are skipped, not fatal
        ws.send(Message::Text("{not json".to_string())).await.unwrap();
        ws.send(Message::Text(r#"{"serverContent":{"turnComplete":true}}"#.to_string()))
            .await
            .unwrap();

        // Keep the socket up until the client leaves
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;

    let (sink, mut events) = event_channel();
    let mut session = connector(url).open(setup(), sink).unwrap();

    assert!(matches!(next_event(&mut events).await, TransportEvent::Opened));

    match next_event(&mut events).await {
        TransportEvent::Message(InboundMessage::Audio(fragments)) => {
            assert_eq!(fragments[0].data, "AAAA");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match next_event(&mut events).await {
        TransportEvent::Message(InboundMessage::InterruptedThenAudio(fragments)) => {
            assert_eq!(fragments[0].data, "BBBB");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Message(InboundMessage::TurnComplete)
    ));

    session.close();
    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::Closed { .. }
    ));
}

#[tokio::test]
async fn test_remote_close_reported_once() {
    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        ws.send(Message::Text(SETUP_COMPLETE.to_string())).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "session over".into(),
        }))
        .await
        .unwrap();
    })
    .await;

    let (sink, mut events) = event_channel();
    let mut session = connector(url).open(setup(), sink).unwrap();

    assert!(matches!(next_event(&mut events).await, TransportEvent::Opened));
    match next_event(&mut events).await {
        TransportEvent::Closed { reason } => assert_eq!(reason.as_deref(), Some("session over")),
        other => panic!("unexpected event: {:?}", other),
    }

    session.close();
    session.close();

    // The task has finished and dropped the sink: no further events
    let rest = tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap();
    assert!(rest.is_none());
    assert!(matches!(session.send_audio("late"), Err(TransportError::Closed)));
}

#[tokio::test]
async fn test_client_close_reported_once() {
    let (saw_close_tx, saw_close_rx) = tokio::sync::oneshot::channel::<bool>();

    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        ws.send(Message::Text(SETUP_COMPLETE.to_string())).await.unwrap();

        let mut saw_close = false;
        while let Some(Ok(frame)) = ws.next().await {
            if let Message::Close(_) = frame {
                saw_close = true;
            }
        }
        let _ = saw_close_tx.send(saw_close);
    })
    .await;

    let (sink, mut events) = event_channel();
    let mut session = connector(url).open(setup(), sink).unwrap();
    assert!(matches!(next_event(&mut events).await, TransportEvent::Opened));

    session.close();
    session.close();
    session.close();
    assert!(matches!(session.send_audio("late"), Err(TransportError::Closed)));

    // Drain until the task drops the sink
    let mut closes = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("transport task never finished")
    {
        match event {
            TransportEvent::Closed { reason } => closes.push(reason),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert_eq!(closes, vec![Some("closed by client".to_string())]);

    let saw_close = tokio::time::timeout(Duration::from_secs(5), saw_close_rx)
        .await
        .unwrap()
        .unwrap();
    assert!(saw_close, "server never received a close frame");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_establishment_error() {
    // Bind then release a port so nothing is listening on it
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (sink, mut events) = event_channel();
    let _session = connector(format!("ws://{}/live", addr))
        .open(setup(), sink)
        .unwrap();

    match next_event(&mut events).await {
        TransportEvent::Error(e) => {
            assert!(matches!(e, TransportError::Connect(_)));
            assert!(e.is_establishment());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_rejected_setup_is_establishment_error() {
    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        let _ = ws
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "API key not valid".into(),
            }))
            .await;
    })
    .await;

    let (sink, mut events) = event_channel();
    let _session = connector(url).open(setup(), sink).unwrap();

    match next_event(&mut events).await {
        TransportEvent::Error(TransportError::Setup(reason)) => {
            assert!(reason.contains("API key not valid"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_setup_timeout() {
    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        // Never acknowledge
        tokio::time::sleep(Duration::from_secs(5)).await;
    })
    .await;

    let (sink, mut events) = event_channel();
    let config = TransportConfig::new(url).with_setup_timeout(Duration::from_millis(300));
    let _session = WebSocketConnector::new(config).open(setup(), sink).unwrap();

    match next_event(&mut events).await {
        TransportEvent::Error(e) => {
            assert!(matches!(e, TransportError::Setup(_)));
            assert!(e.is_establishment());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_dropped_connection_is_runtime_error() {
    let url = spawn_server(|mut ws| async move {
        read_json(&mut ws).await;
        ws.send(Message::Text(SETUP_COMPLETE.to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        // Drop the socket without a close handshake
        drop(ws);
    })
    .await;

    let (sink, mut events) = event_channel();
    let _session = connector(url).open(setup(), sink).unwrap();

    assert!(matches!(next_event(&mut events).await, TransportEvent::Opened));
    match next_event(&mut events).await {
        TransportEvent::Error(e) => {
            assert!(matches!(e, TransportError::ConnectionLost(_)));
            assert!(!e.is_establishment());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}
