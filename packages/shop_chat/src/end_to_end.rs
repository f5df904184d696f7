//! Full-stack chat scenarios over a real listener and WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message, client::IntoClientRequest};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::AppState;
use crate::chat::test_helpers::RecordingNotifier;
use crate::config::ChatConfig;
use crate::models::{PersistedMessage, User};
use crate::repository::test_helpers::seed_user;
use crate::test_helpers::{bearer, test_app_state_with};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ORIGIN: &str = "http://localhost:5173";

async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = crate::build_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/api/v1/ws")
}

async fn connect(
    url: &str,
    token: &str,
    origin: &str,
) -> Result<Client, tungstenite::Error> {
    let mut request = format!("{url}?token={token}").into_client_request()?;
    request
        .headers_mut()
        .insert("Origin", origin.parse().unwrap());
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(ws)
}

async fn wait_online(state: &AppState, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.chat.hub.online_count().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("clients did not register in time");
}

/// Next chat record, skipping control frames.
async fn next_record(ws: &mut Client) -> PersistedMessage {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).unwrap();
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("no chat record received")
}

/// Wait for the server to end the connection.
async fn expect_closed(ws: &mut Client) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("connection was not closed");
}

async fn send(ws: &mut Client, json: &str) {
    ws.send(Message::text(json.to_string())).await.unwrap();
}

struct Fixture {
    state: AppState,
    url: String,
    notifier: Arc<RecordingNotifier>,
    admin: User,
    shopper: User,
}

async fn fixture() -> Fixture {
    let notifier = Arc::new(RecordingNotifier::default());
    let state = test_app_state_with(ChatConfig::default(), notifier.clone()).await;
    let admin = seed_user(&state.repository, "Admin", true).await;
    let shopper = seed_user(&state.repository, "alice", false).await;
    let url = serve(state.clone()).await;
    Fixture {
        state,
        url,
        notifier,
        admin,
        shopper,
    }
}

#[tokio::test]
async fn shopper_message_reaches_admin_and_echoes() {
    let f = fixture().await;
    let mut admin_ws = connect(&f.url, &bearer(&f.state, &f.admin), ORIGIN)
        .await
        .unwrap();
    let mut shopper_ws = connect(&f.url, &bearer(&f.state, &f.shopper), ORIGIN)
        .await
        .unwrap();
    wait_online(&f.state, 2).await;

    send(&mut shopper_ws, r#"{"receiverId": 0, "content": "hi"}"#).await;

    let delivered = next_record(&mut admin_ws).await;
    assert_eq!(delivered.sender_id, f.shopper.id);
    assert_eq!(delivered.receiver_id, f.admin.id);
    assert_eq!(delivered.content, "hi");

    let echo = next_record(&mut shopper_ws).await;
    assert_eq!(echo, delivered);

    let stored = f
        .state
        .repository
        .conversation_between(f.shopper.id, f.admin.id)
        .await
        .unwrap();
    assert_eq!(stored, vec![delivered]);
    assert!(f.notifier.sent().is_empty());
}

#[tokio::test]
async fn admin_reply_to_offline_shopper_sends_one_push() {
    let f = fixture().await;
    f.state
        .repository
        .set_fcm_token(f.shopper.id, "T")
        .await
        .unwrap();

    let mut admin_ws = connect(&f.url, &bearer(&f.state, &f.admin), ORIGIN)
        .await
        .unwrap();
    wait_online(&f.state, 1).await;

    send(
        &mut admin_ws,
        &format!(r#"{{"receiverId": {}, "content": "reply"}}"#, f.shopper.id),
    )
    .await;

    let echo = next_record(&mut admin_ws).await;
    assert_eq!(echo.sender_id, f.admin.id);
    assert_eq!(echo.receiver_id, f.shopper.id);
    assert_eq!(echo.content, "reply");

    let sent = f.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "T");
    assert_eq!(sent[0].title, "New message from Admin");
    assert_eq!(sent[0].body, "reply");
    assert_eq!(sent[0].sender_id, f.admin.id);

    let stored = f
        .state
        .repository
        .conversation_between(f.shopper.id, f.admin.id)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let f = fixture().await;
    let mut admin_ws = connect(&f.url, &bearer(&f.state, &f.admin), ORIGIN)
        .await
        .unwrap();
    let mut shopper_ws = connect(&f.url, &bearer(&f.state, &f.shopper), ORIGIN)
        .await
        .unwrap();
    wait_online(&f.state, 2).await;

    for i in 0..20 {
        send(&mut shopper_ws, &format!(r#"{{"content": "m{i}"}}"#)).await;
    }
    for i in 0..20 {
        assert_eq!(next_record(&mut admin_ws).await.content, format!("m{i}"));
    }
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let f = fixture().await;
    let err = connect(&f.url, &bearer(&f.state, &f.shopper), "https://evil.example")
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 403),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(f.state.chat.hub.online_count().await, 0);
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let f = fixture().await;
    let err = connect(&f.url, "", ORIGIN).await.unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn second_connection_closes_the_first() {
    let f = fixture().await;
    let token = bearer(&f.state, &f.shopper);
    let mut first = connect(&f.url, &token, ORIGIN).await.unwrap();
    wait_online(&f.state, 1).await;
    let original = f.state.chat.hub.lookup(f.shopper.id).await.unwrap();

    let mut second = connect(&f.url, &token, ORIGIN).await.unwrap();
    expect_closed(&mut first).await;

    let current = f.state.chat.hub.lookup(f.shopper.id).await.unwrap();
    assert!(!current.is_same(&original));

    // The replacement still works
    send(&mut second, r#"{"content": "still here"}"#).await;
    assert_eq!(next_record(&mut second).await.content, "still here");
}

#[tokio::test]
async fn oversized_frame_closes_connection() {
    let f = fixture().await;
    let mut ws = connect(&f.url, &bearer(&f.state, &f.shopper), ORIGIN)
        .await
        .unwrap();
    wait_online(&f.state, 1).await;

    let big = format!(r#"{{"content": "{}"}}"#, "x".repeat(1024));
    // The send may already fail if the server has hung up
    let _ = ws.send(Message::text(big)).await;
    expect_closed(&mut ws).await;

    wait_online(&f.state, 0).await;
    let stored = f
        .state
        .repository
        .conversation_between(f.shopper.id, f.admin.id)
        .await
        .unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn malformed_frame_keeps_connection_open() {
    let f = fixture().await;
    let mut ws = connect(&f.url, &bearer(&f.state, &f.shopper), ORIGIN)
        .await
        .unwrap();
    wait_online(&f.state, 1).await;

    send(&mut ws, "definitely not json").await;
    send(&mut ws, r#"{"content": "after"}"#).await;
    assert_eq!(next_record(&mut ws).await.content, "after");
}
