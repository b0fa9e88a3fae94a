use rapport::render::{render_timeline, render_update, Output};
use rapport_core::{
    ChatError, Client, CredentialPair, CredentialStore, Endpoints, KeyValueStore,
    LoginCredentials, MessageId, ScriptedReply, ScriptedTransport, SendPhase, SessionUpdate,
};
use reqwest::Method;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const STREAM: &str = "/chat/message/stream";
const REFRESH: &str = "/auth/refresh";

fn test_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn open_client(
    dir: &TempDir,
    transport: &ScriptedTransport,
) -> (Client, UnboundedReceiver<SessionUpdate>) {
    let backend = KeyValueStore::new(dir.path().join("session")).expect("session store");
    Client::new(
        Arc::new(transport.clone()),
        CredentialStore::open(backend),
        Endpoints::default(),
    )
}

fn sign_in(runtime: &tokio::runtime::Runtime, client: &Client, transport: &ScriptedTransport) {
    transport.enqueue(
        Method::POST,
        "/auth/login",
        ScriptedReply::json(
            200,
            json!({
                "data": {
                    "user": {
                        "id": "u1", "email": "ada@example.com", "name": "Ada", "role": "MEMBER",
                        "createdAt": "2024-01-01T00:00:00Z", "updatedAt": "2024-01-01T00:00:00Z"
                    },
                    "tokens": { "accessToken": "access-1", "refreshToken": "refresh-1" }
                }
            }),
        ),
    );
    runtime
        .block_on(
            client
                .auth
                .login(&LoginCredentials::new("ada@example.com", "hunter2")),
        )
        .expect("login");
}

fn drain(updates: &mut UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    seen
}

#[test]
fn streamed_reply_lands_in_timeline_and_renders() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, mut updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);

    transport.enqueue(
        Method::POST,
        STREAM,
        ScriptedReply::events([
            "data: {\"type\":\"chunk\",\"content\":\"Hi\"}\n\n",
            "data: {\"type\":\"chunk\",\"content\":\" there\"}\n\n",
            "data: {\"type\":\"done\",\"messageId\":\"msg-42\",\"createdAt\":\"2024-01-01T00:00:00Z\"}\n\n",
        ]),
    );

    let message = runtime
        .block_on(client.session.send("hello"))
        .expect("send message");

    assert_eq!(message.id, MessageId::Durable("msg-42".into()));
    assert_eq!(message.response_text(), "Hi there");
    assert_eq!(client.session.phase(), SendPhase::Idle);
    assert_eq!(
        transport.requests().last().and_then(|req| req.header("Authorization").map(str::to_owned)),
        Some("Bearer access-1".to_string())
    );
    assert_eq!(
        render_timeline(&client.session.timeline(), false),
        "You: hello\nRapport: Hi there\n"
    );

    let streamed: String = drain(&mut updates)
        .iter()
        .filter_map(|update| match render_update(update) {
            Some(Output::Inline(text)) => Some(text),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hi there");
}

#[test]
fn in_band_error_leaves_no_trace() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, mut updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);

    transport.enqueue(
        Method::POST,
        STREAM,
        ScriptedReply::events(["data: {\"type\":\"error\",\"message\":\"rate limited\"}\n\n"]),
    );

    let err = runtime
        .block_on(client.session.send("hello"))
        .expect_err("send should fail");

    assert_eq!(err.user_message(), "rate limited");
    assert!(client.session.timeline().is_empty());
    assert!(client.session.in_flight().is_none());
    assert!(drain(&mut updates)
        .iter()
        .any(|update| render_update(update) == Some(Output::Error("error: rate limited".into()))));
}

#[test]
fn renewal_mid_send_persists_new_pair() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, _updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);

    transport.enqueue(Method::POST, STREAM, ScriptedReply::status(401));
    transport.enqueue(
        Method::POST,
        REFRESH,
        ScriptedReply::json(
            200,
            json!({ "data": { "accessToken": "access-2", "refreshToken": "refresh-2" } }),
        ),
    );
    transport.enqueue(
        Method::POST,
        STREAM,
        ScriptedReply::events([
            "data: {\"type\":\"chunk\",\"content\":\"ok\"}\n",
            "data: {\"type\":\"done\",\"messageId\":\"msg-7\"}\n",
        ]),
    );

    let message = runtime
        .block_on(client.session.send("hello"))
        .expect("send after renewal");

    assert_eq!(message.response_text(), "ok");
    assert_eq!(transport.request_count(&Method::POST, REFRESH), 1);
    assert_eq!(transport.request_count(&Method::POST, STREAM), 2);
    assert_eq!(
        client.credentials.get(),
        Some(CredentialPair::new("access-2", "refresh-2"))
    );

    // A fresh process sees the renewed pair.
    let (reopened, _updates) = open_client(&dir, &transport);
    assert_eq!(
        reopened.credentials.get(),
        Some(CredentialPair::new("access-2", "refresh-2"))
    );
    assert_eq!(
        reopened.auth.identity().map(|identity| identity.email),
        Some("ada@example.com".to_string())
    );
}

#[test]
fn rejected_renewal_signs_out_everywhere() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, mut updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);

    transport.enqueue(Method::POST, STREAM, ScriptedReply::status(401));
    transport.enqueue(Method::POST, REFRESH, ScriptedReply::status(401));

    let err = runtime
        .block_on(client.session.send("hello"))
        .expect_err("session should expire");

    assert_eq!(err, ChatError::SessionExpired);
    assert!(client.session.timeline().is_empty());
    assert!(!client.credentials.is_authenticated());
    assert!(drain(&mut updates).contains(&SessionUpdate::SessionExpired));

    let (reopened, _updates) = open_client(&dir, &transport);
    assert!(reopened.auth.identity().is_none());
}

#[test]
fn empty_message_is_rejected_offline() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, _updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);
    let before = transport.requests().len();

    let err = runtime
        .block_on(client.session.send("   "))
        .expect_err("empty content");

    assert_eq!(err, ChatError::EmptyMessage);
    assert_eq!(transport.requests().len(), before);
}

#[test]
fn logout_clears_persisted_session() {
    let runtime = test_runtime();
    let dir = TempDir::new().expect("temp dir");
    let transport = ScriptedTransport::new();
    let (client, _updates) = open_client(&dir, &transport);
    sign_in(&runtime, &client, &transport);
    transport.enqueue(Method::POST, "/auth/logout", ScriptedReply::status(500));

    runtime.block_on(client.auth.logout());

    assert!(!client.credentials.is_authenticated());
    let (reopened, _updates) = open_client(&dir, &transport);
    assert!(reopened.credentials.get().is_none());
}
