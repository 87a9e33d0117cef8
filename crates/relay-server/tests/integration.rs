//! End-to-end tests against a live server over HTTP.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use relay_core::RelayError;
use relay_server::{
    Atom, CallContext, Interceptor, Next, ProcedureRegistry, RelayServer, ServerConfig,
    TransportConfig, interceptor_fn, stream_fn, unary_fn,
};
use serde_json::{Value, json};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq)]
enum Frame {
    Heartbeat,
    Event { id: Option<String>, data: Value },
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Minimal SSE reader: splits on blank lines and parses `id:`/`data:`.
struct SseClient {
    bytes: ByteStream,
    buf: String,
}

impl SseClient {
    fn new(resp: reqwest::Response) -> Self {
        Self {
            bytes: Box::pin(resp.bytes_stream()),
            buf: String::new(),
        }
    }

    /// Next frame, or `None` once the server closes the stream.
    async fn next(&mut self) -> Option<Frame> {
        tokio::time::timeout(WAIT, self.read_frame())
            .await
            .expect("timed out waiting for an SSE frame")
    }

    async fn read_frame(&mut self) -> Option<Frame> {
        loop {
            if let Some(end) = self.buf.find("\n\n") {
                let block: String = self.buf.drain(..end + 2).collect();
                return Some(parse_block(block.trim_end_matches('\n')));
            }
            match self.bytes.next().await {
                Some(Ok(chunk)) => self.buf.push_str(std::str::from_utf8(&chunk).unwrap()),
                Some(Err(_)) | None => return None,
            }
        }
    }

    /// Next data event, skipping heartbeats.
    async fn next_event(&mut self) -> Option<(Option<String>, Value)> {
        loop {
            match self.next().await? {
                Frame::Heartbeat => {}
                Frame::Event { id, data } => return Some((id, data)),
            }
        }
    }
}

fn parse_block(block: &str) -> Frame {
    if block.starts_with(':') {
        return Frame::Heartbeat;
    }
    let mut id = None;
    let mut data = Value::Null;
    for line in block.lines() {
        if let Some(rest) = line.strip_prefix("id: ") {
            id = Some(rest.to_owned());
        } else if let Some(rest) = line.strip_prefix("data: ") {
            data = serde_json::from_str(rest).unwrap();
        }
    }
    Frame::Event { id, data }
}

async fn start(registry: ProcedureRegistry, transport: TransportConfig) -> (RelayServer, String) {
    let config = ServerConfig {
        transport,
        ..ServerConfig::default()
    };
    let server = RelayServer::new(config, registry);
    let (addr, _handle) = server.listen().await.unwrap();
    (server, format!("http://{addr}"))
}

async fn open(url: &str) -> SseClient {
    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    SseClient::new(resp)
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

fn fast_heartbeat() -> TransportConfig {
    TransportConfig {
        heartbeat_interval: Some(Duration::from_millis(50)),
        ..TransportConfig::default()
    }
}

#[tokio::test]
async fn atom_sends_current_value_then_updates() {
    let atom = Atom::new(json!({"n": 0}));
    let mut reg = ProcedureRegistry::new();
    let _ = reg.atom("counter", &atom);
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let mut client = open(&format!("{base}/rpc/counter")).await;
    assert_eq!(
        client.next_event().await,
        Some((None, json!({"result": {"n": 0}})))
    );
    atom.write(json!({"n": 1}));
    assert_eq!(
        client.next_event().await,
        Some((None, json!({"result": {"n": 1}})))
    );
}

#[tokio::test]
async fn atom_burst_converges_without_regressing() {
    let atom = Atom::new(0u64);
    let mut reg = ProcedureRegistry::new();
    let _ = reg.atom("n", &atom);
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let mut client = open(&format!("{base}/rpc/n")).await;
    assert_eq!(client.next_event().await.unwrap().1, json!({"result": 0}));
    for i in 1..=500u64 {
        atom.write(i);
    }

    let mut last = 0;
    while last < 500 {
        let (_, data) = client.next_event().await.unwrap();
        let n = data["result"].as_u64().unwrap();
        assert!(n > last, "saw {n} after {last}");
        last = n;
    }
}

#[tokio::test]
async fn stream_events_arrive_in_order_with_ids() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.stream(
        "letters",
        stream_fn(|_ctx, _input, emitter| {
            async move {
                emitter.send_with_id("a", &1).await?;
                emitter.send(&2).await?;
                emitter.send_with_id("b", &3).await?;
                Ok(())
            }
            .boxed()
        }),
    );
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let mut client = open(&format!("{base}/rpc/letters")).await;
    assert_eq!(
        client.next().await,
        Some(Frame::Event {
            id: Some("a".into()),
            data: json!({"result": 1})
        })
    );
    assert_eq!(
        client.next().await,
        Some(Frame::Event {
            id: None,
            data: json!({"result": 2})
        })
    );
    assert_eq!(
        client.next().await,
        Some(Frame::Event {
            id: Some("b".into()),
            data: json!({"result": 3})
        })
    );
    assert_eq!(client.next().await, None);
}

#[tokio::test]
async fn handler_error_becomes_terminal_event() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.stream(
        "fails",
        stream_fn(|_ctx, _input, emitter| {
            async move {
                emitter.send(&1).await?;
                emitter.send(&2).await?;
                Err(RelayError::custom("BOOM", "handler failed"))
            }
            .boxed()
        }),
    );
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let mut client = open(&format!("{base}/rpc/fails")).await;
    assert_eq!(client.next_event().await.unwrap().1, json!({"result": 1}));
    assert_eq!(client.next_event().await.unwrap().1, json!({"result": 2}));
    let (_, last) = client.next_event().await.unwrap();
    assert_eq!(last["error"]["code"], "BOOM");
    assert_eq!(last["error"]["message"], "handler failed");
    assert!(last.get("result").is_none());
    assert_eq!(client.next().await, None);
}

#[tokio::test]
async fn input_and_last_event_id_reach_handler() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.stream(
        "resume",
        stream_fn(|_ctx, input, emitter| {
            async move {
                let resume = emitter.last_event_id().to_owned();
                emitter.send(&json!({"input": input, "resume": resume})).await?;
                Ok(())
            }
            .boxed()
        }),
    );
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let resp = reqwest::Client::new()
        .get(format!("{base}/rpc/resume"))
        .query(&[("input", r#"{"from":3}"#)])
        .header("Last-Event-ID", "7")
        .send()
        .await
        .unwrap();
    let mut client = SseClient::new(resp);
    assert_eq!(
        client.next_event().await.unwrap().1,
        json!({"result": {"input": {"from": 3}, "resume": "7"}})
    );
}

#[tokio::test]
async fn setup_rejection_uses_unary_envelope() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.group_intercept(
        "private",
        interceptor_fn(|ctx, req, next| {
            async move {
                if ctx.header("authorization").is_none() {
                    return Err(RelayError::unauthenticated("missing token"));
                }
                next.run(ctx, req).await
            }
            .boxed()
        }),
    );
    let _ = reg.atom("secret", &Atom::new("s3cr3t")).in_group("private");
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let resp = reqwest::get(format!("{base}/rpc/secret")).await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHENTICATED");
    assert_eq!(body["error"]["message"], "missing token");

    let resp = reqwest::Client::new()
        .get(format!("{base}/rpc/secret"))
        .header("authorization", "Bearer x")
        .send()
        .await
        .unwrap();
    let mut client = SseClient::new(resp);
    assert_eq!(client.next_event().await.unwrap().1, json!({"result": "s3cr3t"}));
}

#[tokio::test]
async fn unknown_and_wrong_kind_procedures() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.unary("echo", unary_fn(|_ctx, input| async move { Ok(input) }.boxed()));
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let resp = reqwest::get(format!("{base}/rpc/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let resp = reqwest::get(format!("{base}/rpc/echo")).await.unwrap();
    assert_eq!(resp.status(), 405);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "WRONG_PROCEDURE_KIND");
}

#[tokio::test]
async fn client_disconnect_releases_subscription() {
    let atom = Atom::new(1u8);
    let mut reg = ProcedureRegistry::new();
    let _ = reg.atom("a", &atom);
    let (server, base) = start(reg, fast_heartbeat()).await;

    let mut client = open(&format!("{base}/rpc/a")).await;
    assert!(client.next_event().await.is_some());
    assert_eq!(atom.subscriber_count(), 1);
    assert_eq!(server.sessions().active_count(), 1);

    drop(client);
    wait_for(|| atom.subscriber_count() == 0).await;
    wait_for(|| server.sessions().active_count() == 0).await;
}

#[tokio::test]
async fn disconnect_ends_handler_without_error_event() {
    let finished = Arc::new(Mutex::new(None));
    let seen = finished.clone();
    let mut reg = ProcedureRegistry::new();
    let _ = reg.stream(
        "forever",
        stream_fn(move |_ctx, _input, emitter| {
            let seen = seen.clone();
            async move {
                let mut i = 0u64;
                let result: Result<(), _> = loop {
                    if let Err(e) = emitter.send(&i).await {
                        break Err(e);
                    }
                    i += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                };
                *seen.lock() = Some(result.clone().map_err(|e| e.is_closed()));
                result.map_err(RelayError::from)
            }
            .boxed()
        }),
    );
    let (server, base) = start(reg, TransportConfig::default()).await;

    let mut client = open(&format!("{base}/rpc/forever")).await;
    assert!(client.next_event().await.is_some());
    drop(client);

    wait_for(|| finished.lock().is_some()).await;
    assert_eq!(*finished.lock(), Some(Err(true)));
    wait_for(|| server.sessions().active_count() == 0).await;
}

#[tokio::test]
async fn heartbeats_flow_while_idle() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.atom("idle", &Atom::new(0u8));
    let (_server, base) = start(reg, fast_heartbeat()).await;

    let mut client = open(&format!("{base}/rpc/idle")).await;
    assert!(matches!(client.next().await, Some(Frame::Event { .. })));
    assert_eq!(client.next().await, Some(Frame::Heartbeat));
    assert_eq!(client.next().await, Some(Frame::Heartbeat));
}

/// Appends its name to an array request, then calls inward.
struct Tag(&'static str);

#[async_trait]
impl Interceptor for Tag {
    async fn intercept(
        &self,
        ctx: &CallContext,
        mut req: Value,
        next: Next<'_>,
    ) -> Result<Value, RelayError> {
        if let Some(list) = req.as_array_mut() {
            list.push(json!(self.0));
        }
        next.run(ctx, req).await
    }
}

#[tokio::test]
async fn unary_runs_interceptors_outermost_first() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg
        .intercept(Tag("global"))
        .group_intercept("g", Tag("group"));
    let _ = reg
        .unary("echo", unary_fn(|_ctx, input| async move { Ok(input) }.boxed()))
        .in_group("g")
        .intercept(Tag("own"));
    let (_server, base) = start(reg, TransportConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/rpc/echo"))
        .json(&json!([]))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({"result": ["global", "group", "own"]}));
}

#[tokio::test]
async fn shutdown_closes_open_streams() {
    let mut reg = ProcedureRegistry::new();
    let _ = reg.atom("a", &Atom::new(0u8));
    let config = ServerConfig::default();
    let server = RelayServer::new(config, reg);
    let (addr, handle) = server.listen().await.unwrap();

    let mut client = open(&format!("http://{addr}/rpc/a")).await;
    assert!(client.next_event().await.is_some());

    server.shutdown().close();
    assert_eq!(client.next().await, None);
    tokio::time::timeout(WAIT, handle).await.unwrap().unwrap();
}
