use std::sync::{Arc, Mutex};
use std::time::Duration;

use chat_stream::prelude::*;
use chat_stream::ToolStatus;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpListener;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/event-stream")
}

#[derive(Default)]
struct Seen {
    displayed: String,
    completions: usize,
    errors: Vec<String>,
}

struct Capture(Arc<Mutex<Seen>>);

impl StreamObserver for Capture {
    fn on_display(&mut self, _chunk: &str, displayed: &str) {
        self.0.lock().expect("lock").displayed = displayed.to_string();
    }
    fn on_complete(&mut self, _message: &Arc<StreamingMessage>) {
        self.0.lock().expect("lock").completions += 1;
    }
    fn on_error(&mut self, _message: &Arc<StreamingMessage>, error: &str) {
        self.0.lock().expect("lock").errors.push(error.to_string());
    }
}

fn orchestrator(server: &MockServer, config: OrchestratorConfig) -> (StreamOrchestrator, Arc<Mutex<Seen>>) {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let orchestrator = StreamOrchestrator::new(
        ClientConfig::new(format!("{}/chat/stream", server.uri())),
        Arc::new(StaticCredentials::bearer("tok")),
        config,
        Box::new(Capture(seen.clone())),
    )
    .expect("orchestrator");
    (orchestrator, seen)
}

fn fast_pacing() -> Option<PacerConfig> {
    Some(
        PacerConfig::default()
            .chunk_size(8)
            .tick_interval(Duration::from_millis(1)),
    )
}

#[tokio::test]
async fn full_response_with_tools_and_code() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: phase_start\ndata: {\"phase\":\"thinking\"}\n\n",
        "event: tool_call\ndata: {\"id\":\"t1\",\"tool\":\"search\",\"input\":{\"q\":\"rust\"}}\n\n",
        "event: tool_result\ndata: {\"id\":\"t1\",\"result\":[\"doc\"]}\n\n",
        "data: {\"content\":\"Try:\\n``\"}\n\n",
        "data: {\"content\":\"`rust\\nfn main() {}\\n```\"}\n\n",
        "event: done\ndata: {}\n\n",
        "data: {\"content\":\"never shown\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(serde_json::json!({"message":"hi","model":"small"})))
        .respond_with(sse(body))
        .mount(&server)
        .await;

    let config = OrchestratorConfig::default()
        .pacing(fast_pacing())
        .model_override("small");
    let (mut orchestrator, seen) = orchestrator(&server, config);
    orchestrator.send(ChatRequest::new("hi")).expect("send");
    let message = orchestrator.run().await;

    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(message.phase.as_deref(), Some("thinking"));
    assert_eq!(message.content, "Try:\n```rust\nfn main() {}\n```");
    assert_eq!(message.tools.len(), 1);
    assert_eq!(message.tools[0].status, ToolStatus::Completed);
    assert_eq!(message.tools[0].input, serde_json::json!({"q":"rust"}));

    let blocks = orchestrator.parser().code_blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].language, "rust");
    assert_eq!(blocks[0].code, "fn main() {}\n");
    assert!(blocks[0].is_complete);

    let seen = seen.lock().expect("lock");
    assert_eq!(seen.displayed, message.content);
    assert_eq!(seen.completions, 1);
    assert!(seen.errors.is_empty());
}

#[tokio::test]
async fn gateway_error_and_status_failure_end_the_same_way() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(serde_json::json!({"message":"event"})))
        .respond_with(sse("data: {\"content\":\"par\"}\n\nevent: error\ndata: {\"message\":\"quota\"}\n\n"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/stream"))
        .and(body_partial_json(serde_json::json!({"message":"status"})))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let (mut by_event, seen_event) = orchestrator(&server, OrchestratorConfig::default().pacing(None));
    by_event.send(ChatRequest::new("event")).expect("send");
    let failed_by_event = by_event.run().await;

    let (mut by_status, seen_status) = orchestrator(&server, OrchestratorConfig::default().pacing(None));
    by_status.send(ChatRequest::new("status")).expect("send");
    let failed_by_status = by_status.run().await;

    for message in [&failed_by_event, &failed_by_status] {
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(!message.is_streaming);
        assert!(message.error.is_some());
    }
    assert_eq!(failed_by_event.content, "par");
    assert_eq!(failed_by_event.error.as_deref(), Some("quota"));
    assert_eq!(seen_event.lock().expect("lock").errors.len(), 1);
    assert_eq!(seen_status.lock().expect("lock").errors.len(), 1);
}

#[tokio::test]
async fn stream_without_done_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse("data: {\"content\":\"cut off\"}\n\n"))
        .mount(&server)
        .await;

    let (mut orchestrator, _) = orchestrator(&server, OrchestratorConfig::default().pacing(None));
    orchestrator.send(ChatRequest::new("hi")).expect("send");
    let message = orchestrator.run().await;
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.content, "cut off");
}

#[tokio::test]
async fn stop_mid_stream_cancels() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            sse("data: {\"content\":\"slow\"}\n\nevent: done\ndata: {}\n\n")
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&server)
        .await;

    let (mut orchestrator, seen) = orchestrator(&server, OrchestratorConfig::default().pacing(None));
    orchestrator.send(ChatRequest::new("hi")).expect("send");
    assert_eq!(orchestrator.status(), MessageStatus::Streaming);
    orchestrator.stop();

    let message = orchestrator.run().await;
    assert_eq!(message.status, MessageStatus::Cancelled);
    assert_eq!(message.error, None);
    assert!(seen.lock().expect("lock").errors.is_empty());

    // A stopped orchestrator accepts the next message.
    assert!(orchestrator.send(ChatRequest::new("again")).is_ok());
    orchestrator.stop();
}

/// Answers one request with a chunked event stream holding `frames`, then
/// keeps the connection open without ever ending the body.
async fn lingering_gateway(frames: &'static str) -> (String, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("http://{}/chat/stream", listener.local_addr().expect("addr"));
    let handle = tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = vec![0_u8; 8192];
        let _ = socket.read(&mut request).await;
        let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
        let chunk = format!("{:x}\r\n{frames}\r\n", frames.len());
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(chunk.as_bytes()).await;
        let _ = socket.flush().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    (url, handle)
}

#[tokio::test]
async fn error_event_ends_the_run_while_the_socket_stays_open() {
    let (url, gateway) = lingering_gateway("event: error\ndata: {\"message\":\"quota\"}\n\n").await;
    let seen = Arc::new(Mutex::new(Seen::default()));
    let mut orchestrator = StreamOrchestrator::new(
        ClientConfig::new(url),
        Arc::new(StaticCredentials::anonymous()),
        OrchestratorConfig::default().pacing(None),
        Box::new(Capture(seen.clone())),
    )
    .expect("orchestrator");
    orchestrator.send(ChatRequest::new("hi")).expect("send");

    let message = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("run returns after the error event");
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.error.as_deref(), Some("quota"));
    assert_eq!(seen.lock().expect("lock").errors, vec!["quota".to_string()]);
    gateway.abort();
}

#[tokio::test]
async fn done_event_ends_the_run_while_the_socket_stays_open() {
    let (url, gateway) =
        lingering_gateway("data: {\"content\":\"ok\"}\n\nevent: done\ndata: {}\n\n").await;
    let mut orchestrator = StreamOrchestrator::new(
        ClientConfig::new(url),
        Arc::new(StaticCredentials::anonymous()),
        OrchestratorConfig::default().pacing(fast_pacing()),
        Box::new(NoopObserver),
    )
    .expect("orchestrator");
    orchestrator.send(ChatRequest::new("hi")).expect("send");

    let message = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("run returns after done");
    assert_eq!(message.status, MessageStatus::Complete);
    assert_eq!(orchestrator.displayed(), "ok");
    gateway.abort();
}

#[tokio::test]
async fn begin_detaches_the_previous_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(sse("data: {\"content\":\"late\"}\n\n").set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let (mut orchestrator, _) = orchestrator(&server, OrchestratorConfig::default().pacing(None));
    orchestrator.send(ChatRequest::new("hi")).expect("send");
    orchestrator.begin();

    let message = tokio::time::timeout(Duration::from_secs(5), orchestrator.run())
        .await
        .expect("nothing left to wait for");
    assert_eq!(message.status, MessageStatus::Streaming);
    assert_eq!(message.content, "");
}
