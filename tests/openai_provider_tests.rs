#![cfg(feature = "openai")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

use dasi::conversation::{ToolCallGateway, TurnInput, TurnLoop};
use dasi::error::DasiError;
use dasi::history::InMemoryHistoryStore;
use dasi::provider::openai::OpenAiProvider;
use dasi::provider::{ModelProvider, ProviderRequest};
use dasi::tools::ToolExecutor;
use dasi::types::*;

fn sse(chunks: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

fn text_chunk(text: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
}

fn stop_chunk(reason: &str) -> serde_json::Value {
    json!({"choices": [{"index": 0, "delta": {}, "finish_reason": reason}]})
}

fn sse_response(chunks: &[serde_json::Value]) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(sse(chunks))
}

fn provider(server: &MockServer) -> OpenAiProvider {
    OpenAiProvider::new("gpt-4o-mini".to_string(), "test-key".to_string(), Some(server.uri()))
}

fn request(text: &str) -> ProviderRequest {
    ProviderRequest {
        messages: vec![ModelMessage::user(text)],
        ..Default::default()
    }
}

async fn collect(
    provider: &OpenAiProvider,
    request: &ProviderRequest,
) -> Vec<Result<TextStreamDelta, DasiError>> {
    match provider.stream_text(request).await {
        Ok(stream) => stream.collect().await,
        Err(e) => panic!("stream should open: {e}"),
    }
}

#[tokio::test]
async fn streams_text_then_done() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(sse_response(&[
            text_chunk("Hel"),
            text_chunk("lo"),
            stop_chunk("stop"),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let deltas = collect(&provider(&server), &request("hi")).await;
    let deltas: Vec<TextStreamDelta> = deltas.into_iter().map(Result::unwrap).collect();

    let text: String = deltas.iter().map(|d| d.text.as_str()).collect();
    assert_eq!(text, "Hello");
    let last = deltas.last().unwrap();
    assert_eq!(last.event_type, StreamEventType::Done);
    assert_eq!(last.finish_reason, Some(FinishReason::Stop));
    assert!(deltas.iter().all(|d| d.tool_calls.is_none()));
}

/// Serves one request, writing `parts` as separate HTTP chunks.
async fn serve_chunked_once(parts: Vec<Vec<u8>>) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 4096];
        // Headers, then Content-Length bytes of body.
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&request).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap())
                    })
                    .unwrap_or(0);
                if request.len() >= end + 4 + length {
                    break;
                }
            }
            if n == 0 {
                break;
            }
        }

        socket
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n")
            .await
            .unwrap();
        for part in parts {
            socket
                .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                .await
                .unwrap();
            socket.write_all(&part).await.unwrap();
            socket.write_all(b"\r\n").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.flush().await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn multibyte_text_split_across_chunks_survives() {
    let body = sse(&[text_chunk("15°C"), stop_chunk("stop")]).into_bytes();
    let degree = body
        .windows(2)
        .position(|w| w == "°".as_bytes())
        .unwrap();
    let (head, rest) = body.split_at(degree + 1);
    let base_url = serve_chunked_once(vec![head.to_vec(), rest.to_vec()]).await;

    let provider = OpenAiProvider::new("gpt-4o-mini".to_string(), "test-key".to_string(), Some(base_url));
    let deltas = collect(&provider, &request("weather?")).await;
    let text: String = deltas
        .into_iter()
        .map(Result::unwrap)
        .map(|d| d.text)
        .collect();
    assert_eq!(text, "15°C");
}

#[tokio::test]
async fn tool_call_fragments_are_reassembled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_abc", "type": "function",
                 "function": {"name": "weather", "arguments": ""}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "{\"city\":"}}
            ]}}]}),
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "\"Paris\"}"}}
            ]}}]}),
            stop_chunk("tool_calls"),
        ]))
        .mount(&server)
        .await;

    let deltas = collect(&provider(&server), &request("weather?")).await;
    let calls = deltas
        .into_iter()
        .map(Result::unwrap)
        .find_map(|d| d.tool_calls)
        .expect("structured tool calls");

    assert_eq!(
        calls,
        StructuredToolCalls::Multiple(vec![RawToolCall::encoded(
            Some("call_abc"),
            "weather",
            "{\"city\":\"Paris\"}"
        )])
    );
}

#[tokio::test]
async fn error_statuses_map_to_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    match provider(&server).stream_text(&request("hi")).await {
        Err(DasiError::Authentication(message)) => assert_eq!(message, "invalid key"),
        Err(other) => panic!("expected authentication error, got {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn missing_model_is_a_404_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("model not found"))
        .mount(&server)
        .await;

    let err = provider(&server)
        .generate_text(&request("hi"))
        .await
        .expect_err("404 should fail");
    assert!(matches!(err, DasiError::Api { status: 404, .. }));
}

#[tokio::test]
async fn generate_text_reads_first_choice() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"stream\":false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "4"},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = provider(&server)
        .generate_text(&request("2+2?"))
        .await
        .expect("generate");
    assert_eq!(response.text, "4");
    assert!(response.tool_calls.is_none());
}

#[tokio::test]
async fn turn_loop_round_trips_a_tool_call_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(sse_response(&[
            json!({"choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_w", "type": "function",
                 "function": {"name": "weather", "arguments": "{\"city\":\"Paris\"}"}}
            ]}}]}),
            stop_chunk("tool_calls"),
        ]))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_string_contains("\"role\":\"tool\""))
        .and(body_string_contains("call_w"))
        .respond_with(sse_response(&[
            text_chunk("Paris is 15°C and cloudy."),
            stop_chunk("stop"),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let runs = Arc::new(AtomicUsize::new(0));
    let gateway = ToolCallGateway::new();
    let mut requests = gateway.subscribe();
    let approver = gateway.clone();
    tokio::spawn(async move {
        while let Some(Ok(request)) = requests.next().await {
            approver.approve(&request.call_id);
        }
    });

    let turn_loop = TurnLoop::new(
        Arc::new(provider(&server)),
        Arc::new(InMemoryHistoryStore::new()),
        gateway,
        ToolExecutor::new(Arc::new(common::weather_registry(runs.clone()))),
    );
    let response = turn_loop
        .run(TurnInput::builder().query("Weather in Paris?").build(), None)
        .await
        .expect("turn");

    assert_eq!(response.text, "Paris is 15°C and cloudy.");
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
