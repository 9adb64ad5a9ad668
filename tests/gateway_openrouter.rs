use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use weaver_forge::gateway::openrouter::{ChatProvider, OpenRouterAdapter};
use weaver_forge::gateway::usage::CallStatus;
use weaver_forge::gateway::{
    Attribution, ChatModel, ChatRequest, FinishReason, GatewayConfig, MemoryUsageSink, Message,
    NoopUsageSink, ProviderError, ProviderGateway,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

fn adapter(server: &MockServer) -> OpenRouterAdapter {
    OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
        .unwrap()
}

fn request(model: &str) -> ChatRequest {
    ChatRequest::new(
        ChatModel::openrouter(model),
        vec![Message::user("hi")],
        Attribution::new("test"),
    )
}

fn ok_body(content: &str) -> serde_json::Value {
    json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
    })
}

fn fast_config(max_retries: u32) -> GatewayConfig {
    GatewayConfig {
        max_retries,
        retry_base_delay: Duration::from_millis(0),
        call_timeout: Duration::from_secs(5),
        fallback_model: None,
    }
}

#[tokio::test]
async fn openrouter_parses_success_content_and_usage() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": { "content": "hello" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 10, "completion_tokens": 20 }
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server)
        .chat(&request("openai/gpt-4o"))
        .await
        .unwrap();
    assert_eq!(resp.content, "hello");
    assert_eq!(resp.model, "openai/gpt-4o");
    assert_eq!(resp.finish_reason, FinishReason::Stop);
    assert_eq!(resp.input_tokens, 10);
    assert_eq!(resp.output_tokens, 20);
}

#[tokio::test]
async fn openrouter_falls_back_to_tool_call_arguments_when_content_empty() {
    let server = MockServer::start().await;
    let args = r#"{"weaving_score": 8}"#;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{"function": {"arguments": args}}]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })))
        .mount(&server)
        .await;

    let resp = adapter(&server)
        .chat(&request("openai/gpt-4o").json())
        .await
        .unwrap();
    assert_eq!(resp.content, args);
    assert_eq!(resp.finish_reason, FinishReason::ToolCalls);
}

#[tokio::test]
async fn openrouter_detects_refusal_from_content() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(ok_body("I cannot comply with that request.")),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .chat(&request("openai/gpt-4o"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Refused(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn openrouter_rejects_oversized_input_without_calling() {
    let server = MockServer::start().await;

    let req = ChatRequest::new(
        ChatModel::openrouter("openai/gpt-4o"),
        vec![Message::user("x".repeat(500_001))],
        Attribution::new("test"),
    );
    let err = adapter(&server).chat(&req).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidRequest(_)));

    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn openrouter_classifies_http_429_as_remote_rate_limit_and_keeps_context() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("x-request-id", "abc123")
                .set_body_json(json!({
                    "error": { "message": "rate limited", "code": "rate_limit_exceeded" }
                })),
        )
        .mount(&server)
        .await;

    let err = adapter(&server)
        .chat(&request("openai/gpt-4o"))
        .await
        .unwrap_err();
    match err {
        ProviderError::RateLimited(ctx) => {
            assert_eq!(ctx.http_status, Some(429));
            assert_eq!(ctx.provider_code.as_deref(), Some("rate_limit_exceeded"));
            assert_eq!(ctx.request_id.as_deref(), Some("abc123"));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn openrouter_classifies_404_as_model_unavailable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "No endpoints found for gone/model", "code": 404 }
        })))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .chat(&request("gone/model"))
        .await
        .unwrap_err();
    match err {
        ProviderError::ModelUnavailable { model, context } => {
            assert_eq!(model, "gone/model");
            assert_eq!(context.unwrap().provider_code.as_deref(), Some("404"));
        }
        other => panic!("expected ModelUnavailable, got {other:?}"),
    }
}

#[derive(Clone)]
struct FlipResponder {
    calls: Arc<AtomicUsize>,
    first: ResponseTemplate,
    second: ResponseTemplate,
}

impl Respond for FlipResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n == 0 {
            self.first.clone()
        } else {
            self.second.clone()
        }
    }
}

#[tokio::test]
async fn provider_gateway_retries_on_retryable_errors_and_records_every_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(FlipResponder {
            calls: Arc::new(AtomicUsize::new(0)),
            first: ResponseTemplate::new(500).set_body_json(json!({
                "error": { "message": "transient error", "code": "internal" }
            })),
            second: ResponseTemplate::new(200).set_body_json(ok_body("ok")),
        })
        .mount(&server)
        .await;

    let usage = Arc::new(MemoryUsageSink::new());
    let gateway = ProviderGateway::with_config(adapter(&server), usage.clone(), fast_config(1));

    let req = ChatRequest::new(
        ChatModel::openrouter("openai/gpt-4o"),
        vec![Message::user("hi")],
        Attribution::new("test").with_task(uuid::Uuid::nil()),
    );
    let resp = gateway.chat(req).await.unwrap();
    assert_eq!(resp.content, "ok");

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 2);

    let records = usage.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[0].error_code.as_deref(), Some("backend_error"));
    assert_eq!(records[0].attempt, 0);
    assert_eq!(records[1].status, CallStatus::Success);
    assert_eq!(records[1].attempt, 1);
    assert_eq!(records[1].task_id, Some(uuid::Uuid::nil()));
    assert_eq!(records[1].caller, "test");
}

#[tokio::test]
async fn provider_gateway_does_not_retry_permanent_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "message": "bad input", "code": "bad_request" }
        })))
        .mount(&server)
        .await;

    let gateway =
        ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(3));
    let err = gateway.chat(request("openai/gpt-4o")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Backend { retryable: false, .. }));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}

#[tokio::test]
async fn provider_gateway_times_out_each_attempt() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ok_body("too late"))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let usage = Arc::new(MemoryUsageSink::new());
    let gateway = ProviderGateway::with_config(
        adapter(&server),
        usage.clone(),
        GatewayConfig {
            call_timeout: Duration::from_millis(50),
            ..fast_config(1)
        },
    );

    let err = gateway.chat(request("openai/gpt-4o")).await.unwrap_err();
    assert!(matches!(err, ProviderError::Timeout(d) if d == Duration::from_millis(50)));

    let records = usage.records();
    assert_eq!(records.len(), 2);
    assert!(records
        .iter()
        .all(|r| r.error_code.as_deref() == Some("timeout")));
}

#[tokio::test]
async fn provider_gateway_switches_to_fallback_model_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "retired/model" })))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "model not found", "code": "model_not_found" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({ "model": "openai/gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("served by fallback")))
        .mount(&server)
        .await;

    let usage = Arc::new(MemoryUsageSink::new());
    let gateway = ProviderGateway::with_config(
        adapter(&server),
        usage.clone(),
        GatewayConfig {
            fallback_model: Some("openai/gpt-4o-mini".into()),
            ..fast_config(2)
        },
    );

    let resp = gateway.chat(request("retired/model")).await.unwrap();
    assert_eq!(resp.content, "served by fallback");
    assert_eq!(resp.model, "openai/gpt-4o-mini");

    let records = usage.records();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].model, "retired/model");
    assert_eq!(records[0].error_code.as_deref(), Some("model_unavailable"));
    assert_eq!(records[1].model, "openai/gpt-4o-mini");
    assert_eq!(records[1].status, CallStatus::Success);
}

#[tokio::test]
async fn provider_gateway_surfaces_model_unavailable_without_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "message": "model not found", "code": "model_not_found" }
        })))
        .mount(&server)
        .await;

    let gateway =
        ProviderGateway::with_config(adapter(&server), Arc::new(NoopUsageSink), fast_config(2));
    let err = gateway.chat(request("retired/model")).await.unwrap_err();
    assert!(matches!(err, ProviderError::ModelUnavailable { .. }));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
}
