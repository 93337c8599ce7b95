//! End-to-end tests for the bridge session turn loop, driven by a
//! scripted LLM client and in-process tool server fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use mb_bridge::session::{BridgeSession, SessionOutcome};
use mb_domain::config::Config;
use mb_domain::error::{Error, Result};
use mb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use mb_mcp_client::protocol::{JsonRpcResponse, McpToolDef};
use mb_mcp_client::transport::{McpTransport, TransportError};
use mb_mcp_client::{ToolRegistry, ToolServer};
use mb_providers::{ChatRequest, LlmClient, LlmReply};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fakes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// LLM double that replays a fixed script of replies/errors.
struct ScriptedLlm {
    script: Mutex<Vec<Result<LlmReply>>>,
    calls: AtomicUsize,
}

impl ScriptedLlm {
    fn new(script: Vec<Result<LlmReply>>) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            script: Mutex::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, _req: &ChatRequest) -> Result<LlmReply> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .await
            .pop()
            .expect("scripted LLM ran out of replies")
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

/// Per-tool behavior of a fake server.
struct ToolBehavior {
    delay: Duration,
    /// The `tools/call` result payload.
    result: Value,
}

/// Transport double serving `tools/call` from a behavior table.
struct FakeServerTransport {
    behaviors: HashMap<String, ToolBehavior>,
    alive: std::sync::atomic::AtomicBool,
}

impl FakeServerTransport {
    fn new(behaviors: HashMap<String, ToolBehavior>) -> Self {
        Self {
            behaviors,
            alive: std::sync::atomic::AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl McpTransport for FakeServerTransport {
    async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> std::result::Result<JsonRpcResponse, TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::ProcessExited);
        }
        let result = match method {
            "tools/call" => {
                let name = params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_string();
                let behavior = self
                    .behaviors
                    .get(&name)
                    .unwrap_or_else(|| panic!("fake server has no behavior for '{name}'"));
                if !behavior.delay.is_zero() {
                    tokio::time::sleep(behavior.delay).await;
                }
                behavior.result.clone()
            }
            _ => Value::Null,
        };
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: 1,
            result: Some(result),
            error: None,
        })
    }

    async fn send_notification(&self, _method: &str) -> std::result::Result<(), TransportError> {
        Ok(())
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_config() -> Config {
    let mut config = Config::default();
    config.llm.api_key = "sk-test".into();
    // Keep retry backoff negligible so retry tests stay fast.
    config.llm.retry_backoff_ms = 1;
    config
}

fn text_result(text: &str) -> Value {
    serde_json::json!({ "content": [{ "type": "text", "text": text }] })
}

fn error_result(text: &str) -> Value {
    serde_json::json!({ "content": [{ "type": "text", "text": text }], "isError": true })
}

fn tool_def(name: &str) -> McpToolDef {
    serde_json::from_value(serde_json::json!({ "name": name })).unwrap()
}

fn call(id: &str, tool: &str) -> ToolCall {
    ToolCall {
        call_id: id.into(),
        tool_name: tool.into(),
        arguments: serde_json::json!({}),
    }
}

fn tool_calls(calls: Vec<ToolCall>) -> Result<LlmReply> {
    Ok(LlmReply::ToolCalls { text: None, calls })
}

fn final_answer(text: &str) -> Result<LlmReply> {
    Ok(LlmReply::Final { text: text.into() })
}

/// Register one fake server advertising `tools` with the given behaviors.
fn fake_server(
    registry: &mut ToolRegistry,
    id: &str,
    behaviors: Vec<(&str, Duration, Value)>,
) -> Arc<ToolServer> {
    let tools: Vec<McpToolDef> = behaviors.iter().map(|(name, _, _)| tool_def(name)).collect();
    let table: HashMap<String, ToolBehavior> = behaviors
        .into_iter()
        .map(|(name, delay, result)| (name.to_string(), ToolBehavior { delay, result }))
        .collect();
    let server = Arc::new(ToolServer::with_transport(
        id,
        tools,
        Box::new(FakeServerTransport::new(table)),
    ));
    registry.register(server.clone()).unwrap();
    server
}

/// The tool-result turns of a transcript, as (call_id, content, is_error).
fn tool_results(transcript: &[Message]) -> Vec<(String, String, bool)> {
    transcript
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| match &m.content {
            MessageContent::Parts(parts) => match &parts[0] {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => (tool_use_id.clone(), content.clone(), *is_error),
                other => panic!("unexpected part: {other:?}"),
            },
            other => panic!("unexpected content: {other:?}"),
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn final_answer_with_zero_tools_completes_in_one_step() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![final_answer("4")]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "What is 2+2");
    match session.run().await.unwrap() {
        SessionOutcome::Completed { answer, turns } => {
            assert_eq!(answer, "4");
            assert_eq!(turns, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn tool_call_then_final_answer() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![
        tool_calls(vec![ToolCall {
            call_id: "1".into(),
            tool_name: "add".into(),
            arguments: serde_json::json!({"a": 2, "b": 2}),
        }]),
        final_answer("The result is 4"),
    ]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "add 2 and 2");
    match session.run().await.unwrap() {
        SessionOutcome::Completed { answer, turns } => {
            assert_eq!(answer, "The result is 4");
            assert_eq!(turns, 2);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    // Exactly two model steps around one dispatch step.
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn unknown_tool_becomes_failure_result_not_abort() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![
        tool_calls(vec![call("1", "subtract")]),
        final_answer("I could not use that tool."),
    ]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "subtract 2 from 4");
    let id = session.id();
    let outcome = session.run().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { .. }));
    assert!(!id.is_nil());
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn unknown_tool_result_is_correlated_and_flagged() {
    let mut config = test_config();
    config.session.max_turns = 1;
    let llm = ScriptedLlm::new(vec![tool_calls(vec![call("c9", "subtract")])]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "subtract");
    let SessionOutcome::MaxTurnsExceeded { transcript, .. } = session.run().await.unwrap()
    else {
        panic!("expected MaxTurnsExceeded");
    };

    let results = tool_results(&transcript);
    assert_eq!(results.len(), 1);
    let (call_id, content, is_error) = &results[0];
    assert_eq!(call_id, "c9");
    assert!(content.contains("unknown tool: subtract"));
    assert!(is_error);
}

#[tokio::test]
async fn batch_results_keep_request_order_under_mixed_outcomes() {
    let mut config = test_config();
    config.session.max_turns = 1;
    // Three calls: the first is slow, the second fast, the third unknown.
    // Completion order differs from request order; the transcript must not.
    let llm = ScriptedLlm::new(vec![tool_calls(vec![
        call("1", "slow_lookup"),
        call("2", "fast_lookup"),
        call("3", "missing_tool"),
    ])]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "slow",
        vec![("slow_lookup", Duration::from_millis(50), text_result("slow value"))],
    );
    fake_server(
        &mut registry,
        "fast",
        vec![(
            "fast_lookup",
            Duration::ZERO,
            error_result("lookup failed"),
        )],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "look things up");
    let SessionOutcome::MaxTurnsExceeded { transcript, .. } = session.run().await.unwrap()
    else {
        panic!("expected MaxTurnsExceeded");
    };

    let results = tool_results(&transcript);
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "1");
    assert_eq!(results[0].1, "slow value");
    assert!(!results[0].2);
    assert_eq!(results[1].0, "2");
    assert_eq!(results[1].1, "lookup failed");
    assert!(results[1].2);
    assert_eq!(results[2].0, "3");
    assert!(results[2].2);
}

#[tokio::test]
async fn max_turns_exhaustion_is_reported_not_crashed() {
    let mut config = test_config();
    config.session.max_turns = 3;
    let looping = || tool_calls(vec![call("1", "add")]);
    let llm = ScriptedLlm::new(vec![looping(), looping(), looping()]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "loop forever");
    match session.run().await.unwrap() {
        SessionOutcome::MaxTurnsExceeded { turns, transcript } => {
            assert_eq!(turns, 3);
            // system + user + 3 × (assistant tool-use + tool result)
            assert_eq!(transcript.len(), 8);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn consecutive_unresolvable_turns_abort() {
    let mut config = test_config();
    config.session.max_failed_tool_turns = 3;
    config.session.max_turns = 10;
    let ask_missing = || tool_calls(vec![call("1", "ghost")]);
    let llm = ScriptedLlm::new(vec![ask_missing(), ask_missing(), ask_missing()]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "use the ghost tool");
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, Error::NoUsableTools(_)));
    assert_eq!(llm.calls(), 3);
}

#[tokio::test]
async fn resolvable_turn_resets_the_failure_counter() {
    let mut config = test_config();
    config.session.max_failed_tool_turns = 2;
    config.session.max_turns = 10;
    let llm = ScriptedLlm::new(vec![
        tool_calls(vec![call("1", "ghost")]),
        // A turn that resolves resets the guard.
        tool_calls(vec![call("2", "add")]),
        tool_calls(vec![call("3", "ghost")]),
        final_answer("done"),
    ]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "mix it up");
    let outcome = session.run().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { .. }));
    assert_eq!(llm.calls(), 4);
}

#[tokio::test]
async fn dead_server_degrades_to_failure_results() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![
        tool_calls(vec![call("1", "add")]),
        final_answer("the tool is gone"),
    ]);
    let mut registry = ToolRegistry::new();
    let server = fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );
    // The server dies before the first dispatch.
    server.shutdown().await;

    let session = BridgeSession::new(&config, &llm, &registry, "add 2 and 2");
    let outcome = session.run().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Completed { .. }));
}

#[tokio::test]
async fn transient_llm_failure_is_retried() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![
        Err(Error::Service {
            status: 503,
            message: "overloaded".into(),
        }),
        final_answer("4"),
    ]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "What is 2+2");
    match session.run().await.unwrap() {
        SessionOutcome::Completed { answer, turns } => {
            assert_eq!(answer, "4");
            // The retry happens inside one model step.
            assert_eq!(turns, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn retry_budget_is_bounded() {
    let mut config = test_config();
    config.llm.max_retries = 1;
    let service_err = || {
        Err(Error::Service {
            status: 503,
            message: "overloaded".into(),
        })
    };
    let llm = ScriptedLlm::new(vec![service_err(), service_err()]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "hi");
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, Error::Service { status: 503, .. }));
    assert_eq!(llm.calls(), 2);
}

#[tokio::test]
async fn auth_error_aborts_without_retry() {
    let config = test_config();
    let llm = ScriptedLlm::new(vec![Err(Error::Auth("invalid key".into()))]);
    let registry = ToolRegistry::new();

    let session = BridgeSession::new(&config, &llm, &registry, "hi");
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn transcript_mirrors_requested_calls_before_results() {
    let mut config = test_config();
    config.session.max_turns = 1;
    let llm = ScriptedLlm::new(vec![Ok(LlmReply::ToolCalls {
        text: Some("let me compute that".into()),
        calls: vec![call("1", "add")],
    })]);
    let mut registry = ToolRegistry::new();
    fake_server(
        &mut registry,
        "calc",
        vec![("add", Duration::ZERO, text_result("4"))],
    );

    let session = BridgeSession::new(&config, &llm, &registry, "add");
    let SessionOutcome::MaxTurnsExceeded { transcript, .. } = session.run().await.unwrap()
    else {
        panic!("expected MaxTurnsExceeded");
    };

    // system, user, assistant (mirrored request), tool result
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[2].role, Role::Assistant);
    assert_eq!(transcript[2].content.text(), Some("let me compute that"));
    assert_eq!(transcript[2].content.tool_calls().len(), 1);
    assert_eq!(transcript[3].role, Role::Tool);
}
