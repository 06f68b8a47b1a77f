//! Integration tests for the configurable agent runtime: retry loop,
//! validation feedback, error handling and event emission.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use concerto_agent::{
    AgentConfig, AgentInput, ConfigurableAgent, LifecycleObserver, ModelInvoker, ModelRequest,
    ModelResponse, NoopObserver, ObserverChain, ResponseFormat, ResponseFormatValidator,
    TraceContext, Toolbox, ValidationReport,
};
use concerto_core::{BroadcastEventBus, ConcertoError, ConcertoResult, Message, NoopEventBus, Role};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Pops scripted results in order; once the script runs out it repeats `fallback`.
struct ScriptedModel {
    script: Mutex<Vec<ConcertoResult<ModelResponse>>>,
    fallback: fn() -> ConcertoResult<ModelResponse>,
    call_count: AtomicU32,
    seen: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(
        mut script: Vec<ConcertoResult<ModelResponse>>,
        fallback: fn() -> ConcertoResult<ModelResponse>,
    ) -> Arc<Self> {
        script.reverse();
        Arc::new(Self {
            script: Mutex::new(script),
            fallback,
            call_count: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelInvoker for ScriptedModel {
    async fn invoke(&self, request: ModelRequest) -> ConcertoResult<ModelResponse> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(request);
        match self.script.lock().await.pop() {
            Some(result) => result,
            None => (self.fallback)(),
        }
    }
}

fn failing_model() -> ConcertoResult<ModelResponse> {
    Err(ConcertoError::Model("backend unavailable".into()))
}

fn not_json() -> ConcertoResult<ModelResponse> {
    Ok(ModelResponse::text("definitely not json"))
}

fn ok_text() -> ConcertoResult<ModelResponse> {
    Ok(ModelResponse::text("fine"))
}

struct AlwaysInvalid;

#[async_trait]
impl LifecycleObserver for AlwaysInvalid {
    async fn validate(&self, _response: &ModelResponse) -> Option<ValidationReport> {
        Some(ValidationReport::failed(vec!["missing title".into()]))
    }
}

struct Recover;

#[async_trait]
impl LifecycleObserver for Recover {
    async fn on_error(&self, error: &ConcertoError, attempt: u32) -> Option<ModelResponse> {
        Some(ModelResponse::text(format!("recovered on {attempt}: {error}")))
    }
}

fn input(text: &str) -> AgentInput {
    let conversation_id = Uuid::new_v4();
    AgentInput::new(
        conversation_id,
        vec![Message::user(text, conversation_id)],
        TraceContext::new("scribe"),
    )
}

fn build(
    config: AgentConfig,
    model: Arc<ScriptedModel>,
    observer: Arc<dyn LifecycleObserver>,
) -> ConfigurableAgent {
    ConfigurableAgent::new(
        "scribe",
        config,
        model,
        observer,
        Toolbox::new(),
        Arc::new(NoopEventBus),
    )
}

fn validating_config(max_retries: u32) -> AgentConfig {
    let mut config = AgentConfig::new("Reply with a JSON object.");
    config.max_retries = max_retries;
    config.validate_response = true;
    config.prompts.error_correction = Some("Your last answer was rejected: {errors}".into());
    config
}

#[tokio::test]
async fn test_always_invalid_exhausts_attempts_without_error() {
    for n in 1..=4 {
        let model = ScriptedModel::new(vec![], ok_text);
        let agent = build(validating_config(n), model.clone(), Arc::new(AlwaysInvalid));

        let outcome = agent.act(input("draft")).await.unwrap();
        assert_eq!(model.calls(), n);
        assert_eq!(outcome.attempts, n);
        assert!(!outcome.validated);
        assert_eq!(outcome.response.content.as_deref(), Some("fine"));
        assert_eq!(outcome.validation.unwrap().errors, vec!["missing title"]);
    }
}

#[tokio::test]
async fn test_always_failing_model_raises_after_n_calls() {
    let model = ScriptedModel::new(vec![], failing_model);
    let mut config = AgentConfig::new("x");
    config.max_retries = 3;
    let agent = build(config, model.clone(), Arc::new(NoopObserver));

    let err = agent.act(input("draft")).await.unwrap_err();
    assert_eq!(model.calls(), 3);
    assert!(matches!(err, ConcertoError::Model(ref m) if m == "backend unavailable"));
}

#[tokio::test]
async fn test_transient_failure_then_success() {
    let model = ScriptedModel::new(
        vec![failing_model(), Ok(ModelResponse::text("second time lucky"))],
        ok_text,
    );
    let agent = build(AgentConfig::new("x"), model.clone(), Arc::new(NoopObserver));

    let outcome = agent.act(input("draft")).await.unwrap();
    assert_eq!(model.calls(), 2);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(outcome.response.content.as_deref(), Some("second time lucky"));
}

#[tokio::test]
async fn test_error_handler_short_circuits() {
    let model = ScriptedModel::new(vec![], failing_model);
    let agent = build(AgentConfig::new("x"), model.clone(), Arc::new(Recover));

    let outcome = agent.act(input("draft")).await.unwrap();
    assert_eq!(model.calls(), 1);
    assert!(outcome
        .response
        .content
        .unwrap()
        .starts_with("recovered on 1"));
}

#[tokio::test]
async fn test_disabled_error_stage_is_skipped() {
    let model = ScriptedModel::new(vec![], failing_model);
    let mut config = AgentConfig::new("x");
    config.max_retries = 2;
    config.hooks.on_error = false;
    let agent = build(config, model.clone(), Arc::new(Recover));

    assert!(agent.act(input("draft")).await.is_err());
    assert_eq!(model.calls(), 2);
}

#[tokio::test]
async fn test_corrective_turn_carries_errors() {
    let model = ScriptedModel::new(vec![not_json()], || Ok(ModelResponse::text("{\"title\":\"ok\"}")));
    let mut config = validating_config(3);
    config.response_format = ResponseFormat::Json;
    let observer = ObserverChain::new().with(Arc::new(ResponseFormatValidator::new(ResponseFormat::Json)));
    let agent = build(config, model.clone(), Arc::new(observer));

    let outcome = agent.act(input("draft")).await.unwrap();
    assert!(outcome.validated);
    assert_eq!(outcome.attempts, 2);

    let seen = model.seen.lock().await;
    assert_eq!(seen[0].messages.len(), 2);
    let retry = &seen[1].messages;
    assert_eq!(retry.len(), 3);
    let correction = retry.last().unwrap();
    assert_eq!(correction.role, Role::User);
    assert!(correction.content.starts_with("Your last answer was rejected: [\""));
    assert!(correction.content.contains("not valid JSON"));
}

#[tokio::test]
async fn test_validation_disabled_ignores_validator() {
    let model = ScriptedModel::new(vec![], ok_text);
    let mut config = validating_config(3);
    config.validate_response = false;
    let agent = build(config, model.clone(), Arc::new(AlwaysInvalid));

    let outcome = agent.act(input("draft")).await.unwrap();
    assert_eq!(model.calls(), 1);
    assert!(outcome.validated);
}

#[tokio::test]
async fn test_events_emitted_with_payload() {
    let bus = Arc::new(BroadcastEventBus::new(16));
    let mut rx = bus.subscribe();
    let model = ScriptedModel::new(vec![], ok_text);
    let mut config = AgentConfig::new("x");
    config.emit_events = vec!["scribe.responded".into(), "content.drafted".into()];
    let agent = ConfigurableAgent::new(
        "scribe",
        config,
        model,
        Arc::new(NoopObserver),
        Toolbox::new(),
        bus.clone(),
    );

    agent.act(input("draft")).await.unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.name, "scribe.responded");
    assert_eq!(first.payload["agent_type"], "scribe");
    assert_eq!(first.payload["attempt"], 1);
    assert_eq!(first.payload["total_attempts"], 3);
    assert_eq!(first.payload["response"]["content"], "fine");
    assert_eq!(first.payload["input"]["last_message"], "draft");
    assert_eq!(rx.recv().await.unwrap().name, "content.drafted");
}
