//! Request pipeline
//!
//! Orchestrates one inbound request end to end: config validation, agent
//! and skill binding, optimizer selection, hooks, the strategy walk with
//! per-target retries, upstream dispatch, cache, stream multiplexing,
//! error classification, and the observability log. Evaluations run
//! asynchronously after the response and feed rewards back to the
//! optimizer.

mod dispatch;
mod stream;

pub use dispatch::{BufferedUpstream, FrameStream, UpstreamResponse, dispatch};
pub use stream::{ChunkAccumulator, chat_response_from_value, synthesize_chunks};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::cache::{CacheLookup, CachedEntry, ResponseCache};
use crate::core::classifier::{ClassifiedError, classify};
use crate::core::embeddings::EmbeddingProvider;
use crate::core::evaluators::{
    EvaluationParams, JudgeClient, average_score, evaluate_log_with_methods,
};
use crate::core::hooks::{HookDirection, HookRunResult, run_hooks};
use crate::core::observability::{EventBroadcaster, LogBuilder};
use crate::core::optimizer::{ArmSelection, Optimizer};
use crate::core::providers::{Dialect, StreamState, registry};
use crate::core::strategy;
use crate::core::strategy::retry::backoff_delay;
use crate::core::transformer::{
    CapabilityAdjustment, adjust_for_capabilities, transform_body,
};
use crate::core::types::{
    CacheSettings, CacheStatus, CanonicalRequest, ChatCompletionRequest, ChatMessage, Event,
    MessageContent, MessageRole, RequestConfig, Skill, Target, TargetConfiguration,
};
use crate::storage::{StorageConnector, StorageError};
use crate::utils::error::{GatewayError, Result};

/// Reserved skills the pipeline may create on demand; everything else
/// must exist in storage
const RESERVED_AGENT: &str = "internal";
const RESERVED_SKILLS: &[&str] = &["internal:judge", "internal:embeddings"];

/// Judge recursion ceiling for reentrant evaluator calls
const MAX_JUDGE_DEPTH: usize = 2;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-request call context
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub request_id: String,
    pub method: String,
    /// Depth of reentrant judge calls rooted at an external request
    pub judge_depth: usize,
}

impl PipelineContext {
    pub fn new(method: &str) -> Self {
        Self {
            request_id: format!("req_{}", Uuid::new_v4()),
            method: method.to_string(),
            judge_depth: 0,
        }
    }
}

/// What the pipeline hands back to the HTTP layer
pub enum PipelineOutput {
    Json { status: u16, body: Value },
    Sse(ReceiverStream<bytes::Bytes>),
}

/// The request pipeline and its shared collaborators
pub struct RequestPipeline {
    pub storage: Arc<dyn StorageConnector>,
    pub cache: Arc<ResponseCache>,
    pub optimizer: Arc<Optimizer>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub client: reqwest::Client,
    /// Target used for reentrant judge calls; judges are unavailable
    /// without one
    pub judge_target: Option<Target>,
    pub default_timeout: Duration,
}

/// Failure of one upstream attempt, carrying what the retry loop needs
struct AttemptFailure {
    classified: ClassifiedError,
    retry_after: Option<Duration>,
}

/// A native upstream stream ready to be forwarded; the caller owns the
/// log and hands it to the forwarding task
struct StreamJob {
    frames: FrameStream,
    dialect: Arc<dyn Dialect>,
    config: RequestConfig,
    cache_settings: CacheSettings,
    cache_key: Option<String>,
    flight: Option<crate::core::cache::FlightGuard>,
    model: String,
}

enum AttemptOutcome {
    Success(PipelineOutput),
    Streaming(StreamJob),
    Failure(AttemptFailure),
}

impl RequestPipeline {
    pub fn new(
        storage: Arc<dyn StorageConnector>,
        cache: Arc<ResponseCache>,
        optimizer: Arc<Optimizer>,
        embeddings: Arc<dyn EmbeddingProvider>,
        broadcaster: Arc<EventBroadcaster>,
        client: reqwest::Client,
        judge_target: Option<Target>,
    ) -> Self {
        Self {
            storage,
            cache,
            optimizer,
            embeddings,
            broadcaster,
            client,
            judge_target,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Serve one request; errors become classified JSON envelopes
    pub async fn execute(
        self: &Arc<Self>,
        request: CanonicalRequest,
        config: RequestConfig,
        ctx: PipelineContext,
    ) -> PipelineOutput {
        match self.run(request, config, ctx).await {
            Ok(output) => output,
            Err(err) => error_output(&err),
        }
    }

    async fn run(
        self: &Arc<Self>,
        request: CanonicalRequest,
        config: RequestConfig,
        ctx: PipelineContext,
    ) -> Result<PipelineOutput> {
        config.validate()?;
        let function = request.function_name();

        let mut log = LogBuilder::new(function, &ctx.method, request.body_value()?);
        log.trace(config.trace_id.clone(), config.span_id.clone());
        if !config.metadata.is_empty() {
            log.annotate("caller_metadata", Value::Object(config.metadata.clone()));
        }

        // Bind agent and skill
        let skill = self.resolve_binding(&config, &mut log).await?;

        // Embedding for semantic routing and the semantic cache
        let wants_embedding = function.supports_semantic_routing()
            && (skill.as_ref().map(|s| s.optimize).unwrap_or(false)
                || semantic_cache_configured(&config));
        let embedding = if wants_embedding {
            self.compute_embedding(&request).await
        } else {
            None
        };
        log.embedding(embedding.clone());

        // Optimizer: one arm per request, applied to every attempt
        let selection = match (&skill, &embedding) {
            (Some(skill), Some(embedding)) => {
                let selection = self
                    .optimizer
                    .select(
                        skill,
                        embedding,
                        &config.system_prompt_variables,
                        config.allowed_prompt_variables.as_deref(),
                    )
                    .await?;
                if let Some(selection) = &selection {
                    log.arm(selection.cluster_id, selection.arm_id);
                }
                selection
            }
            _ => None,
        };

        // Input hooks
        let body = request.body_value()?;
        let input_result = run_hooks(
            &config.input_hooks,
            &self.client,
            HookDirection::Input,
            body,
            None,
        )
        .await;
        log.input_hooks(input_result.records.clone());
        if input_result.denied {
            return self
                .deny(log, &input_result, None, "input hook denied request")
                .await;
        }
        let request = request.with_body(input_result.body.clone())?;

        // Entry-time log write; finalized after response assembly
        self.persist_log(log.snapshot()).await;

        // Strategy walk
        let condition_body = request.body_value()?;
        let mut walk = strategy::plan(&config, &condition_body)?;
        let mut last_status: Option<u16> = None;
        let mut last_failure: Option<AttemptFailure> = None;
        let mut attempts: Vec<Value> = Vec::new();

        while let Some(index) = walk.next_target(last_status) {
            let target = &config.targets[index];
            debug!(target = index, provider = %target.provider, "attempting target");

            match self
                .attempt_target(&request, &config, target, selection.as_ref(), &mut log)
                .await?
            {
                AttemptOutcome::Success(output) => {
                    attempts.push(json!({
                        "target": index,
                        "provider": target.provider,
                        "status": 200,
                    }));
                    log.annotate("attempts", Value::Array(attempts));
                    return self.finish_success(log, output, skill, &ctx).await;
                }
                AttemptOutcome::Streaming(job) => {
                    attempts.push(json!({
                        "target": index,
                        "provider": target.provider,
                        "status": 200,
                    }));
                    log.annotate("attempts", Value::Array(attempts));
                    return Ok(self.forward_stream(job, log, skill, &ctx));
                }
                AttemptOutcome::Failure(failure) => {
                    attempts.push(json!({
                        "target": index,
                        "provider": target.provider,
                        "status": failure.classified.status,
                    }));
                    last_status = Some(failure.classified.status);
                    last_failure = Some(failure);
                }
            }
        }

        // Strategy exhausted: surface the last classified error
        let failure = last_failure.ok_or_else(|| {
            GatewayError::Internal("strategy yielded no attempts".into())
        })?;
        log.annotate("attempts", Value::Array(attempts));
        log.response(failure.classified.status, Some(failure.classified.to_body()));
        let final_log = log.finish();
        self.persist_log(final_log.clone()).await;
        self.broadcaster.log_event("log.completed", &final_log);

        Ok(PipelineOutput::Json {
            status: failure.classified.status,
            body: failure.classified.to_body(),
        })
    }

    /// One target: configuration application, retries, dispatch
    async fn attempt_target(
        self: &Arc<Self>,
        request: &CanonicalRequest,
        config: &RequestConfig,
        target: &Target,
        selection: Option<&ArmSelection>,
        log: &mut LogBuilder,
    ) -> Result<AttemptOutcome> {
        let dialect = registry().resolve(&target.provider)?;
        let target = self.resolve_credentials(target.clone()).await?;

        let mut effective = request.clone();
        if let Some(configuration) = &target.configuration {
            apply_configuration(&mut effective, configuration);
        }
        if let Some(selection) = selection {
            apply_configuration(&mut effective, &selection.configuration);
        }
        if !config.override_params.is_empty() {
            if let Some(params) = effective.additional_params_mut() {
                for (key, value) in &config.override_params {
                    params.insert(key.clone(), value.clone());
                }
            }
        }
        if let Some(model) = effective.model() {
            let renamed = dialect.rename_model(model);
            effective.set_model(&renamed);
        }
        log.target(dialect.tag(), effective.model());

        let retry = target.retry.clone().unwrap_or_default();
        let mut attempt = 0u32;
        loop {
            match self
                .single_call(&effective, config, &target, &dialect, log)
                .await?
            {
                AttemptOutcome::Failure(failure)
                    if attempt < retry.attempts && retry.retries_on(failure.classified.status) =>
                {
                    let delay = backoff_delay(&retry, attempt, failure.retry_after);
                    debug!(
                        provider = %target.provider,
                        attempt,
                        status = failure.classified.status,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after gated status"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                outcome => return Ok(outcome),
            }
        }
    }

    /// One upstream call with cache probe and response normalization
    async fn single_call(
        self: &Arc<Self>,
        request: &CanonicalRequest,
        config: &RequestConfig,
        target: &Target,
        dialect: &Arc<dyn Dialect>,
        log: &mut LogBuilder,
    ) -> Result<AttemptOutcome> {
        let function = request.function_name();
        let want_client_stream = request.is_stream();
        let upstream_streams = want_client_stream && dialect.supports_native_streaming();

        // The upstream sees the stream flag it can honor
        let mut upstream_request = request.clone();
        upstream_request.set_stream(upstream_streams);

        let mut body = upstream_request.body_value()?;
        let adjustments = adjust_for_capabilities(
            dialect.tag(),
            upstream_request.model().unwrap_or_default(),
            function,
            &mut body,
        );
        if !adjustments.is_empty() {
            log.annotate("parameter_adjustments", adjustments_value(&adjustments));
        }

        // Proxy bodies forward untransformed; everything else goes
        // through the dialect's parameter table
        let upstream_body = if let CanonicalRequest::Proxy(proxy) = &upstream_request {
            proxy.body.clone().unwrap_or(Value::Object(Map::new()))
        } else {
            let table = dialect.parameter_table(function).ok_or_else(|| {
                GatewayError::bad_request(format!(
                    "provider {} does not serve {function}",
                    dialect.tag()
                ))
            })?;
            transform_body(&table, &body, upstream_request.additional_params())?
        };

        // Cache probe
        let cache_settings = target.cache.clone().unwrap_or_else(|| config.cache.clone());
        let cache_key = self.cache.key_for(
            &cache_settings,
            dialect.tag(),
            upstream_request.model().unwrap_or_default(),
            function.as_str(),
            &body,
            config.strict_compliance,
            log_embedding(log).as_deref(),
        );

        let mut flight = None;
        if let Some(key) = &cache_key {
            if config.force_refresh {
                log.cache_status(CacheStatus::Miss);
            } else {
                match self.cache.begin(key, &cache_settings).await {
                    CacheLookup::Hit(entry) => {
                        log.cache_status(CacheStatus::Hit);
                        log.response(entry.status, Some(entry.body.clone()));
                        let output = self.replay_cached(entry, want_client_stream);
                        return Ok(AttemptOutcome::Success(output));
                    }
                    CacheLookup::Miss(guard) => {
                        log.cache_status(CacheStatus::Miss);
                        flight = Some(guard);
                    }
                }
            }
        }

        let timeout = config
            .request_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        let response = match dispatch(
            &self.client,
            dialect,
            target,
            &upstream_request,
            &upstream_body,
            timeout,
            upstream_streams,
        )
        .await
        {
            Ok(response) => response,
            Err(err) => {
                // Transport failures classify like provider bodies
                let classified = classify(
                    dialect.tag(),
                    &json!({"error": {"message": err.to_string()}}),
                    None,
                );
                return Ok(AttemptOutcome::Failure(AttemptFailure {
                    classified,
                    retry_after: None,
                }));
            }
        };

        match response {
            UpstreamResponse::Buffered(buffered) if !(200..300).contains(&buffered.status) => {
                let error_body = dialect.transform_error(&buffered.body);
                let classified = classify(
                    dialect.tag(),
                    &json!({"error": error_body, "upstream_body": buffered.body}),
                    Some(buffered.status),
                );
                Ok(AttemptOutcome::Failure(AttemptFailure {
                    classified,
                    retry_after: buffered.retry_after,
                }))
            }
            UpstreamResponse::Buffered(buffered) => {
                self.handle_buffered(
                    buffered,
                    request,
                    config,
                    dialect,
                    cache_settings,
                    cache_key,
                    flight,
                    want_client_stream,
                    log,
                )
                .await
            }
            UpstreamResponse::Stream { frames, .. } => {
                Ok(AttemptOutcome::Streaming(StreamJob {
                    frames,
                    dialect: dialect.clone(),
                    config: config.clone(),
                    cache_settings,
                    cache_key,
                    flight,
                    model: request.model().unwrap_or_default().to_string(),
                }))
            }
        }
    }

    /// Normalize, run output hooks, cache, and shape a buffered answer
    #[allow(clippy::too_many_arguments)]
    async fn handle_buffered(
        self: &Arc<Self>,
        buffered: BufferedUpstream,
        request: &CanonicalRequest,
        config: &RequestConfig,
        dialect: &Arc<dyn Dialect>,
        cache_settings: CacheSettings,
        cache_key: Option<String>,
        flight: Option<crate::core::cache::FlightGuard>,
        want_client_stream: bool,
        log: &mut LogBuilder,
    ) -> Result<AttemptOutcome> {
        let canonical = match dialect.transform_response(
            &buffered.body,
            buffered.status,
            config.strict_compliance,
            request,
        ) {
            Ok(canonical) => canonical,
            Err(err) => {
                let classified = classify(
                    dialect.tag(),
                    &json!({"error": {"message": err.to_string()}}),
                    Some(502),
                );
                return Ok(AttemptOutcome::Failure(AttemptFailure {
                    classified,
                    retry_after: None,
                }));
            }
        };

        let mut client_body = canonical.to_client_body();

        // Output hooks; denial aborts with the hook envelope
        let output_result = run_hooks(
            &config.output_hooks,
            &self.client,
            HookDirection::Output,
            client_body.clone(),
            Some(buffered.status),
        )
        .await;
        log.output_hooks(output_result.records.clone());
        if output_result.denied {
            drop(flight);
            log.annotate("output_hook_denied", json!(true));
            let body = json!({
                "error": {"message": "Request denied by hook", "type": "hook_denied_error"},
                "hook_results": {"output_hooks": output_result.to_log_value()},
            });
            return Ok(AttemptOutcome::Success(PipelineOutput::Json {
                status: 446,
                body,
            }));
        }
        client_body = output_result.body;

        // Cache store
        if let Some(guard) = flight {
            let ttl = cache_settings.ttl_secs.map(Duration::from_secs);
            self.cache
                .complete(guard, CachedEntry::new(client_body.clone(), 200, ttl))
                .await;
        } else if config.force_refresh {
            if let Some(key) = &cache_key {
                let ttl = cache_settings.ttl_secs.map(Duration::from_secs);
                self.cache
                    .insert(key, CachedEntry::new(client_body.clone(), 200, ttl))
                    .await;
            }
        }

        log.response(200, Some(client_body.clone()));

        if want_client_stream {
            let output = match chat_response_from_value(&client_body) {
                Some(chat) => stream_output_from_events(synthesize_chunks(&chat)),
                None => PipelineOutput::Json {
                    status: 200,
                    body: client_body,
                },
            };
            Ok(AttemptOutcome::Success(output))
        } else {
            Ok(AttemptOutcome::Success(PipelineOutput::Json {
                status: 200,
                body: client_body,
            }))
        }
    }

    /// Forward a native upstream stream to the client
    ///
    /// Chunks are normalized frame by frame; the accumulated response is
    /// cached and logged after completion. Client disconnect cancels the
    /// upstream read and finalizes the log with the cancellation marker.
    fn forward_stream(
        self: &Arc<Self>,
        job: StreamJob,
        mut log: LogBuilder,
        skill: Option<Skill>,
        ctx: &PipelineContext,
    ) -> PipelineOutput {
        let StreamJob {
            mut frames,
            dialect,
            config,
            cache_settings,
            cache_key,
            flight,
            model,
        } = job;
        let (tx, rx) = mpsc::channel::<bytes::Bytes>(64);
        let pipeline = self.clone();
        let strict = config.strict_compliance;
        let fallback_id = format!("chatcmpl-{}", Uuid::new_v4());
        let ctx = ctx.clone();

        tokio::spawn(async move {
            use futures::StreamExt;

            let mut state = StreamState::new(&fallback_id, &model, dialect.tag());
            let mut accumulator = ChunkAccumulator::new();
            let mut cancelled = false;

            'read: while let Some(frame) = frames.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "upstream stream failed mid-flight");
                        break;
                    }
                };
                let events = match dialect.transform_stream_chunk(&frame, &mut state, strict) {
                    Ok(events) => events,
                    Err(e) => {
                        warn!(error = %e, "stream chunk failed normalization");
                        continue;
                    }
                };
                for event in events {
                    accumulator.push_event(&event);
                    if accumulator.has_content() {
                        log.mark_first_token();
                    }
                    if tx.send(event.to_bytes()).await.is_err() {
                        cancelled = true;
                        break 'read;
                    }
                }
            }

            if cancelled {
                // Client went away: drop the upstream read, annotate, log
                drop(frames);
                log.annotate("cancelled", json!(true));
                log.response(499, None);
                let final_log = log.finish();
                pipeline.persist_log(final_log.clone()).await;
                pipeline.broadcaster.log_event("log.cancelled", &final_log);
                return;
            }

            if !state.emitted_done {
                let _ = tx.send(Event::done().to_bytes()).await;
            }

            let response = accumulator.into_response(&model, dialect.tag());
            let body = serde_json::to_value(&response).unwrap_or(Value::Null);

            // Output hooks observe the accumulated body; the stream has
            // already been delivered, so denial only annotates the log
            let output_result = run_hooks(
                &config.output_hooks,
                &pipeline.client,
                HookDirection::Output,
                body.clone(),
                Some(200),
            )
            .await;
            log.output_hooks(output_result.records.clone());
            if output_result.denied {
                log.annotate("output_hook_denied_after_stream", json!(true));
            }

            if let Some(guard) = flight {
                let ttl = cache_settings.ttl_secs.map(Duration::from_secs);
                pipeline
                    .cache
                    .complete(guard, CachedEntry::new(body.clone(), 200, ttl))
                    .await;
            } else if config.force_refresh {
                if let Some(key) = &cache_key {
                    let ttl = cache_settings.ttl_secs.map(Duration::from_secs);
                    pipeline
                        .cache
                        .insert(key, CachedEntry::new(body.clone(), 200, ttl))
                        .await;
                }
            }

            log.response(200, Some(body));
            let final_log = log.finish();
            pipeline.persist_log(final_log.clone()).await;
            pipeline.broadcaster.log_event("log.completed", &final_log);
            pipeline.spawn_evaluation(final_log, skill, &ctx);
        });

        PipelineOutput::Sse(ReceiverStream::new(rx))
    }

    /// Replay a cached entry, synthesizing chunks for stream clients
    fn replay_cached(&self, entry: CachedEntry, want_client_stream: bool) -> PipelineOutput {
        if want_client_stream {
            if let Some(chat) = chat_response_from_value(&entry.body) {
                return stream_output_from_events(synthesize_chunks(&chat));
            }
        }
        PipelineOutput::Json {
            status: entry.status,
            body: entry.body,
        }
    }

    /// Finalize a successful request: log write, broadcast, evaluation
    async fn finish_success(
        self: &Arc<Self>,
        mut log: LogBuilder,
        output: PipelineOutput,
        skill: Option<Skill>,
        ctx: &PipelineContext,
    ) -> Result<PipelineOutput> {
        match output {
            PipelineOutput::Json { status, body } => {
                log.response(status, Some(body.clone()));
                let final_log = log.finish();
                self.persist_log(final_log.clone()).await;
                self.broadcaster.log_event("log.completed", &final_log);
                if status == 200 {
                    self.spawn_evaluation(final_log, skill, ctx);
                }
                Ok(PipelineOutput::Json { status, body })
            }
            // Synthesized and replayed streams: the response body was
            // already recorded on the log before synthesis
            stream => {
                let final_log = log.finish();
                self.persist_log(final_log.clone()).await;
                self.broadcaster.log_event("log.completed", &final_log);
                if final_log.status == 200 {
                    self.spawn_evaluation(final_log, skill, ctx);
                }
                Ok(stream)
            }
        }
    }

    async fn deny(
        self: &Arc<Self>,
        mut log: LogBuilder,
        result: &HookRunResult,
        output_hooks: Option<&HookRunResult>,
        reason: &str,
    ) -> Result<PipelineOutput> {
        info!(reason, "request denied by hook");
        let hook_results = json!({
            "input_hooks": result.to_log_value(),
            "output_hooks": output_hooks.map(HookRunResult::to_log_value),
        });
        let body = json!({
            "error": {"message": "Request denied by hook", "type": "hook_denied_error"},
            "hook_results": hook_results,
        });
        log.response(446, Some(body.clone()));
        let final_log = log.finish();
        self.persist_log(final_log.clone()).await;
        self.broadcaster.log_event("log.denied", &final_log);
        Ok(PipelineOutput::Json { status: 446, body })
    }

    /// Resolve agent and skill names, auto-creating only the reserved
    /// internal set
    async fn resolve_binding(
        self: &Arc<Self>,
        config: &RequestConfig,
        log: &mut LogBuilder,
    ) -> Result<Option<Skill>> {
        let Some(agent_name) = &config.agent else {
            return Ok(None);
        };

        let agent = match self.storage.get_agent_by_name(agent_name).await {
            Ok(agent) => agent,
            Err(StorageError::NotFound(_)) if agent_name == RESERVED_AGENT => {
                self.storage
                    .create_agent(crate::core::types::Agent::new(RESERVED_AGENT))
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        let skill = match &config.skill {
            Some(skill_name) => {
                match self.storage.get_skill_by_name(agent.id, skill_name).await {
                    Ok(skill) => Some(skill),
                    Err(StorageError::NotFound(_))
                        if RESERVED_SKILLS.contains(&skill_name.as_str()) =>
                    {
                        Some(
                            self.storage
                                .create_skill(Skill::new(agent.id, skill_name.clone()))
                                .await?,
                        )
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => None,
        };

        log.binding(Some(agent.id), skill.as_ref().map(|s| s.id));
        Ok(skill)
    }

    /// Fill in stored credentials referenced by id
    async fn resolve_credentials(&self, mut target: Target) -> Result<Target> {
        if target.api_key.is_none() {
            if let Some(key_id) = &target.api_key_id {
                let id = Uuid::parse_str(key_id).map_err(|_| {
                    GatewayError::bad_request(format!("api_key_id {key_id} is not a UUID"))
                })?;
                let stored = self.storage.get_ai_provider_api_key_by_id(id).await?;
                target.api_key = Some(stored.api_key);
                if target.custom_host.is_none() {
                    target.custom_host = stored.custom_host;
                }
            }
        }
        Ok(target)
    }

    /// Embed the user-visible portion of the request; failure degrades
    async fn compute_embedding(&self, request: &CanonicalRequest) -> Option<Vec<f32>> {
        let messages = crate::core::types::extract_messages(request).ok()?;
        let text = user_visible_text(&messages);
        if text.is_empty() {
            return None;
        }
        match self.embeddings.embed(&text).await {
            Ok(embedding) if !embedding.is_empty() => Some(embedding),
            Ok(_) => None,
            Err(e) => {
                debug!(error = %e, "embedding failed; continuing unoptimized");
                None
            }
        }
    }

    /// Best-effort log persistence; never fatal to the request
    async fn persist_log(&self, log: crate::core::types::RequestLog) {
        let result = match self.storage.update_log(log.clone()).await {
            Err(StorageError::NotFound(_)) => self.storage.create_log(log).await,
            other => other,
        };
        if let Err(e) = result {
            error!(error = %e, "failed to persist request log");
        }
    }

    /// Score the log asynchronously and feed the reward to the arm
    fn spawn_evaluation(
        self: &Arc<Self>,
        log: crate::core::types::RequestLog,
        skill: Option<Skill>,
        ctx: &PipelineContext,
    ) {
        let Some(skill) = skill else { return };
        if ctx.judge_depth > 0 || !skill.optimize || skill.name.starts_with("internal:") {
            return;
        }
        let methods = if skill.evaluation_methods.is_empty() {
            vec!["latency".to_string()]
        } else {
            skill.evaluation_methods.clone()
        };

        let pipeline = self.clone();
        let depth = ctx.judge_depth;
        tokio::spawn(async move {
            let judge = PipelineJudge {
                pipeline: pipeline.clone(),
                depth: depth + 1,
            };
            let params = EvaluationParams::default();
            let records =
                evaluate_log_with_methods(&methods, &params, &log, &judge).await;
            if records.is_empty() {
                return;
            }
            let avg = average_score(&records);

            let mut updated = log.clone();
            updated.evaluations = records;
            updated.avg_eval_score = avg;
            pipeline.persist_log(updated.clone()).await;
            pipeline.broadcaster.log_event("log.evaluated", &updated);

            if let (Some(arm_id), Some(avg)) = (log.arm_id, avg) {
                if let Err(e) = pipeline.optimizer.record_reward(arm_id, avg).await {
                    warn!(error = %e, %arm_id, "failed to record arm reward");
                }
            }
        });
    }
}

/// Reentrant judge path through the gateway's own pipeline
pub struct PipelineJudge {
    pub pipeline: Arc<RequestPipeline>,
    pub depth: usize,
}

#[async_trait]
impl JudgeClient for PipelineJudge {
    async fn complete(&self, judge_model: &str, system: &str, user: &str) -> Result<String> {
        if self.depth >= MAX_JUDGE_DEPTH {
            return Err(GatewayError::Forbidden(
                "judge recursion depth exceeded".into(),
            ));
        }
        let target = self.pipeline.judge_target.clone().ok_or_else(|| {
            GatewayError::Unavailable("no judge target configured".into())
        })?;

        let request = CanonicalRequest::ChatCompletion(ChatCompletionRequest {
            model: judge_model.to_string(),
            messages: vec![
                ChatMessage::text(MessageRole::System, system),
                ChatMessage::text(MessageRole::User, user),
            ],
            temperature: Some(0.0),
            top_p: None,
            max_tokens: None,
            n: None,
            stream: Some(false),
            stop: None,
            presence_penalty: None,
            frequency_penalty: None,
            seed: None,
            reasoning_effort: None,
            tools: None,
            tool_choice: None,
            response_format: None,
            user: None,
            additional_params: Map::new(),
        });

        let config = RequestConfig {
            agent: Some(RESERVED_AGENT.to_string()),
            skill: Some("internal:judge".to_string()),
            targets: vec![target],
            ..Default::default()
        };
        let mut ctx = PipelineContext::new("POST");
        ctx.judge_depth = self.depth;

        match self.pipeline.execute(request, config, ctx).await {
            PipelineOutput::Json { status: 200, body } => body
                .pointer("/choices/0/message/content")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    GatewayError::upstream("judge", "judge response carried no content")
                }),
            PipelineOutput::Json { status, body } => Err(GatewayError::upstream(
                "judge",
                format!("judge call failed with status {status}: {body}"),
            )),
            PipelineOutput::Sse(_) => Err(GatewayError::Internal(
                "judge call unexpectedly streamed".into(),
            )),
        }
    }
}

/// Apply a resolved configuration onto a canonical request
pub fn apply_configuration(request: &mut CanonicalRequest, configuration: &TargetConfiguration) {
    if let Some(model) = &configuration.model {
        request.set_model(model);
    }

    match request {
        CanonicalRequest::ChatCompletion(body) => {
            if let Some(prompt) = &configuration.system_prompt {
                set_system_prompt(&mut body.messages, prompt);
            }
            if configuration.temperature.is_some() {
                body.temperature = configuration.temperature;
            }
            if configuration.top_p.is_some() {
                body.top_p = configuration.top_p;
            }
            if configuration.max_tokens.is_some() {
                body.max_tokens = configuration.max_tokens;
            }
            if configuration.frequency_penalty.is_some() {
                body.frequency_penalty = configuration.frequency_penalty;
            }
            if configuration.presence_penalty.is_some() {
                body.presence_penalty = configuration.presence_penalty;
            }
            if configuration.stop.is_some() {
                body.stop = configuration.stop.clone();
            }
            if configuration.seed.is_some() {
                body.seed = configuration.seed;
            }
            if configuration.reasoning_effort.is_some() {
                body.reasoning_effort = configuration.reasoning_effort;
            }
            for (key, value) in &configuration.additional_params {
                body.additional_params.insert(key.clone(), value.clone());
            }
        }
        CanonicalRequest::Completion(body) => {
            if configuration.temperature.is_some() {
                body.temperature = configuration.temperature;
            }
            if configuration.top_p.is_some() {
                body.top_p = configuration.top_p;
            }
            if configuration.max_tokens.is_some() {
                body.max_tokens = configuration.max_tokens;
            }
            if configuration.frequency_penalty.is_some() {
                body.frequency_penalty = configuration.frequency_penalty;
            }
            if configuration.presence_penalty.is_some() {
                body.presence_penalty = configuration.presence_penalty;
            }
            if configuration.stop.is_some() {
                body.stop = configuration.stop.clone();
            }
            if configuration.seed.is_some() {
                body.seed = configuration.seed;
            }
            for (key, value) in &configuration.additional_params {
                body.additional_params.insert(key.clone(), value.clone());
            }
        }
        CanonicalRequest::ModelResponse(body) => {
            if let Some(prompt) = &configuration.system_prompt {
                body.instructions = Some(prompt.clone());
            }
            if configuration.temperature.is_some() {
                body.temperature = configuration.temperature;
            }
            if configuration.top_p.is_some() {
                body.top_p = configuration.top_p;
            }
            if configuration.max_tokens.is_some() {
                body.max_output_tokens = configuration.max_tokens;
            }
            if configuration.reasoning_effort.is_some() {
                body.reasoning_effort = configuration.reasoning_effort;
            }
            for (key, value) in &configuration.additional_params {
                body.additional_params.insert(key.clone(), value.clone());
            }
        }
        _ => {}
    }
}

/// Replace the leading system message or insert one
fn set_system_prompt(messages: &mut Vec<ChatMessage>, prompt: &str) {
    match messages.first_mut() {
        Some(first) if first.role == MessageRole::System => {
            first.content = Some(MessageContent::Text(prompt.to_string()));
        }
        _ => {
            messages.insert(0, ChatMessage::text(MessageRole::System, prompt));
        }
    }
}

fn semantic_cache_configured(config: &RequestConfig) -> bool {
    config.cache.mode == crate::core::types::CacheMode::Semantic
        || config.targets.iter().any(|target| {
            target
                .cache
                .as_ref()
                .map(|cache| cache.mode == crate::core::types::CacheMode::Semantic)
                .unwrap_or(false)
        })
}

/// The text the optimizer and semantic cache see
fn user_visible_text(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .filter(|message| {
            !matches!(message.role, MessageRole::System | MessageRole::Developer)
        })
        .map(ChatMessage::content_text)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn adjustments_value(adjustments: &[CapabilityAdjustment]) -> Value {
    Value::Array(
        adjustments
            .iter()
            .map(|adjustment| match adjustment {
                CapabilityAdjustment::Dropped(name) => json!({"dropped": name}),
                CapabilityAdjustment::Renamed { from, to } => {
                    json!({"renamed": {"from": from, "to": to}})
                }
            })
            .collect(),
    )
}

fn log_embedding(log: &LogBuilder) -> Option<Vec<f32>> {
    log.snapshot().embedding
}

/// Collect an SSE output from pre-built events
fn stream_output_from_events(events: Vec<Event>) -> PipelineOutput {
    let (tx, rx) = mpsc::channel::<bytes::Bytes>(events.len().max(1));
    tokio::spawn(async move {
        for event in events {
            if tx.send(event.to_bytes()).await.is_err() {
                break;
            }
        }
    });
    PipelineOutput::Sse(ReceiverStream::new(rx))
}

/// Shape an error into the outward JSON body
fn error_output(err: &GatewayError) -> PipelineOutput {
    let status = err.to_http_status();
    let body = match err {
        GatewayError::HookDenied { hook_results } => json!({
            "error": {"message": "Request denied by hook", "type": "hook_denied_error"},
            "hook_results": hook_results,
        }),
        GatewayError::InvalidRequest { message, param, .. } => json!({
            "error": {"message": message, "type": err.error_type(), "param": param},
        }),
        other => json!({
            "error": {"message": other.to_string(), "type": other.error_type()},
        }),
    };
    PipelineOutput::Json { status, body }
}
