//! Observability: log assembly and the control-plane event stream
//!
//! The log builder accumulates everything the pipeline learns about one
//! request and produces the final record. The broadcaster fans events
//! out to SSE subscribers; slow subscribers are dropped rather than
//! blocking broadcasters.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;
use uuid::Uuid;

use crate::core::types::{
    CacheStatus, Event, EvaluationRecord, FunctionName, HookRecord, RequestLog,
};

/// Progressive builder for one request's log record
pub struct LogBuilder {
    log: RequestLog,
}

impl LogBuilder {
    pub fn new(function: FunctionName, method: &str, request_body: Value) -> Self {
        let now = Utc::now();
        Self {
            log: RequestLog {
                id: Uuid::new_v4(),
                trace_id: None,
                span_id: None,
                agent_id: None,
                skill_id: None,
                cluster_id: None,
                arm_id: None,
                provider: None,
                model: None,
                function_name: function.as_str().to_string(),
                method: method.to_string(),
                request_body,
                response_body: None,
                status: 0,
                start_time: now,
                first_token_time: None,
                end_time: now,
                duration_ms: 0,
                cache_status: CacheStatus::NotApplicable,
                embedding: None,
                input_hooks: Vec::new(),
                output_hooks: Vec::new(),
                avg_eval_score: None,
                evaluations: Vec::new(),
                metadata: Map::new(),
            },
        }
    }

    pub fn id(&self) -> Uuid {
        self.log.id
    }

    pub fn trace(&mut self, trace_id: Option<String>, span_id: Option<String>) -> &mut Self {
        self.log.trace_id = trace_id;
        self.log.span_id = span_id;
        self
    }

    pub fn binding(&mut self, agent_id: Option<Uuid>, skill_id: Option<Uuid>) -> &mut Self {
        self.log.agent_id = agent_id;
        self.log.skill_id = skill_id;
        self
    }

    pub fn arm(&mut self, cluster_id: Uuid, arm_id: Uuid) -> &mut Self {
        self.log.cluster_id = Some(cluster_id);
        self.log.arm_id = Some(arm_id);
        self
    }

    pub fn target(&mut self, provider: &str, model: Option<&str>) -> &mut Self {
        self.log.provider = Some(provider.to_string());
        self.log.model = model.map(str::to_string);
        self
    }

    pub fn embedding(&mut self, embedding: Option<Vec<f32>>) -> &mut Self {
        self.log.embedding = embedding;
        self
    }

    pub fn cache_status(&mut self, status: CacheStatus) -> &mut Self {
        self.log.cache_status = status;
        self
    }

    pub fn input_hooks(&mut self, records: Vec<HookRecord>) -> &mut Self {
        self.log.input_hooks = records;
        self
    }

    pub fn output_hooks(&mut self, records: Vec<HookRecord>) -> &mut Self {
        // Retries reset output hook results; the last attempt's stand
        self.log.output_hooks = records;
        self
    }

    pub fn mark_first_token(&mut self) -> &mut Self {
        if self.log.first_token_time.is_none() {
            self.log.first_token_time = Some(Utc::now());
        }
        self
    }

    pub fn first_token_at(&mut self, at: DateTime<Utc>) -> &mut Self {
        self.log.first_token_time = Some(at);
        self
    }

    pub fn annotate(&mut self, key: &str, value: Value) -> &mut Self {
        self.log.metadata.insert(key.to_string(), value);
        self
    }

    pub fn response(&mut self, status: u16, body: Option<Value>) -> &mut Self {
        self.log.status = status;
        self.log.response_body = body;
        self
    }

    pub fn evaluations(&mut self, records: Vec<EvaluationRecord>, avg: Option<f64>) -> &mut Self {
        self.log.evaluations = records;
        self.log.avg_eval_score = avg;
        self
    }

    /// Current state of the record, for the entry-time write
    pub fn snapshot(&self) -> RequestLog {
        self.log.clone()
    }

    /// Finalize timings and take the record
    pub fn finish(mut self) -> RequestLog {
        self.log.end_time = Utc::now();
        self.log.duration_ms = (self.log.end_time - self.log.start_time)
            .num_milliseconds()
            .max(0) as u64;
        self.log
    }
}

/// Control-plane SSE hub with per-subscriber fan-out channels
pub struct EventBroadcaster {
    subscribers: DashMap<Uuid, mpsc::Sender<Event>>,
    buffer: usize,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            buffer,
        }
    }

    /// Register a subscriber; the stream ends when the subscriber is
    /// dropped for falling behind
    pub fn subscribe(&self) -> (Uuid, ReceiverStream<Event>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        (id, ReceiverStream::new(rx))
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.subscribers.remove(&id);
    }

    /// Fan an event out; slow or closed subscribers are dropped
    pub fn broadcast(&self, event: Event) {
        let mut dropped = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().try_send(event.clone()).is_err() {
                dropped.push(*entry.key());
            }
        }
        for id in dropped {
            debug!(subscriber = %id, "dropping slow event subscriber");
            self.subscribers.remove(&id);
        }
    }

    /// Broadcast a log lifecycle event
    pub fn log_event(&self, kind: &str, log: &RequestLog) {
        let payload = json!({
            "type": kind,
            "log_id": log.id,
            "function_name": log.function_name,
            "provider": log.provider,
            "model": log.model,
            "status": log.status,
            "duration_ms": log.duration_ms,
            "cache_status": log.cache_status,
        });
        self.broadcast(Event::named("message", payload.to_string()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
