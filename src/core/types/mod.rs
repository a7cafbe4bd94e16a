//! Canonical wire model and domain types
//!
//! Everything the pipeline passes between components lives here: the
//! canonical request/response/chunk shapes, the per-request control
//! envelope, and the optimization domain model.

pub mod domain;
pub mod envelope;
pub mod message;
pub mod requests;
pub mod responses;
pub mod streaming;

pub use domain::{
    Agent, Arm, ArmParams, ArmStats, CacheStatus, Cluster, Dataset, EvaluationRecord,
    EvaluationRun, EvaluationRunStatus, HookRecord, LogOutput, ModelEntry, ProviderApiKey,
    RequestLog, Skill,
};
pub use envelope::{
    CacheMode, CacheSettings, ConditionalRoute, HookSpec, RequestConfig, RetryPolicy, Strategy,
    StrategyMode, Target, TargetConfiguration, TargetOverrides,
};
pub use message::{
    ChatMessage, ContentPart, FunctionCall, ImageUrl, MessageContent, MessageRole, Tool, ToolCall,
    ToolFunction,
};
pub use requests::{
    CanonicalRequest, ChatCompletionRequest, CompletionPrompt, CompletionRequest,
    EmbeddingRequest, FileUploadRequest, FunctionName, ImageGenerationRequest,
    ModelResponseRequest, ModerationRequest, ProxyRequest, ReasoningEffort, ResponseInput,
    ResponseInputItem, SpeechRequest, TranscriptionRequest, TranslationRequest, extract_messages,
};
pub use responses::{
    CanonicalResponse, ChatChoice, ChatCompletionResponse, CompletionChoice, CompletionResponse,
    EmbeddingData, EmbeddingResponse, ErrorBody, ErrorDetails, ErrorEnvelope, ImageData,
    ImageGenerationResponse, ModerationResponse, PassthroughResponse, Usage,
};
pub use streaming::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, Event, FunctionCallDelta, ToolCallDelta,
};
