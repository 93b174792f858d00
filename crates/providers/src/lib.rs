//! Provider adapters.
//!
//! The session core only ever sees the [`LlmProvider`] trait and the
//! provider-agnostic stream events; the OpenAI-compatible adapter here
//! covers every endpoint speaking that wire format.

pub mod openai_compat;
pub mod registry;
pub mod sse;
pub mod traits;

pub use registry::ProviderRegistry;
pub use traits::{
    parse_model, LlmProvider, ModelInfo, ModelRef, ProviderMessage, ProviderToolCall,
    StreamRequest,
};
