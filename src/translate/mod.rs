//! API translation between client formats (Anthropic Messages, Responses-style)
//! and the `OpenAI` Chat Completions format spoken by the upstream.
//!
//! The core of the gateway: converts requests, responses, and streaming events
//! between the formats. All translation functions are pure (no I/O).

pub mod anthropic_types;
pub mod common;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod responses_types;
pub mod streaming;
