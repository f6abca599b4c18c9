//! relay-providers: chat stream implementations for relay
//!
//! This crate provides implementations of the `ChatStream` trait for
//! OpenAI-compatible streaming APIs.

pub mod openai;
mod think;

pub use openai::OpenAICompatStream;
pub use think::ThinkTagSplitter;
