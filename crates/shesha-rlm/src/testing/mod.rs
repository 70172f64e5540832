//! Testing utilities for shesha-rlm.
//!
//! Mock implementations for exercising the engine without a real LLM
//! provider or sandbox interpreter.
//!
//! - [`mock_llm_client`]: queueable, request-capturing [`crate::llm_client::LLMClient`]

pub mod mock_llm_client;

pub use mock_llm_client::MockLLMClient;
