//! Model Client implementations for Flavia.
//!
//! All providers implement the `flavia_core::Provider` trait. The binary
//! builds one from configuration at startup and hands it to the agent loop.

pub mod azure_openai;

pub use azure_openai::AzureOpenAiProvider;
