//! Provider clients and file-backed adapters for the `funnel` crate.
//!
//! - [`providers`]: YandexGPT and OpenAI-compatible completion clients
//! - [`embeddings`]: OpenAI-compatible embeddings plus a local scenario index
//! - [`catalog_file`]: JSON catalog file
//! - [`telemetry`]: JSONL cost log
//! - [`conversations`]: JSONL conversation log
//! - [`config`]: `DISPATCH_*` environment configuration

pub mod catalog_file;
pub mod config;
pub mod conversations;
pub mod embeddings;
pub mod providers;
pub mod telemetry;

pub use catalog_file::FileCatalog;
pub use config::DispatchConfig;
pub use conversations::JsonlConversationStore;
pub use embeddings::HttpEmbeddingProvider;
pub use providers::{OpenAiChatProvider, YandexGptProvider};
pub use telemetry::JsonlCostStore;
