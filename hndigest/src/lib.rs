// Library interface for hndigest modules
// This allows tests and the helper binaries to import modules

pub mod clock;
pub mod commands;
pub mod delivery;
pub mod digest;
pub mod error;
pub mod events;
pub mod feedback;
pub mod ingestion;
pub mod llm;
pub mod model;
pub mod processing;
pub mod ranking;
pub mod recency;
pub mod scheduler;
pub mod scraping;
pub mod settings;
pub mod shutdown;
pub mod storage;
pub mod telegram;
