pub mod aggregate_writer;
pub mod allocation;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod incremental;
pub mod orchestrator;
pub mod partition;
pub mod poster;
pub mod producer;
pub mod retry;
pub mod rng;
pub mod store;
pub mod types;
