//! Core functionality for the Veritas identity SDK.
//!
//! This crate provides the error codes, configuration, logging setup and
//! storage abstractions shared by the crypto and identity crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{LoggingConfig, RelayConfig, SdkConfig};
pub use error::{CoreError, ErrorCode, Result};
pub use storage::{KeyValueStore, MemoryStore, ScopedStore, StorageField};
