//! Persistence for the job pipeline.
//!
//! This crate provides:
//! - The queue position store: fixed named lists of job IDs for progress reporting
//! - The job record store: per-job documents written stage by stage
//! - Redis-backed implementations using atomic server-side scripts
//! - In-memory implementations with identical semantics

pub mod client;
pub mod error;
pub mod memory;
pub mod queue_list;
pub mod scene_repo;

pub use client::{RedisStore, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryJobRecordStore, MemoryQueueListStore};
pub use queue_list::{QueueList, QueueListStore, RedisQueueListStore};
pub use scene_repo::{JobRecordStore, RedisJobRecordStore};
