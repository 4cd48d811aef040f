//! Message broker for the two-stage pipeline.
//!
//! This crate provides:
//! - The fixed broker topology (`sfm-in`, `nerf-in`, `sfm-out`, `nerf-out`)
//! - A Redis Streams broker with manual ack, requeue and dead-lettering
//! - Bounded-window connect and `ensure_connection` bootstrap
//! - Typed wire messages for each stage
//! - An in-memory broker for tests

pub mod broker;
pub mod connection;
pub mod error;
pub mod memory;
pub mod message;
pub mod redis_broker;

pub use broker::{Broker, BrokerConfig, BrokerQueue, Consumer, Delivery};
pub use connection::BrokerConnection;
pub use error::{QueueError, QueueResult};
pub use memory::{DeadLetter, MemoryBroker};
pub use message::{NerfJobMessage, NerfResultMessage, SfmJobMessage, SfmResultMessage};
pub use redis_broker::RedisBroker;
