//! Background job execution for jobkit.
//!
//! This crate moves work items from a pluggable data source into a pluggable
//! processing function:
//!
//! - **Broker**: Bounded producer/consumer pipeline for one job type
//! - **Options**: Pool sizes and queue capacity, normalized at construction
//! - **Job capability**: The [`JobServer`] trait a server hosts uniformly
//! - **Server**: Starts worker pools and shuts them down in order
//! - **Transport**: Host-facing service and endpoint contract
//! - **Store**: Namespaced Redis client for sources and sinks

pub mod broker;
pub mod job;
pub mod options;
pub mod server;
pub mod store;
pub mod transport;

pub use broker::{Broker, BrokerStats};
pub use job::{Batch, BrokerState, JobContext, JobServer, WorkerRole};
pub use jobkit_common::BoxError;
pub use options::{BrokerOptions, ResolvedOptions};
pub use server::Server;
pub use store::{KvStore, StoreOptions};
pub use transport::{Endpointer, Transport};
