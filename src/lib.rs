// Copyright 2020 Joyent, Inc.

//! A resilience layer for sharded key-value caches
//!
//! Shardcache sits in front of a horizontally-sharded key-value store and
//! gives callers plain cache semantics without making them track backend
//! topology. It solves two problems that tend to hide correctness bugs:
//! keeping a pool of sharded clients consistent with a dynamically-changing
//! view of which shard endpoints are reachable, and keeping growable sorted
//! sets near a configured size through asynchronous background trimming.
//!
//! ## Endpoint health
//!
//! Every known endpoint lives in a [`ShardDirectory`](directory::ShardDirectory),
//! classified as either active or broken. A
//! [`HealthChecker`](checker::HealthChecker) sweeps the directory on a
//! fixed period, probing broken endpoints for recovery and active
//! endpoints for failure, and moves endpoints between the two
//! classifications atomically. The timer thread behind the sweeps is owned
//! by a reference-counted [`SchedulerHandle`](scheduler::SchedulerHandle)
//! that can be shared by every pool in the process: it starts on the first
//! registration and stops with the last one.
//!
//! ## Pooled sharded clients
//!
//! A [`ShardedClient`](sharded::ShardedClient) routes keys over a
//! consistent-hash ring built from a snapshot of the active endpoint list.
//! The [`ShardedClientFactory`](factory::ShardedClientFactory) implements
//! the classic pool factory contract around that snapshot: a pooled client
//! is valid exactly as long as its baked-in endpoint set equals the
//! directory's live active set, and a stale client is destroyed and
//! replaced the next time it is claimed from the
//! [`CachePool`](pool::CachePool). Claiming never blocks; the pool creates
//! new clients up to its capacity and fails fast beyond it.
//!
//! Connections to the backends are built by a caller-supplied function, in
//! the same spirit as a connection pool's `create_connection` hook:
//!
//! ```rust,ignore
//! FnMut(&EndpointDescriptor) -> C
//! where C: NodeClient
//! ```
//!
//! The [`NodeClient`](connection::NodeClient) trait is the boundary to the
//! underlying wire-protocol client; this crate does not implement the wire
//! protocol itself.
//!
//! ## Capped collections
//!
//! [`ShardedCacheService`](service::ShardedCacheService) surfaces the cache
//! operation set. Sorted-set adds are capped: each add performs the insert
//! and reads back the resulting cardinality in one round-trip, and once the
//! set is oversized past a slack threshold a
//! [`ShrinkJob`](capped::ShrinkJob) is handed to the
//! [`ShrinkWorker`](capped::ShrinkWorker), a bounded background pool that
//! trims the lowest-scored members. Submission never blocks the caller and
//! a saturated worker drops jobs; the next oversized add schedules a fresh
//! one.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! use shardcache::endpoint::parse_endpoint_list;
//! use shardcache::service::{KeyValueStore, ServiceOptions, ShardedCacheService};
//!
//! let endpoints = parse_endpoint_list(
//!     "10.0.0.1:6379:shard-a, 10.0.0.2:6379:shard-b",
//!     Duration::from_millis(2000),
//! )?;
//!
//! let service = ShardedCacheService::new(
//!     ServiceOptions::default(),
//!     endpoints,
//!     MyNodeClient::new,
//! )?;
//!
//! service.set("greeting", "hello")?;
//! service.zadd_capped("events", 17.0, "event-17", 100)?;
//! ```

pub mod capped;
pub mod checker;
pub mod connection;
pub mod directory;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod migration;
pub mod pool;
pub mod probe;
pub mod scheduler;
pub mod service;
pub mod sharded;

#[cfg(test)]
pub(crate) mod test_support;
