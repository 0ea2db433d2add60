// Copyright 2020 Joyent, Inc.

use std::fmt::Display;

use thiserror::Error;

/// The error type for cache operations.
///
/// Every fallible operation in this crate reports one of these kinds rather
/// than falling back to a silent default value. `Config` is only produced
/// while parsing startup configuration and indicates a deployment error that
/// cannot be safely defaulted.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed startup configuration, e.g. an endpoint list that does not
    /// meet the `host:port:name[:weight]` format.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The caller passed an argument the backend would reject.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The operation reached the backend but the key does not exist.
    #[error("key not found")]
    NotFound,
    /// A backend command failed at the transport or protocol level.
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    /// The cache service has been switched off.
    #[error("cache service is disabled")]
    Disabled,
    /// No idle client was available and the pool is at its configured
    /// capacity. Claiming is non-blocking so this is returned immediately.
    #[error("connection pool exhausted")]
    PoolExhausted,
    /// The pool has been stopped and no longer hands out clients.
    #[error("connection pool is stopped")]
    PoolStopped,
}

impl Error {
    /// Wrap a node-client error as `Unreachable`, keeping only its rendered
    /// message. The concrete client error type is not part of this crate's
    /// API surface.
    pub(crate) fn unreachable<E: Display>(err: E) -> Error {
        Error::Unreachable(err.to_string())
    }
}
