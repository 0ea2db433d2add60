// Copyright 2020 Joyent, Inc.

use std::error;

/// The lifecycle half of a backend connection.
///
/// The `Connection` trait defines the interface that must be implemented in
/// order to participate in the sharded connection pool. A connection need
/// not be limited to a TCP socket, but could be any logical notion of a
/// connection to one endpoint that implements this trait.
pub trait Connection: Send + Sized + 'static {
    /// The error type returned by the connection functions. This is an
    /// associated type for the trait meaning each specific implementation
    /// may choose the appropriate concrete error type. The only constraint
    /// applied is that the selected error type must implement the standard
    /// library [Error](https://doc.rust-lang.org/std/error/trait.Error.html)
    /// trait.
    type Error: error::Error + Send;

    /// Attempt to establish the connection to the endpoint.
    fn connect(&mut self) -> Result<(), Self::Error>;

    /// Close the local side of the connection to the endpoint.
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// The command surface of a backend connection.
///
/// `NodeClient` is the contract this crate consumes from an underlying
/// wire-protocol client: per-endpoint liveness, graceful disconnect, and the
/// key-value command set the cache service passes through. The wire protocol
/// itself is out of scope here.
///
/// `ping` is used by the health probe and should attempt to (re)establish
/// the transport as needed; a transport-level failure is how a dead
/// endpoint is detected.
pub trait NodeClient: Connection {
    /// Send the liveness command and return the raw reply.
    fn ping(&mut self) -> Result<String, Self::Error>;

    /// Ask the server to close the connection. Called before `close` when a
    /// pooled client is destroyed.
    fn quit(&mut self) -> Result<(), Self::Error>;

    // -- keys --

    /// Set a time-to-live on a key. Returns false when the key does not
    /// exist.
    fn expire(&mut self, key: &str, seconds: u64)
        -> Result<bool, Self::Error>;

    /// Remaining time-to-live of a key in seconds; negative replies carry
    /// the backend's "no key" / "no expiry" markers through unchanged.
    fn ttl(&mut self, key: &str) -> Result<i64, Self::Error>;

    /// Delete a key, returning the number of keys removed.
    fn del(&mut self, key: &str) -> Result<u64, Self::Error>;

    // -- strings --

    fn get(&mut self, key: &str) -> Result<Option<String>, Self::Error>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Set a value together with a time-to-live in one command.
    fn setex(
        &mut self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<(), Self::Error>;

    /// Append to a string value, returning the resulting length.
    fn append(&mut self, key: &str, value: &str) -> Result<u64, Self::Error>;

    // -- lists --

    /// Push values onto the head of a list, returning the resulting length.
    fn lpush(
        &mut self,
        key: &str,
        values: &[&str],
    ) -> Result<u64, Self::Error>;

    /// Pop the tail element of a list.
    fn rpop(&mut self, key: &str) -> Result<Option<String>, Self::Error>;

    fn lrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Self::Error>;

    fn ltrim(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<(), Self::Error>;

    fn llen(&mut self, key: &str) -> Result<u64, Self::Error>;

    // -- sorted sets --

    /// Add scored members and read back the resulting cardinality in the
    /// same batched round-trip. Returns `(new_members, cardinality)` where
    /// `new_members` counts only genuinely new members, not score updates.
    ///
    /// Both results coming from one round-trip is what lets the capped
    /// collection policy make its shrink decision against a consistent
    /// snapshot.
    fn zadd_count(
        &mut self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<(u64, u64), Self::Error>;

    fn zcard(&mut self, key: &str) -> Result<u64, Self::Error>;

    fn zrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Self::Error>;

    fn zrevrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Self::Error>;

    /// Members with scores in `[min, max]`, ascending, with an optional
    /// `(offset, count)` window.
    fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Self::Error>;

    /// Members with scores in `[min, max]`, descending, with an optional
    /// `(offset, count)` window.
    fn zrevrange_by_score(
        &mut self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Self::Error>;

    /// Remove members by rank range, returning the number removed.
    fn zremrange_by_rank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, Self::Error>;

    /// Remove members by score range, returning the number removed.
    fn zremrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, Self::Error>;
}
