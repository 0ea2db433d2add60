// Copyright 2020 Joyent, Inc.

//! Key-sharded client over a fixed endpoint snapshot.
//!
//! A [`ShardedClient`] owns one connection per endpoint and routes each key
//! to an endpoint through a consistent-hash ring built when the client is
//! created. The endpoint list is baked in at creation time; the pool
//! factory compares it against the live directory to decide when a client
//! has gone stale.

use std::collections::HashSet;
use std::sync::Arc;

use sha1::Sha1;
use slog::{warn, Logger};

use crate::connection::NodeClient;
use crate::endpoint::EndpointDescriptor;

// Ring points generated per endpoint. More points flatten the key
// distribution across shards.
const POINTS_PER_ENDPOINT: usize = 160;

/// Strategy for hashing ring points and keys onto the ring.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, input: &[u8]) -> u64;
}

/// The default hashing strategy: the first eight bytes of a SHA-1 digest,
/// little-endian.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sha1Hasher;

impl KeyHasher for Sha1Hasher {
    fn hash(&self, input: &[u8]) -> u64 {
        let mut sha1 = Sha1::new();
        sha1.update(input);
        let digest = sha1.digest().bytes();
        u64::from(digest[0])
            | u64::from(digest[1]) << 8
            | u64::from(digest[2]) << 16
            | u64::from(digest[3]) << 24
            | u64::from(digest[4]) << 32
            | u64::from(digest[5]) << 40
            | u64::from(digest[6]) << 48
            | u64::from(digest[7]) << 56
    }
}

/// Optional key-partition markers. When a key contains a tagged section,
/// only the tag participates in shard selection, letting callers pin
/// related keys to one shard.
#[derive(Clone, Debug)]
pub struct KeyTagPattern {
    open: String,
    close: String,
}

impl KeyTagPattern {
    pub fn new(open: &str, close: &str) -> Self {
        KeyTagPattern {
            open: open.to_string(),
            close: close.to_string(),
        }
    }

    /// The conventional `{tag}` pattern.
    pub fn braces() -> Self {
        KeyTagPattern::new("{", "}")
    }

    fn extract<'a>(&self, key: &'a str) -> &'a str {
        if let Some(start) = key.find(&self.open) {
            let tag_start = start + self.open.len();
            if let Some(len) = key[tag_start..].find(&self.close) {
                if len > 0 {
                    return &key[tag_start..tag_start + len];
                }
            }
        }
        key
    }
}

// The consistent-hash ring: sorted points, each naming an endpoint index.
struct HashRing {
    points: Vec<(u64, usize)>,
}

impl HashRing {
    fn new(
        endpoints: &[EndpointDescriptor],
        hasher: &dyn KeyHasher,
    ) -> Self {
        let mut points =
            Vec::with_capacity(endpoints.len() * POINTS_PER_ENDPOINT);
        for (idx, endpoint) in endpoints.iter().enumerate() {
            for n in 0..POINTS_PER_ENDPOINT {
                let vnode = format!("{}*{}", endpoint.name, n);
                points.push((hasher.hash(vnode.as_bytes()), idx));
            }
        }
        points.sort_unstable();
        HashRing { points }
    }

    // First point at or after the hash, wrapping around the ring.
    fn select(&self, hash: u64) -> usize {
        let idx = self.points.partition_point(|point| point.0 < hash);
        if idx == self.points.len() {
            self.points[0].1
        } else {
            self.points[idx].1
        }
    }
}

/// A client spanning every endpoint of one membership snapshot.
pub struct ShardedClient<C> {
    endpoints: Vec<EndpointDescriptor>,
    connections: Vec<C>,
    ring: HashRing,
    hasher: Arc<dyn KeyHasher>,
    key_tag: Option<KeyTagPattern>,
}

impl<C> ShardedClient<C>
where
    C: NodeClient,
{
    pub(crate) fn new<F>(
        endpoints: Vec<EndpointDescriptor>,
        hasher: Arc<dyn KeyHasher>,
        key_tag: Option<KeyTagPattern>,
        connect: &mut F,
        log: &Logger,
    ) -> Self
    where
        F: FnMut(&EndpointDescriptor) -> C,
    {
        let mut connections = Vec::with_capacity(endpoints.len());
        for endpoint in &endpoints {
            let mut conn = connect(endpoint);
            // A connect failure is not fatal to client creation; commands
            // against this endpoint will surface it, and the health checker
            // will reclassify it.
            if let Err(err) = conn.connect() {
                warn!(
                    log,
                    "connect failed while building sharded client";
                    "endpoint" => %endpoint,
                    "error" => %err
                );
            }
            connections.push(conn);
        }
        let ring = HashRing::new(&endpoints, &*hasher);
        ShardedClient {
            endpoints,
            connections,
            ring,
            hasher,
            key_tag,
        }
    }

    /// Route a key to the connection of the endpoint owning it.
    pub fn dispatch(&mut self, key: &str) -> &mut C {
        let idx = self.select(key);
        &mut self.connections[idx]
    }

    /// The endpoint a key routes to.
    pub fn endpoint_for(&self, key: &str) -> &EndpointDescriptor {
        &self.endpoints[self.select(key)]
    }

    fn select(&self, key: &str) -> usize {
        let effective = match &self.key_tag {
            Some(pattern) => pattern.extract(key),
            None => key,
        };
        self.ring.select(self.hasher.hash(effective.as_bytes()))
    }

    /// The endpoint membership actually embedded in this client's ring,
    /// deduplicated from the ring's many points.
    pub fn endpoint_set(&self) -> HashSet<EndpointDescriptor> {
        self.ring
            .points
            .iter()
            .map(|point| self.endpoints[point.1].clone())
            .collect()
    }

    pub fn endpoints(&self) -> &[EndpointDescriptor] {
        &self.endpoints
    }

    /// Tear the client apart into its per-endpoint connections, for
    /// destruction.
    pub(crate) fn into_connections(self) -> Vec<(EndpointDescriptor, C)> {
        self.endpoints.into_iter().zip(self.connections).collect()
    }
}
