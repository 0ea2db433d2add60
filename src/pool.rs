// Copyright 2020 Joyent, Inc.

//! A borrow/return pool of sharded clients.
//!
//! `CachePool` composes over the [factory
//! contract](crate::factory::PooledObjectFactory) rather than extending any
//! concrete pool implementation. Claiming is non-blocking: an empty idle
//! queue creates a new client while the pool is under its configured
//! capacity and otherwise fails immediately. Each claim optionally
//! validates the candidate against the live shard directory, destroying
//! stale clients on the spot.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use derive_more::{Add, AddAssign, Display, From, Into, Sub, SubAssign};
use slog::{debug, Logger};

use crate::connection::NodeClient;
use crate::endpoint::EndpointDescriptor;
use crate::error::Error;
use crate::factory::{PooledObjectFactory, ShardedClientFactory};
use crate::sharded::ShardedClient;

/// Default maximum number of live sharded clients.
pub const DEFAULT_MAX_TOTAL: u32 = 8;

/// Configuration for a [`CachePool`].
pub struct CachePoolOptions {
    /// Maximum number of live clients, claimed and idle together. Default
    /// is 8.
    pub max_total: Option<u32>,
    /// Validate clients against the shard directory on claim. Default is
    /// true.
    pub test_on_claim: Option<bool>,
}

impl Default for CachePoolOptions {
    fn default() -> Self {
        CachePoolOptions {
            max_total: None,
            test_on_claim: None,
        }
    }
}

/// A newtype wrapper around u32 used for counts of clients managed by the
/// pool.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct ClientCount(u32);

/// Counts of pool-managed clients.
#[derive(Copy, Clone, Debug)]
pub struct CachePoolStats {
    /// Clients alive, claimed and idle together.
    pub total_clients: ClientCount,
    /// Clients sitting in the idle queue.
    pub idle_clients: ClientCount,
}

struct PoolInner<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    factory: ShardedClientFactory<C, F>,
    idle: Mutex<VecDeque<ShardedClient<C>>>,
    total: AtomicU32,
    max_total: u32,
    test_on_claim: bool,
    stopped: AtomicBool,
    log: Logger,
}

/// A pool of sharded clients over a dynamically-healthy endpoint set.
pub struct CachePool<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    inner: Arc<PoolInner<C, F>>,
}

impl<C, F> Clone for CachePool<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn clone(&self) -> CachePool<C, F> {
        CachePool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, F> CachePool<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    pub fn new(
        options: CachePoolOptions,
        factory: ShardedClientFactory<C, F>,
        log: Logger,
    ) -> Self {
        CachePool {
            inner: Arc::new(PoolInner {
                factory,
                idle: Mutex::new(VecDeque::new()),
                total: AtomicU32::new(0),
                max_total: options.max_total.unwrap_or(DEFAULT_MAX_TOTAL),
                test_on_claim: options.test_on_claim.unwrap_or(true),
                stopped: AtomicBool::new(false),
                log,
            }),
        }
    }

    /// Claim a client without blocking.
    ///
    /// Stale idle clients found along the way are destroyed and replaced.
    /// When the idle queue is empty a fresh client is created unless the
    /// pool is at capacity, in which case `PoolExhausted` is returned
    /// immediately.
    pub fn claim(&self) -> Result<PooledClient<C, F>, Error> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::PoolStopped);
        }

        loop {
            let candidate = self.inner.idle.lock().unwrap().pop_front();
            match candidate {
                Some(mut client) => {
                    if !self.inner.test_on_claim
                        || self.inner.factory.validate(&client)
                    {
                        self.inner.factory.activate(&mut client);
                        return Ok(PooledClient {
                            pool: self.clone(),
                            client: Some(client),
                        });
                    }
                    debug!(self.inner.log, "destroying stale pooled client");
                    self.inner.factory.destroy(client);
                    self.inner.total.fetch_sub(1, Ordering::SeqCst);
                    // Try the next idle client, or fall through to a fresh
                    // create.
                }
                None => {
                    let prev =
                        self.inner.total.fetch_add(1, Ordering::SeqCst);
                    if prev >= self.inner.max_total {
                        self.inner.total.fetch_sub(1, Ordering::SeqCst);
                        return Err(Error::PoolExhausted);
                    }
                    match self.inner.factory.create() {
                        Ok(client) => {
                            return Ok(PooledClient {
                                pool: self.clone(),
                                client: Some(client),
                            })
                        }
                        Err(err) => {
                            self.inner.total.fetch_sub(1, Ordering::SeqCst);
                            return Err(err);
                        }
                    }
                }
            }
        }
    }

    /// Stop the pool: destroy the idle clients and refuse further claims.
    /// Claimed clients still out are destroyed as they come back.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let drained: Vec<ShardedClient<C>> =
            self.inner.idle.lock().unwrap().drain(..).collect();
        for client in drained {
            self.inner.factory.destroy(client);
            self.inner.total.fetch_sub(1, Ordering::SeqCst);
        }
        debug!(self.inner.log, "cache pool stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CachePoolStats {
        CachePoolStats {
            total_clients: ClientCount::from(
                self.inner.total.load(Ordering::SeqCst),
            ),
            idle_clients: ClientCount::from(
                self.inner.idle.lock().unwrap().len() as u32,
            ),
        }
    }

    /// The factory's shard directory, shared with the health checker.
    pub fn directory(
        &self,
    ) -> &Arc<crate::directory::ShardDirectory<C>> {
        self.inner.factory.directory()
    }

    fn replace(&self, mut client: ShardedClient<C>) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            self.inner.factory.destroy(client);
            self.inner.total.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        self.inner.factory.passivate(&mut client);
        self.inner.idle.lock().unwrap().push_back(client);
    }

    fn discard(&self, client: ShardedClient<C>) {
        self.inner.factory.destroy(client);
        self.inner.total.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A claimed sharded client. Returns itself to the pool when it falls out
/// of scope.
pub struct PooledClient<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    pool: CachePool<C, F>,
    client: Option<ShardedClient<C>>,
}

impl<C, F> PooledClient<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    /// Destroy this client instead of returning it to the pool, for
    /// callers that hit a fatal command error on it.
    pub fn invalidate(mut self) {
        if let Some(client) = self.client.take() {
            self.pool.discard(client);
        }
    }
}

impl<C, F> Drop for PooledClient<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.replace(client);
        }
    }
}

impl<C, F> Deref for PooledClient<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    type Target = ShardedClient<C>;

    fn deref(&self) -> &ShardedClient<C> {
        self.client.as_ref().unwrap()
    }
}

impl<C, F> DerefMut for PooledClient<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn deref_mut(&mut self) -> &mut ShardedClient<C> {
        self.client.as_mut().unwrap()
    }
}
