// Copyright 2020 Joyent, Inc.

//! The caller-facing cache service.
//!
//! [`ShardedCacheService`] surfaces the key-value operation set over the
//! pool: every operation claims a sharded client, dispatches by key, and
//! maps failures into explicit [`Error`] kinds instead of silent default
//! values. Capped sorted-set adds additionally feed the shrink policy.

use std::sync::atomic::{AtomicBool, Ordering};

use slog::{error, o, Drain, Logger};

use crate::capped::{
    ShrinkJob, ShrinkWorker, ShrinkWorkerOptions, DEFAULT_MAX_LENGTH,
};
use crate::connection::{Connection, NodeClient};
use crate::endpoint::EndpointDescriptor;
use crate::error::Error;
use crate::factory::{FactoryOptions, ShardedClientFactory};
use crate::pool::{CachePool, CachePoolOptions};
use crate::scheduler::SchedulerHandle;

/// The ability to release underlying resources.
pub trait Closer {
    fn close(&self);
}

/// The ability to switch a service on and off at runtime.
pub trait Toggleable {
    fn set_enabled(&self, enabled: bool);
    fn enabled(&self) -> bool;
}

/// The cache operation surface.
///
/// Implementations are one-to-one pass-throughs into the underlying
/// key-value client; only the capped sorted-set adds carry extra policy.
pub trait KeyValueStore: Closer + Toggleable {
    // -- keys --
    fn expire(&self, key: &str, seconds: u64) -> Result<bool, Error>;
    fn ttl(&self, key: &str) -> Result<i64, Error>;
    fn del(&self, key: &str) -> Result<u64, Error>;

    // -- strings --
    fn get(&self, key: &str) -> Result<Option<String>, Error>;
    fn set(&self, key: &str, value: &str) -> Result<(), Error>;
    fn setex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<(), Error>;
    fn append(&self, key: &str, value: &str) -> Result<u64, Error>;

    // -- lists --
    fn llen(&self, key: &str) -> Result<u64, Error>;
    fn lpush(&self, key: &str, values: &[&str]) -> Result<u64, Error>;
    fn rpop(&self, key: &str) -> Result<Option<String>, Error>;
    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error>;
    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), Error>;

    // -- sorted sets --

    /// Add one scored member under the default maximum length.
    fn zadd(&self, key: &str, score: f64, member: &str)
        -> Result<u64, Error>;

    /// Add one scored member to a set capped at `max_length`. Returns the
    /// number of genuinely new members; a score update alone never
    /// schedules a shrink.
    fn zadd_capped(
        &self,
        key: &str,
        score: f64,
        member: &str,
        max_length: u64,
    ) -> Result<u64, Error>;

    /// Add several scored members under the default maximum length.
    fn zadd_all(
        &self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<u64, Error>;

    /// Add several scored members to a set capped at `max_length`.
    fn zadd_all_capped(
        &self,
        key: &str,
        members: &[(f64, &str)],
        max_length: u64,
    ) -> Result<u64, Error>;

    fn zcard(&self, key: &str) -> Result<u64, Error>;
    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error>;
    fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error>;
    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error>;
    fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error>;
    fn zremrange_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, Error>;
    fn zremrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, Error>;
}

/// Configuration for a [`ShardedCacheService`].
pub struct ServiceOptions {
    pub pool: CachePoolOptions,
    pub factory: FactoryOptions,
    pub shrink: ShrinkWorkerOptions,
    /// Whether the service starts enabled. Default is true.
    pub enabled: Option<bool>,
    /// Scheduler shared with other pools in the process. A private one is
    /// created when absent.
    pub scheduler: Option<SchedulerHandle>,
    /// An optional `slog` logger instance. When absent logging falls back
    /// to the `slog-stdlog` drain.
    pub log: Option<Logger>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions {
            pool: CachePoolOptions::default(),
            factory: FactoryOptions::default(),
            shrink: ShrinkWorkerOptions::default(),
            enabled: None,
            scheduler: None,
            log: None,
        }
    }
}

/// A cache service over a pool of sharded clients.
pub struct ShardedCacheService<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    pool: CachePool<C, F>,
    shrink: ShrinkWorker,
    enabled: AtomicBool,
    log: Logger,
}

impl<C, F> ShardedCacheService<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    pub fn new(
        options: ServiceOptions,
        endpoints: Vec<EndpointDescriptor>,
        connect: F,
    ) -> Result<Self, Error> {
        let log = options.log.unwrap_or_else(|| {
            Logger::root(slog_stdlog::StdLog.fuse(), o!())
        });
        let scheduler = options.scheduler.unwrap_or_default();

        let factory = ShardedClientFactory::new(
            options.factory,
            endpoints,
            connect,
            &scheduler,
            log.new(o!("component" => "factory")),
        )?;
        let pool = CachePool::new(
            options.pool,
            factory,
            log.new(o!("component" => "pool")),
        );

        // Shrink jobs run against the same pool the foreground operations
        // use, on the worker's own threads.
        let shrink_pool = pool.clone();
        let shrink = ShrinkWorker::new(
            options.shrink,
            move |job: &ShrinkJob| {
                let mut client = shrink_pool.claim()?;
                let result = client
                    .dispatch(&job.key)
                    .zremrange_by_rank(&job.key, 0, job.stop_rank());
                match result {
                    Ok(removed) => Ok(removed),
                    Err(err) => {
                        client.invalidate();
                        Err(Error::unreachable(err))
                    }
                }
            },
            log.new(o!("component" => "shrink")),
        );

        Ok(ShardedCacheService {
            pool,
            shrink,
            enabled: AtomicBool::new(options.enabled.unwrap_or(true)),
            log,
        })
    }

    /// The underlying pool, mostly useful for inspection in tests.
    pub fn pool(&self) -> &CachePool<C, F> {
        &self.pool
    }

    fn ready(&self, key: &str) -> Result<(), Error> {
        if !self.enabled.load(Ordering::SeqCst) {
            return Err(Error::Disabled);
        }
        if key.is_empty() {
            return Err(Error::InvalidArgument(String::from(
                "key must not be empty",
            )));
        }
        Ok(())
    }

    // Claim a client, run one command on the owning endpoint, and map the
    // failure modes. A client whose command failed is destroyed rather
    // than returned to the pool.
    fn with_conn<T, Op>(
        &self,
        key: &str,
        op_name: &'static str,
        op: Op,
    ) -> Result<T, Error>
    where
        Op: FnOnce(&mut C, &str) -> Result<T, <C as Connection>::Error>,
    {
        self.ready(key)?;
        let mut client = self.pool.claim()?;
        let result = op(client.dispatch(key), key);
        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(
                    self.log,
                    "cache command failed";
                    "op" => op_name,
                    "key" => key,
                    "error" => %err
                );
                client.invalidate();
                Err(Error::unreachable(err))
            }
        }
    }
}

impl<C, F> Closer for ShardedCacheService<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    /// Stop the pool. In-flight shrink jobs are not interrupted; once the
    /// pool refuses claims they fail and are logged by the worker.
    fn close(&self) {
        self.pool.stop();
    }
}

impl<C, F> Toggleable for ShardedCacheService<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl<C, F> KeyValueStore for ShardedCacheService<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn expire(&self, key: &str, seconds: u64) -> Result<bool, Error> {
        self.with_conn(key, "expire", |conn, key| conn.expire(key, seconds))
    }

    fn ttl(&self, key: &str) -> Result<i64, Error> {
        self.with_conn(key, "ttl", |conn, key| conn.ttl(key))
    }

    fn del(&self, key: &str) -> Result<u64, Error> {
        self.with_conn(key, "del", |conn, key| conn.del(key))
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.with_conn(key, "get", |conn, key| conn.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.with_conn(key, "set", |conn, key| conn.set(key, value))
    }

    fn setex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<(), Error> {
        // The backend rejects a non-positive expiry; fail it up front with
        // a clear kind instead.
        if seconds == 0 {
            return Err(Error::InvalidArgument(String::from(
                "expiry must be greater than zero",
            )));
        }
        self.with_conn(key, "setex", |conn, key| {
            conn.setex(key, seconds, value)
        })
    }

    fn append(&self, key: &str, value: &str) -> Result<u64, Error> {
        self.with_conn(key, "append", |conn, key| conn.append(key, value))
    }

    fn llen(&self, key: &str) -> Result<u64, Error> {
        self.with_conn(key, "llen", |conn, key| conn.llen(key))
    }

    fn lpush(&self, key: &str, values: &[&str]) -> Result<u64, Error> {
        self.with_conn(key, "lpush", |conn, key| conn.lpush(key, values))
    }

    fn rpop(&self, key: &str) -> Result<Option<String>, Error> {
        self.with_conn(key, "rpop", |conn, key| conn.rpop(key))
    }

    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.with_conn(key, "lrange", |conn, key| {
            conn.lrange(key, start, stop)
        })
    }

    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), Error> {
        self.with_conn(key, "ltrim", |conn, key| conn.ltrim(key, start, stop))
    }

    fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<u64, Error> {
        self.zadd_capped(key, score, member, DEFAULT_MAX_LENGTH)
    }

    fn zadd_capped(
        &self,
        key: &str,
        score: f64,
        member: &str,
        max_length: u64,
    ) -> Result<u64, Error> {
        self.zadd_all_capped(key, &[(score, member)], max_length)
    }

    fn zadd_all(
        &self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<u64, Error> {
        self.zadd_all_capped(key, members, DEFAULT_MAX_LENGTH)
    }

    fn zadd_all_capped(
        &self,
        key: &str,
        members: &[(f64, &str)],
        max_length: u64,
    ) -> Result<u64, Error> {
        if max_length == 0 {
            return Err(Error::InvalidArgument(String::from(
                "max_length must be greater than zero",
            )));
        }
        // The insert and the cardinality read happen in one round-trip so
        // the shrink decision sees a consistent snapshot.
        let (added, cardinality) = self
            .with_conn(key, "zadd", |conn, key| {
                conn.zadd_count(key, members)
            })?;
        if added > 0 && cardinality > 0 {
            self.shrink.evaluate(key, cardinality, max_length);
        }
        Ok(added)
    }

    fn zcard(&self, key: &str) -> Result<u64, Error> {
        self.with_conn(key, "zcard", |conn, key| conn.zcard(key))
    }

    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.with_conn(key, "zrange", |conn, key| {
            conn.zrange(key, start, stop)
        })
    }

    fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.with_conn(key, "zrevrange", |conn, key| {
            conn.zrevrange(key, start, stop)
        })
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error> {
        self.with_conn(key, "zrangebyscore", |conn, key| {
            conn.zrange_by_score(key, min, max, limit)
        })
    }

    fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error> {
        self.with_conn(key, "zrevrangebyscore", |conn, key| {
            conn.zrevrange_by_score(key, max, min, limit)
        })
    }

    fn zremrange_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, Error> {
        self.with_conn(key, "zremrangebyrank", |conn, key| {
            conn.zremrange_by_rank(key, start, stop)
        })
    }

    fn zremrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, Error> {
        self.with_conn(key, "zremrangebyscore", |conn, key| {
            conn.zremrange_by_score(key, min, max)
        })
    }
}
