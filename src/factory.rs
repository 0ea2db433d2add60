// Copyright 2020 Joyent, Inc.

//! The pooled-object factory for sharded clients.

use std::sync::{Arc, Mutex};

use chrono::Duration;
use slog::{debug, o, warn, Logger};

use crate::checker::HealthChecker;
use crate::connection::NodeClient;
use crate::directory::ShardDirectory;
use crate::endpoint::EndpointDescriptor;
use crate::error::Error;
use crate::scheduler::{ScheduledTask, SchedulerHandle};
use crate::sharded::{KeyHasher, KeyTagPattern, Sha1Hasher, ShardedClient};

/// Default period between health check sweeps, in milliseconds.
pub const DEFAULT_CHECK_INTERVAL_MILLIS: u64 = 30_000;
/// Default liveness retry budget for active endpoints.
pub const DEFAULT_PING_RETRIES: u32 = 2;

/// The contract a pool requires from its object factory.
///
/// This mirrors the classic object-pool factory protocol: `create` builds a
/// poolable object, `validate` decides whether a pooled object may be
/// handed out again, `destroy` releases it, and `activate`/`passivate`
/// bracket each borrow and return.
pub trait PooledObjectFactory<T> {
    fn create(&self) -> Result<T, Error>;
    fn validate(&self, object: &T) -> bool;
    fn destroy(&self, object: T);
    fn activate(&self, _object: &mut T) {}
    fn passivate(&self, _object: &mut T) {}
}

/// Configuration for a [`ShardedClientFactory`].
pub struct FactoryOptions {
    /// Period between health check sweeps in milliseconds. Zero disables
    /// health checking entirely. Default is 30 seconds.
    pub check_interval_millis: Option<u64>,
    /// Liveness retry budget used when probing active endpoints. Default
    /// is 2.
    pub ping_retries: Option<u32>,
    /// Ring hashing strategy. Defaults to [`Sha1Hasher`].
    pub hasher: Option<Arc<dyn KeyHasher>>,
    /// Optional key-partition markers for shard selection.
    pub key_tag: Option<KeyTagPattern>,
}

impl Default for FactoryOptions {
    fn default() -> Self {
        FactoryOptions {
            check_interval_millis: None,
            ping_retries: None,
            hasher: None,
            key_tag: None,
        }
    }
}

/// Builds, validates, and destroys [`ShardedClient`]s against the live
/// shard directory.
pub struct ShardedClientFactory<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    directory: Arc<ShardDirectory<C>>,
    // The working endpoint list used by create(); refreshed from the
    // directory when validation notices the membership moved.
    endpoints: Mutex<Vec<EndpointDescriptor>>,
    hasher: Arc<dyn KeyHasher>,
    key_tag: Option<KeyTagPattern>,
    connect: Mutex<F>,
    // Keeps the periodic sweep registered for the factory's lifetime.
    _checker_task: Option<ScheduledTask>,
    log: Logger,
}

impl<C, F> ShardedClientFactory<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    /// Build a factory over the given endpoints and register its health
    /// checker with the scheduler.
    ///
    /// One probe connection per endpoint is created up front and owned by
    /// the directory; the pooled clients build their own connections.
    pub fn new(
        options: FactoryOptions,
        endpoints: Vec<EndpointDescriptor>,
        mut connect: F,
        scheduler: &SchedulerHandle,
        log: Logger,
    ) -> Result<Self, Error> {
        if endpoints.is_empty() {
            return Err(Error::Config(String::from(
                "endpoint list must not be empty",
            )));
        }

        let seed = endpoints
            .iter()
            .map(|endpoint| {
                (endpoint.clone(), Arc::new(Mutex::new(connect(endpoint))))
            })
            .collect();
        let directory = Arc::new(ShardDirectory::new(seed));

        let check_interval = options
            .check_interval_millis
            .unwrap_or(DEFAULT_CHECK_INTERVAL_MILLIS);
        let ping_retries =
            options.ping_retries.unwrap_or(DEFAULT_PING_RETRIES);

        let checker_task = if check_interval > 0 {
            let checker = Arc::new(HealthChecker::new(
                Arc::clone(&directory),
                ping_retries,
                log.new(o!("task" => "health-check")),
            ));
            Some(scheduler.schedule_repeating(
                Duration::milliseconds(check_interval as i64),
                move || checker.run(),
            ))
        } else {
            None
        };

        Ok(ShardedClientFactory {
            directory,
            endpoints: Mutex::new(endpoints),
            hasher: options.hasher.unwrap_or_else(|| Arc::new(Sha1Hasher)),
            key_tag: options.key_tag,
            connect: Mutex::new(connect),
            _checker_task: checker_task,
            log,
        })
    }

    /// The live shard directory, shared with the health checker.
    pub fn directory(&self) -> &Arc<ShardDirectory<C>> {
        &self.directory
    }

    fn refresh_endpoints(&self) {
        let fresh = self.directory.active_endpoints();
        debug!(
            self.log,
            "refreshing working endpoint list";
            "endpoints" => fresh.len()
        );
        *self.endpoints.lock().unwrap() = fresh;
        // Consume the change signal; this refresh is the read it guards.
        self.directory.take_dirty();
    }
}

impl<C, F> PooledObjectFactory<ShardedClient<C>>
    for ShardedClientFactory<C, F>
where
    C: NodeClient,
    F: FnMut(&EndpointDescriptor) -> C + Send + 'static,
{
    fn create(&self) -> Result<ShardedClient<C>, Error> {
        if self.directory.take_dirty() {
            *self.endpoints.lock().unwrap() =
                self.directory.active_endpoints();
        }
        let endpoints = self.endpoints.lock().unwrap().clone();
        if endpoints.is_empty() {
            return Err(Error::Unreachable(String::from(
                "no active endpoints",
            )));
        }
        let mut connect = self.connect.lock().unwrap();
        Ok(ShardedClient::new(
            endpoints,
            Arc::clone(&self.hasher),
            self.key_tag.clone(),
            &mut *connect,
            &self.log,
        ))
    }

    /// A pooled client is valid only while its baked-in endpoint set equals
    /// the directory's live active set. Comparing sets catches both a
    /// changed cardinality and a same-size membership swap, where one
    /// endpoint failed while another recovered.
    fn validate(&self, client: &ShardedClient<C>) -> bool {
        let baked = client.endpoint_set();
        let live = self.directory.active_set();
        if baked == live {
            return true;
        }
        debug!(
            self.log,
            "pooled sharded client is stale";
            "baked" => baked.len(),
            "live" => live.len()
        );
        self.refresh_endpoints();
        false
    }

    /// Release every per-endpoint connection independently: ask the server
    /// to close first, then close the local side regardless. One endpoint
    /// failing either step never blocks the others.
    fn destroy(&self, client: ShardedClient<C>) {
        for (endpoint, mut conn) in client.into_connections() {
            if let Err(err) = conn.quit() {
                warn!(
                    self.log,
                    "graceful disconnect failed";
                    "endpoint" => %endpoint,
                    "error" => %err
                );
            }
            if let Err(err) = conn.close() {
                warn!(
                    self.log,
                    "closing connection failed";
                    "endpoint" => %endpoint,
                    "error" => %err
                );
            }
        }
    }

    // Pooled clients are reused as-is between borrows.
    fn activate(&self, _client: &mut ShardedClient<C>) {}
    fn passivate(&self, _client: &mut ShardedClient<C>) {}
}
