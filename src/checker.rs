// Copyright 2020 Joyent, Inc.

//! Periodic endpoint health sweeps.

use std::sync::Arc;

use slog::{debug, warn, Logger};

use crate::connection::NodeClient;
use crate::directory::ShardDirectory;
use crate::probe;

/// The periodic task that reclassifies endpoints in a [`ShardDirectory`].
///
/// Each run sweeps the broken endpoints looking for recovery, then the
/// active endpoints looking for failure. Both sweeps iterate a snapshot of
/// the map keys taken at sweep start, so a transition performed mid-sweep
/// is not revisited within the same run. Concurrent readers may see the
/// directory partially updated at any point; every individual transition is
/// atomic.
pub struct HealthChecker<C> {
    directory: Arc<ShardDirectory<C>>,
    ping_retries: u32,
    log: Logger,
}

impl<C> HealthChecker<C>
where
    C: NodeClient,
{
    pub fn new(
        directory: Arc<ShardDirectory<C>>,
        ping_retries: u32,
        log: Logger,
    ) -> Self {
        HealthChecker {
            directory,
            ping_retries,
            log,
        }
    }

    /// One full sweep over every known endpoint.
    pub fn run(&self) {
        debug!(
            self.log,
            "health check sweep";
            "active" => self.directory.active_len(),
            "broken" => self.directory.broken_len()
        );

        // Broken endpoints get a single probe with no retries; one good
        // reply is enough to restore them.
        for endpoint in self.directory.broken_endpoints() {
            let handle = match self.directory.broken_handle(&endpoint) {
                Some(handle) => handle,
                None => continue,
            };
            let recovered = probe::detect(&mut *handle.lock().unwrap(), 0);
            if recovered && self.directory.promote(&endpoint).is_some() {
                warn!(
                    self.log,
                    "broken endpoint is active again";
                    "endpoint" => %endpoint
                );
            }
        }

        // Active endpoints get the configured retry budget before being
        // declared broken.
        for endpoint in self.directory.active_endpoints() {
            let handle = match self.directory.active_handle(&endpoint) {
                Some(handle) => handle,
                None => continue,
            };
            let healthy =
                probe::detect(&mut *handle.lock().unwrap(), self.ping_retries);
            if !healthy {
                if let Some(handle) = self.directory.demote(&endpoint) {
                    if let Err(err) = handle.lock().unwrap().close() {
                        warn!(
                            self.log,
                            "closing connection of broken endpoint failed";
                            "endpoint" => %endpoint,
                            "error" => %err
                        );
                    }
                    warn!(
                        self.log,
                        "active endpoint is broken";
                        "endpoint" => %endpoint
                    );
                }
            }
        }
    }
}
