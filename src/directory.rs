// Copyright 2020 Joyent, Inc.

//! The shared view of shard health.
//!
//! A [`ShardDirectory`] classifies every known endpoint as either active or
//! broken. The health checker mutates the classification on its own
//! schedule while pool factory calls read it from arbitrary caller threads,
//! so the two maps are concurrent maps and every reclassification uses the
//! map's own atomic remove as its guard: remove returns the prior value and
//! only the caller that got it performs the insert on the other side.
//! Readers may observe the brief instant where an endpoint in transit is in
//! neither map; each individual transition is atomic and the endpoint is
//! never in both.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;

use crate::connection::NodeClient;
use crate::endpoint::EndpointDescriptor;

/// A live connection to one endpoint, owned by whichever directory map
/// currently holds it. The checker and probe briefly hold a clone while
/// pinging, which is why the handle is shared rather than moved.
pub type ConnectionHandle<C> = Arc<Mutex<C>>;

/// The two-sided endpoint health registry.
pub struct ShardDirectory<C> {
    active: DashMap<EndpointDescriptor, ConnectionHandle<C>>,
    broken: DashMap<EndpointDescriptor, ConnectionHandle<C>>,
    // "membership changed since last consumed" signal; set by transitions,
    // test-and-cleared by the factory refresh path.
    dirty: AtomicBool,
}

impl<C> ShardDirectory<C>
where
    C: NodeClient,
{
    /// Build a directory with every seeded endpoint classified active.
    pub fn new(seed: Vec<(EndpointDescriptor, ConnectionHandle<C>)>) -> Self {
        let active = DashMap::with_capacity(seed.len());
        for (endpoint, handle) in seed {
            active.insert(endpoint, handle);
        }
        ShardDirectory {
            active,
            broken: DashMap::new(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Snapshot of the endpoints currently classified active.
    pub fn active_endpoints(&self) -> Vec<EndpointDescriptor> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Snapshot of the endpoints currently classified broken.
    pub fn broken_endpoints(&self) -> Vec<EndpointDescriptor> {
        self.broken.iter().map(|e| e.key().clone()).collect()
    }

    /// The current active membership as a set, for staleness comparison.
    pub fn active_set(&self) -> HashSet<EndpointDescriptor> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn broken_len(&self) -> usize {
        self.broken.len()
    }

    /// Fetch the handle of an active endpoint, if it is still active.
    pub fn active_handle(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<ConnectionHandle<C>> {
        self.active.get(endpoint).map(|e| Arc::clone(e.value()))
    }

    /// Fetch the handle of a broken endpoint, if it is still broken.
    pub fn broken_handle(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<ConnectionHandle<C>> {
        self.broken.get(endpoint).map(|e| Arc::clone(e.value()))
    }

    /// Move an endpoint from broken to active. Returns the handle when this
    /// call performed the move; `None` means another thread already did, or
    /// the endpoint was not broken.
    pub fn promote(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<ConnectionHandle<C>> {
        let (endpoint, handle) = self.broken.remove(endpoint)?;
        self.active.insert(endpoint, Arc::clone(&handle));
        self.dirty.store(true, Ordering::SeqCst);
        Some(handle)
    }

    /// Move an endpoint from active to broken. Returns the handle when this
    /// call performed the move; `None` means another thread already did, or
    /// the endpoint was not active.
    pub fn demote(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Option<ConnectionHandle<C>> {
        let (endpoint, handle) = self.active.remove(endpoint)?;
        self.broken.insert(endpoint, Arc::clone(&handle));
        self.dirty.store(true, Ordering::SeqCst);
        Some(handle)
    }

    /// Peek at the dirty flag without consuming it.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Test-and-clear the dirty flag. Only the first reader after a change
    /// observes `true`.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}
