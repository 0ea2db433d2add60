// Copyright 2020 Joyent, Inc.

//! A dual-backend migration facade.
//!
//! During a backend migration every write is applied to both stores so the
//! target warms up while the legacy store stays authoritative; a boolean
//! switch moves reads over once the target is trusted. The facade carries
//! no cutover policy beyond that switch.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;
use crate::service::{Closer, KeyValueStore, Toggleable};

/// Routes operations between a migration target and a legacy store.
///
/// Writes go to both backends; the result of whichever backend currently
/// serves reads is the one returned. Reads route by the switch alone.
pub struct MigrationStore<P, S>
where
    P: KeyValueStore,
    S: KeyValueStore,
{
    target: P,
    legacy: S,
    read_from_target: AtomicBool,
}

impl<P, S> MigrationStore<P, S>
where
    P: KeyValueStore,
    S: KeyValueStore,
{
    /// Build a facade that starts with reads served by the legacy store.
    pub fn new(target: P, legacy: S) -> Self {
        MigrationStore {
            target,
            legacy,
            read_from_target: AtomicBool::new(false),
        }
    }

    /// Switch reads between the legacy store and the migration target.
    pub fn set_read_from_target(&self, read_from_target: bool) {
        self.read_from_target
            .store(read_from_target, Ordering::SeqCst);
    }

    pub fn read_from_target(&self) -> bool {
        self.read_from_target.load(Ordering::SeqCst)
    }

    // Apply a write to both backends, returning the read side's result.
    fn both<T>(
        &self,
        target_op: impl FnOnce(&P) -> Result<T, Error>,
        legacy_op: impl FnOnce(&S) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.read_from_target() {
            let result = target_op(&self.target);
            let _ = legacy_op(&self.legacy);
            result
        } else {
            let _ = target_op(&self.target);
            legacy_op(&self.legacy)
        }
    }

    // Route a read to whichever backend currently serves reads.
    fn read<T>(
        &self,
        target_op: impl FnOnce(&P) -> Result<T, Error>,
        legacy_op: impl FnOnce(&S) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.read_from_target() {
            target_op(&self.target)
        } else {
            legacy_op(&self.legacy)
        }
    }
}

impl<P, S> Closer for MigrationStore<P, S>
where
    P: KeyValueStore,
    S: KeyValueStore,
{
    fn close(&self) {
        self.target.close();
        self.legacy.close();
    }
}

impl<P, S> Toggleable for MigrationStore<P, S>
where
    P: KeyValueStore,
    S: KeyValueStore,
{
    // The facade has no switch of its own; the underlying services control
    // their own availability.
    fn set_enabled(&self, _enabled: bool) {}

    fn enabled(&self) -> bool {
        true
    }
}

impl<P, S> KeyValueStore for MigrationStore<P, S>
where
    P: KeyValueStore,
    S: KeyValueStore,
{
    fn expire(&self, key: &str, seconds: u64) -> Result<bool, Error> {
        self.both(|t| t.expire(key, seconds), |l| l.expire(key, seconds))
    }

    fn ttl(&self, key: &str) -> Result<i64, Error> {
        self.read(|t| t.ttl(key), |l| l.ttl(key))
    }

    fn del(&self, key: &str) -> Result<u64, Error> {
        self.both(|t| t.del(key), |l| l.del(key))
    }

    fn get(&self, key: &str) -> Result<Option<String>, Error> {
        self.read(|t| t.get(key), |l| l.get(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.both(|t| t.set(key, value), |l| l.set(key, value))
    }

    fn setex(
        &self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<(), Error> {
        self.both(
            |t| t.setex(key, seconds, value),
            |l| l.setex(key, seconds, value),
        )
    }

    fn append(&self, key: &str, value: &str) -> Result<u64, Error> {
        self.both(|t| t.append(key, value), |l| l.append(key, value))
    }

    fn llen(&self, key: &str) -> Result<u64, Error> {
        self.read(|t| t.llen(key), |l| l.llen(key))
    }

    fn lpush(&self, key: &str, values: &[&str]) -> Result<u64, Error> {
        self.both(|t| t.lpush(key, values), |l| l.lpush(key, values))
    }

    // Both backends see every write, so popping both keeps them aligned.
    fn rpop(&self, key: &str) -> Result<Option<String>, Error> {
        self.both(|t| t.rpop(key), |l| l.rpop(key))
    }

    fn lrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.read(
            |t| t.lrange(key, start, stop),
            |l| l.lrange(key, start, stop),
        )
    }

    fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<(), Error> {
        self.both(
            |t| t.ltrim(key, start, stop),
            |l| l.ltrim(key, start, stop),
        )
    }

    fn zadd(
        &self,
        key: &str,
        score: f64,
        member: &str,
    ) -> Result<u64, Error> {
        self.both(
            |t| t.zadd(key, score, member),
            |l| l.zadd(key, score, member),
        )
    }

    fn zadd_capped(
        &self,
        key: &str,
        score: f64,
        member: &str,
        max_length: u64,
    ) -> Result<u64, Error> {
        self.both(
            |t| t.zadd_capped(key, score, member, max_length),
            |l| l.zadd_capped(key, score, member, max_length),
        )
    }

    fn zadd_all(
        &self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<u64, Error> {
        self.both(|t| t.zadd_all(key, members), |l| l.zadd_all(key, members))
    }

    fn zadd_all_capped(
        &self,
        key: &str,
        members: &[(f64, &str)],
        max_length: u64,
    ) -> Result<u64, Error> {
        self.both(
            |t| t.zadd_all_capped(key, members, max_length),
            |l| l.zadd_all_capped(key, members, max_length),
        )
    }

    fn zcard(&self, key: &str) -> Result<u64, Error> {
        self.read(|t| t.zcard(key), |l| l.zcard(key))
    }

    fn zrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.read(
            |t| t.zrange(key, start, stop),
            |l| l.zrange(key, start, stop),
        )
    }

    fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, Error> {
        self.read(
            |t| t.zrevrange(key, start, stop),
            |l| l.zrevrange(key, start, stop),
        )
    }

    fn zrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error> {
        self.read(
            |t| t.zrange_by_score(key, min, max, limit),
            |l| l.zrange_by_score(key, min, max, limit),
        )
    }

    fn zrevrange_by_score(
        &self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, Error> {
        self.read(
            |t| t.zrevrange_by_score(key, max, min, limit),
            |l| l.zrevrange_by_score(key, max, min, limit),
        )
    }

    fn zremrange_by_rank(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, Error> {
        self.both(
            |t| t.zremrange_by_rank(key, start, stop),
            |l| l.zremrange_by_rank(key, start, stop),
        )
    }

    fn zremrange_by_score(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, Error> {
        self.both(
            |t| t.zremrange_by_score(key, min, max),
            |l| l.zremrange_by_score(key, min, max),
        )
    }
}
