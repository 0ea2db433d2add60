// Copyright 2020 Joyent, Inc.

//! A fake key-value backend for exercising the full stack in tests.

use std::collections::{HashMap, VecDeque};
use std::io::{Error as IoError, ErrorKind};
use std::sync::{Arc, Mutex};

use shardcache::connection::{Connection, NodeClient};
use shardcache::endpoint::EndpointDescriptor;

#[derive(Default)]
struct ServerState {
    healthy: bool,
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    // Kept sorted by (score, member).
    zsets: HashMap<String, Vec<(f64, String)>>,
    expiries: HashMap<String, i64>,
}

/// One fake endpoint's backing state, shared by every client connected to
/// it.
#[derive(Clone)]
pub struct FakeServer {
    inner: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn healthy() -> Self {
        FakeServer {
            inner: Arc::new(Mutex::new(ServerState {
                healthy: true,
                ..Default::default()
            })),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.inner.lock().unwrap().healthy = healthy;
    }

    pub fn client(&self) -> FakeNodeClient {
        FakeNodeClient {
            server: self.clone(),
        }
    }
}

/// A cluster of fake servers addressable by endpoint.
pub struct FakeCluster {
    pub endpoints: Vec<EndpointDescriptor>,
    pub servers: HashMap<EndpointDescriptor, FakeServer>,
}

impl FakeCluster {
    pub fn new(n: u16) -> Self {
        let endpoints: Vec<EndpointDescriptor> = (0..n)
            .map(|i| {
                EndpointDescriptor::new(
                    "127.0.0.1",
                    7500 + i,
                    &format!("shard-{}", i),
                )
            })
            .collect();
        let servers = endpoints
            .iter()
            .map(|e| (e.clone(), FakeServer::healthy()))
            .collect();
        FakeCluster { endpoints, servers }
    }

    pub fn connect_fn(
        &self,
    ) -> impl FnMut(&EndpointDescriptor) -> FakeNodeClient + Send + 'static
    {
        let servers = self.servers.clone();
        move |endpoint: &EndpointDescriptor| {
            servers
                .get(endpoint)
                .expect("no fake server for endpoint")
                .client()
        }
    }

    pub fn server(&self, i: usize) -> &FakeServer {
        &self.servers[&self.endpoints[i]]
    }
}

fn unreachable_err() -> IoError {
    IoError::new(ErrorKind::ConnectionRefused, "fake endpoint down")
}

fn normalize_range(start: i64, stop: i64, len: usize) -> (usize, usize) {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut stop = if stop < 0 { len + stop } else { stop };
    if start < 0 {
        start = 0;
    }
    if stop >= len {
        stop = len - 1;
    }
    if start > stop || len == 0 {
        return (0, 0);
    }
    (start as usize, (stop + 1) as usize)
}

pub struct FakeNodeClient {
    server: FakeServer,
}

impl FakeNodeClient {
    fn guard(
        &self,
    ) -> Result<std::sync::MutexGuard<ServerState>, IoError> {
        let state = self.server.inner.lock().unwrap();
        if state.healthy {
            Ok(state)
        } else {
            Err(unreachable_err())
        }
    }
}

impl Connection for FakeNodeClient {
    type Error = IoError;

    fn connect(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

impl NodeClient for FakeNodeClient {
    fn ping(&mut self) -> Result<String, IoError> {
        self.guard().map(|_| String::from("PONG"))
    }

    fn quit(&mut self) -> Result<(), IoError> {
        self.guard().map(|_| ())
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool, IoError> {
        let mut state = self.guard()?;
        let known = state.strings.contains_key(key)
            || state.lists.contains_key(key)
            || state.zsets.contains_key(key);
        if known {
            state.expiries.insert(key.to_string(), seconds as i64);
        }
        Ok(known)
    }

    fn ttl(&mut self, key: &str) -> Result<i64, IoError> {
        let state = self.guard()?;
        let known = state.strings.contains_key(key)
            || state.lists.contains_key(key)
            || state.zsets.contains_key(key);
        if !known {
            return Ok(-2);
        }
        Ok(*state.expiries.get(key).unwrap_or(&-1))
    }

    fn del(&mut self, key: &str) -> Result<u64, IoError> {
        let mut state = self.guard()?;
        let mut removed = 0;
        if state.strings.remove(key).is_some() {
            removed += 1;
        }
        if state.lists.remove(key).is_some() {
            removed += 1;
        }
        if state.zsets.remove(key).is_some() {
            removed += 1;
        }
        state.expiries.remove(key);
        Ok(removed)
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, IoError> {
        Ok(self.guard()?.strings.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IoError> {
        self.guard()?
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn setex(
        &mut self,
        key: &str,
        seconds: u64,
        value: &str,
    ) -> Result<(), IoError> {
        let mut state = self.guard()?;
        state.strings.insert(key.to_string(), value.to_string());
        state.expiries.insert(key.to_string(), seconds as i64);
        Ok(())
    }

    fn append(&mut self, key: &str, value: &str) -> Result<u64, IoError> {
        let mut state = self.guard()?;
        let entry = state.strings.entry(key.to_string()).or_default();
        entry.push_str(value);
        Ok(entry.len() as u64)
    }

    fn lpush(&mut self, key: &str, values: &[&str]) -> Result<u64, IoError> {
        let mut state = self.guard()?;
        let list = state.lists.entry(key.to_string()).or_default();
        for value in values {
            list.push_front(value.to_string());
        }
        Ok(list.len() as u64)
    }

    fn rpop(&mut self, key: &str) -> Result<Option<String>, IoError> {
        let mut state = self.guard()?;
        Ok(state.lists.get_mut(key).and_then(|list| list.pop_back()))
    }

    fn lrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, IoError> {
        let state = self.guard()?;
        let list = match state.lists.get(key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let (lo, hi) = normalize_range(start, stop, list.len());
        Ok(list.iter().skip(lo).take(hi - lo).cloned().collect())
    }

    fn ltrim(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<(), IoError> {
        let mut state = self.guard()?;
        if let Some(list) = state.lists.get_mut(key) {
            let (lo, hi) = normalize_range(start, stop, list.len());
            let kept: VecDeque<String> =
                list.iter().skip(lo).take(hi - lo).cloned().collect();
            *list = kept;
        }
        Ok(())
    }

    fn llen(&mut self, key: &str) -> Result<u64, IoError> {
        let state = self.guard()?;
        Ok(state.lists.get(key).map(|l| l.len()).unwrap_or(0) as u64)
    }

    fn zadd_count(
        &mut self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<(u64, u64), IoError> {
        let mut state = self.guard()?;
        let zset = state.zsets.entry(key.to_string()).or_default();
        let mut added = 0;
        for (score, member) in members {
            match zset.iter().position(|(_, m)| m == member) {
                Some(idx) => zset[idx].0 = *score,
                None => {
                    zset.push((*score, member.to_string()));
                    added += 1;
                }
            }
        }
        zset.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        Ok((added, zset.len() as u64))
    }

    fn zcard(&mut self, key: &str) -> Result<u64, IoError> {
        let state = self.guard()?;
        Ok(state.zsets.get(key).map(|z| z.len()).unwrap_or(0) as u64)
    }

    fn zrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, IoError> {
        let state = self.guard()?;
        let zset = match state.zsets.get(key) {
            Some(zset) => zset,
            None => return Ok(Vec::new()),
        };
        let (lo, hi) = normalize_range(start, stop, zset.len());
        Ok(zset[lo..hi].iter().map(|(_, m)| m.clone()).collect())
    }

    fn zrevrange(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<String>, IoError> {
        let state = self.guard()?;
        let zset = match state.zsets.get(key) {
            Some(zset) => zset,
            None => return Ok(Vec::new()),
        };
        let reversed: Vec<String> =
            zset.iter().rev().map(|(_, m)| m.clone()).collect();
        let (lo, hi) = normalize_range(start, stop, reversed.len());
        Ok(reversed[lo..hi].to_vec())
    }

    fn zrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, IoError> {
        let state = self.guard()?;
        let zset = match state.zsets.get(key) {
            Some(zset) => zset,
            None => return Ok(Vec::new()),
        };
        let matched = zset
            .iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(_, m)| m.clone());
        Ok(match limit {
            Some((offset, count)) => matched
                .skip(offset as usize)
                .take(count as usize)
                .collect(),
            None => matched.collect(),
        })
    }

    fn zrevrange_by_score(
        &mut self,
        key: &str,
        max: f64,
        min: f64,
        limit: Option<(u64, u64)>,
    ) -> Result<Vec<String>, IoError> {
        let state = self.guard()?;
        let zset = match state.zsets.get(key) {
            Some(zset) => zset,
            None => return Ok(Vec::new()),
        };
        let matched = zset
            .iter()
            .rev()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(_, m)| m.clone());
        Ok(match limit {
            Some((offset, count)) => matched
                .skip(offset as usize)
                .take(count as usize)
                .collect(),
            None => matched.collect(),
        })
    }

    fn zremrange_by_rank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, IoError> {
        let mut state = self.guard()?;
        let zset = match state.zsets.get_mut(key) {
            Some(zset) => zset,
            None => return Ok(0),
        };
        let (lo, hi) = normalize_range(start, stop, zset.len());
        let removed = hi - lo;
        zset.drain(lo..hi);
        Ok(removed as u64)
    }

    fn zremrange_by_score(
        &mut self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<u64, IoError> {
        let mut state = self.guard()?;
        let zset = match state.zsets.get_mut(key) {
            Some(zset) => zset,
            None => return Ok(0),
        };
        let before = zset.len();
        zset.retain(|(score, _)| *score < min || *score > max);
        Ok((before - zset.len()) as u64)
    }
}
