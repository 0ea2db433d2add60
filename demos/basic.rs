// Copyright 2020 Joyent, Inc.

//! A self-contained tour of the service over an in-memory backend.
//!
//! The demo wires three fake shards through the full stack: endpoint
//! parsing, the pooled sharded clients, and the capped sorted-set policy.
//! Unsupported commands simply report an error; the demo only exercises
//! strings and sorted sets.

use std::collections::HashMap;
use std::io::{Error as IoError, ErrorKind};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{thread, time};

use slog::{info, o, Drain, Logger};

use shardcache::connection::{Connection, NodeClient};
use shardcache::endpoint::{parse_endpoint_list, EndpointDescriptor};
use shardcache::service::{
    KeyValueStore, ServiceOptions, ShardedCacheService,
};

#[derive(Default)]
struct ShardState {
    strings: HashMap<String, String>,
    zsets: HashMap<String, Vec<(f64, String)>>,
}

#[derive(Clone, Default)]
struct DemoShard {
    state: Arc<Mutex<ShardState>>,
}

struct DemoClient {
    shard: DemoShard,
}

fn unsupported(op: &str) -> IoError {
    IoError::new(
        ErrorKind::Unsupported,
        format!("'{}' is not part of this demo", op),
    )
}

impl Connection for DemoClient {
    type Error = IoError;

    fn connect(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), IoError> {
        Ok(())
    }
}

impl NodeClient for DemoClient {
    fn ping(&mut self) -> Result<String, IoError> {
        Ok(String::from("PONG"))
    }

    fn quit(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, IoError> {
        Ok(self.shard.state.lock().unwrap().strings.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), IoError> {
        self.shard
            .state
            .lock()
            .unwrap()
            .strings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn zadd_count(
        &mut self,
        key: &str,
        members: &[(f64, &str)],
    ) -> Result<(u64, u64), IoError> {
        let mut state = self.shard.state.lock().unwrap();
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
        let state = self.shard.state.lock().unwrap();
        Ok(state.zsets.get(key).map(|z| z.len()).unwrap_or(0) as u64)
    }

    fn zremrange_by_rank(
        &mut self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<u64, IoError> {
        let mut state = self.shard.state.lock().unwrap();
        let zset = match state.zsets.get_mut(key) {
            Some(zset) => zset,
            None => return Ok(0),
        };
        let lo = start.max(0) as usize;
        let hi = ((stop + 1).max(0) as usize).min(zset.len());
        if lo >= hi {
            return Ok(0);
        }
        zset.drain(lo..hi);
        Ok((hi - lo) as u64)
    }

    fn expire(&mut self, _: &str, _: u64) -> Result<bool, IoError> {
        Err(unsupported("expire"))
    }
    fn ttl(&mut self, _: &str) -> Result<i64, IoError> {
        Err(unsupported("ttl"))
    }
    fn del(&mut self, _: &str) -> Result<u64, IoError> {
        Err(unsupported("del"))
    }
    fn setex(&mut self, _: &str, _: u64, _: &str) -> Result<(), IoError> {
        Err(unsupported("setex"))
    }
    fn append(&mut self, _: &str, _: &str) -> Result<u64, IoError> {
        Err(unsupported("append"))
    }
    fn lpush(&mut self, _: &str, _: &[&str]) -> Result<u64, IoError> {
        Err(unsupported("lpush"))
    }
    fn rpop(&mut self, _: &str) -> Result<Option<String>, IoError> {
        Err(unsupported("rpop"))
    }
    fn lrange(
        &mut self,
        _: &str,
        _: i64,
        _: i64,
    ) -> Result<Vec<String>, IoError> {
        Err(unsupported("lrange"))
    }
    fn ltrim(&mut self, _: &str, _: i64, _: i64) -> Result<(), IoError> {
        Err(unsupported("ltrim"))
    }
    fn llen(&mut self, _: &str) -> Result<u64, IoError> {
        Err(unsupported("llen"))
    }
    fn zrange(
        &mut self,
        _: &str,
        _: i64,
        _: i64,
    ) -> Result<Vec<String>, IoError> {
        Err(unsupported("zrange"))
    }
    fn zrevrange(
        &mut self,
        _: &str,
        _: i64,
        _: i64,
    ) -> Result<Vec<String>, IoError> {
        Err(unsupported("zrevrange"))
    }
    fn zrange_by_score(
        &mut self,
        _: &str,
        _: f64,
        _: f64,
        _: Option<(u64, u64)>,
    ) -> Result<Vec<String>, IoError> {
        Err(unsupported("zrangebyscore"))
    }
    fn zrevrange_by_score(
        &mut self,
        _: &str,
        _: f64,
        _: f64,
        _: Option<(u64, u64)>,
    ) -> Result<Vec<String>, IoError> {
        Err(unsupported("zrevrangebyscore"))
    }
    fn zremrange_by_score(
        &mut self,
        _: &str,
        _: f64,
        _: f64,
    ) -> Result<u64, IoError> {
        Err(unsupported("zremrangebyscore"))
    }
}

fn main() {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    );

    info!(log, "running basic shardcache example");

    let endpoints = parse_endpoint_list(
        "127.0.0.1:6379:shard-a, 127.0.0.1:6380:shard-b, \
         127.0.0.1:6381:shard-c",
        Duration::from_millis(2000),
    )
    .expect("endpoint list");

    let shards: HashMap<EndpointDescriptor, DemoShard> = endpoints
        .iter()
        .map(|e| (e.clone(), DemoShard::default()))
        .collect();
    let connect = move |endpoint: &EndpointDescriptor| DemoClient {
        shard: shards[endpoint].clone(),
    };

    let options = ServiceOptions {
        log: Some(log.clone()),
        ..Default::default()
    };
    let service = ShardedCacheService::new(options, endpoints, connect)
        .expect("service");

    service.set("greeting", "hello").expect("set");
    info!(log, "read back"; "greeting" => service.get("greeting").unwrap());

    // Push a capped sorted set past its trigger point and watch the
    // background shrink bring it back down.
    for i in 1..=160u32 {
        let member = format!("event-{}", i);
        service
            .zadd_capped("events", f64::from(i), &member, 100)
            .expect("zadd");
    }
    info!(log, "inserted"; "cardinality" => service.zcard("events").unwrap());

    thread::sleep(time::Duration::from_millis(500));
    info!(
        log,
        "after background shrink";
        "cardinality" => service.zcard("events").unwrap()
    );
}
