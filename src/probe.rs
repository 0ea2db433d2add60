// Copyright 2020 Joyent, Inc.

//! Liveness probing of a single endpoint.

use crate::connection::NodeClient;

/// The reply that marks an endpoint as healthy. Anything else is failure.
pub const LIVENESS_REPLY: &str = "PONG";

/// Probe one endpoint and collapse every outcome into a boolean.
///
/// A reply that does not match the sentinel is retried up to `retries` more
/// times; this helps when the server is briefly overloaded. A
/// transport-level error fails immediately with no retries consumed, since
/// retrying a dead socket buys nothing. Errors never propagate to the
/// caller.
pub fn detect<C>(client: &mut C, retries: u32) -> bool
where
    C: NodeClient,
{
    match client.ping() {
        Ok(ref reply) if reply == LIVENESS_REPLY => true,
        Ok(_) => {
            let mut remaining = retries;
            while remaining > 0 {
                match client.ping() {
                    Ok(ref reply) if reply == LIVENESS_REPLY => return true,
                    Ok(_) => remaining -= 1,
                    Err(_) => return false,
                }
            }
            false
        }
        Err(_) => false,
    }
}
