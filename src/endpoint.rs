// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::Error;

/// Default per-connection timeout applied when none is configured.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

// Separator between endpoint items in a configuration string.
const ENDPOINT_SEPARATOR: char = ',';
// Separator between the fields of one endpoint item.
const FIELD_SEPARATOR: char = ':';

/// A type representing one network-addressable shard of the backing
/// key-value cluster.
///
/// Descriptors are built once from configuration at startup and never
/// mutated afterwards; the directory only reclassifies them between its
/// active and broken maps. Two descriptors are equal when their host, port,
/// and logical name match; the weight and timeout fields do not participate
/// in identity.
#[derive(Clone, Debug)]
pub struct EndpointDescriptor {
    /// The host name or address of the endpoint.
    pub host: String,
    /// The port of the endpoint.
    pub port: u16,
    /// The logical name of the endpoint within the cluster.
    pub name: String,
    /// Relative weight parsed from configuration. Currently parsed but not
    /// applied to shard selection.
    pub weight: Option<u32>,
    /// Per-connection timeout for commands sent to this endpoint.
    pub timeout: Duration,
}

impl EndpointDescriptor {
    /// Return a new descriptor with the default connection timeout.
    pub fn new(host: &str, port: u16, name: &str) -> Self {
        EndpointDescriptor {
            host: host.to_string(),
            port,
            name: name.to_string(),
            weight: None,
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl PartialEq for EndpointDescriptor {
    fn eq(&self, other: &EndpointDescriptor) -> bool {
        self.host == other.host
            && self.port == other.port
            && self.name == other.name
    }
}

impl Eq for EndpointDescriptor {}

impl Hash for EndpointDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}({}:{})", self.name, self.host, self.port)
    }
}

/// Parse an endpoint configuration string into a list of descriptors.
///
/// The expected format is `host:port:name[:weight]` items separated by
/// commas. Whitespace around items and empty items are tolerated and
/// skipped. An item with fewer than three or more than four fields, an
/// empty host or name field, or an unparsable port or weight is a fatal
/// configuration error.
pub fn parse_endpoint_list(
    servers: &str,
    timeout: Duration,
) -> Result<Vec<EndpointDescriptor>, Error> {
    if servers.trim().is_empty() {
        return Err(Error::Config(String::from(
            "endpoint list must not be empty",
        )));
    }

    let mut endpoints = Vec::new();
    for item in servers.split(ENDPOINT_SEPARATOR) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }

        let fields: Vec<&str> = item.split(FIELD_SEPARATOR).collect();
        if fields.len() < 3 || fields.len() > 4 {
            return Err(Error::Config(format!(
                "endpoint {:?} does not meet the \
                 'host:port:name[:weight]' format",
                item
            )));
        }

        let host = fields[0];
        if host.is_empty() {
            return Err(Error::Config(format!(
                "'host' field must not be empty: {:?}",
                item
            )));
        }
        let port = fields[1].parse::<u16>().map_err(|_| {
            Error::Config(format!("'port' field is not a port: {:?}", item))
        })?;
        let name = fields[2];
        if name.is_empty() {
            return Err(Error::Config(format!(
                "'name' field must not be empty: {:?}",
                item
            )));
        }

        // The weight is carried through for completeness but shard
        // selection does not consume it yet.
        let weight = match fields.get(3) {
            Some(w) => Some(w.parse::<u32>().map_err(|_| {
                Error::Config(format!(
                    "'weight' field is not a number: {:?}",
                    item
                ))
            })?),
            None => None,
        };

        endpoints.push(EndpointDescriptor {
            host: host.to_string(),
            port,
            name: name.to_string(),
            weight,
            timeout,
        });
    }

    if endpoints.is_empty() {
        return Err(Error::Config(String::from(
            "endpoint list contains no endpoints",
        )));
    }

    Ok(endpoints)
}
