//! Port publishing specs.
//!
//! Accepts the same shapes as `docker run -p`:
//!
//! - `6379` (expose only)
//! - `50003:6379`
//! - `127.0.0.1:50003:6379`
//! - `127.0.0.1::6379` (any host port)
//! - `[::1]:50003:6379`
//! - `8000-8002:9000-9002/udp`

use std::collections::{BTreeMap, BTreeSet};

use crate::engine::error::{EngineError, Result};

/// One host-side binding for a container port.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostBinding {
    /// Host interface; empty means all interfaces.
    pub host_ip: String,
    /// Host port; empty lets the engine choose.
    pub host_port: String,
}

/// Exposed ports and their host bindings, keyed by `port/proto`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMappings {
    pub exposed: BTreeSet<String>,
    pub bindings: BTreeMap<String, Vec<HostBinding>>,
}

impl PortMappings {
    pub fn is_empty(&self) -> bool {
        self.exposed.is_empty()
    }
}

/// Parse a list of specs into exposed ports and bindings.
pub fn parse_port_specs(specs: &[String]) -> Result<PortMappings> {
    let mut mappings = PortMappings::default();

    for spec in specs {
        for (key, binding) in parse_one(spec)? {
            mappings.exposed.insert(key.clone());
            let entry = mappings.bindings.entry(key).or_default();
            if !entry.contains(&binding) {
                entry.push(binding);
            }
        }
    }

    Ok(mappings)
}

fn parse_one(spec: &str) -> Result<Vec<(String, HostBinding)>> {
    let invalid = |reason: &str| EngineError::InvalidPortSpec {
        spec: spec.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = spec.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty"));
    }

    let (body, proto) = match trimmed.rsplit_once('/') {
        Some((body, proto)) => (body, proto.to_ascii_lowercase()),
        None => (trimmed, "tcp".to_string()),
    };
    if !matches!(proto.as_str(), "tcp" | "udp" | "sctp") {
        return Err(invalid("protocol must be tcp, udp or sctp"));
    }

    let (host_ip, host_port, container_port) = split_address(body).ok_or_else(|| {
        invalid("expected [ip:][host_port:]container_port")
    })?;

    let container = parse_range(container_port)
        .ok_or_else(|| invalid("container port must be a number or range"))?;
    let host = if host_port.is_empty() {
        None
    } else {
        Some(parse_range(host_port).ok_or_else(|| invalid("host port must be a number or range"))?)
    };

    let container_len = container.1 - container.0;
    if let Some(host) = host
        && host.1 - host.0 != container_len
    {
        return Err(invalid("host and container port ranges differ in size"));
    }

    let mut out = Vec::with_capacity(usize::from(container_len) + 1);
    for offset in 0..=container_len {
        let key = format!("{}/{}", container.0 + offset, proto);
        let binding = HostBinding {
            host_ip: host_ip.to_string(),
            host_port: host
                .map(|h| (h.0 + offset).to_string())
                .unwrap_or_default(),
        };
        out.push((key, binding));
    }
    Ok(out)
}

/// Split `ip:host:container`, allowing a bracketed IPv6 address.
fn split_address(body: &str) -> Option<(&str, &str, &str)> {
    if let Some(stripped) = body.strip_prefix('[') {
        let (ip, rest) = stripped.split_once(']')?;
        let rest = rest.strip_prefix(':')?;
        let (host, container) = rest.split_once(':')?;
        return Some((ip, host, container));
    }

    let parts: Vec<&str> = body.split(':').collect();
    match parts.as_slice() {
        [container] => Some(("", "", container)),
        [host, container] => Some(("", host, container)),
        [ip, host, container] => Some((ip, host, container)),
        _ => None,
    }
}

fn parse_range(s: &str) -> Option<(u16, u16)> {
    let (start, end) = match s.split_once('-') {
        Some((a, b)) => (a.parse().ok()?, b.parse().ok()?),
        None => {
            let p = s.parse().ok()?;
            (p, p)
        }
    };
    if start == 0 || start > end {
        return None;
    }
    Some((start, end))
}
