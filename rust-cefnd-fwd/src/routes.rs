//! Static route file.
//!
//! One route per line: `prefix protocol next-hop...`, whitespace separated.
//! `#` starts a comment. A next hop is `host[:port]`; IPv6 literals are
//! written in brackets when a port is given (`[::1]:9000`).

use rust_cefnd_common::message::Name;
use rust_cefnd_common::types::{FaceType, DEFAULT_PORT};
use rust_cefnd_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One parsed line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    pub prefix: String,
    pub face_type: FaceType,
    /// `host:port`, port filled in.
    pub next_hops: Vec<String>,
}

impl RouteSpec {
    pub fn name(&self) -> Name {
        Name::from_string(&self.prefix)
    }
}

pub fn load_routes(path: &Path) -> Result<Vec<RouteSpec>> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Cannot read route file {}: {}", path.display(), e)))?;
    parse_routes(&text)
}

pub fn parse_routes(text: &str) -> Result<Vec<RouteSpec>> {
    let mut routes = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        let mut fields = line.split_whitespace();
        let prefix = match fields.next() {
            Some(prefix) => prefix,
            None => continue,
        };
        let lineno = index + 1;

        let protocol = fields
            .next()
            .ok_or_else(|| Error::Config(format!("line {}: missing protocol", lineno)))?;
        let face_type = match FaceType::from_protocol(protocol) {
            Some(t @ (FaceType::Udp | FaceType::Tcp)) => t,
            _ => {
                return Err(Error::Config(format!(
                    "line {}: unsupported protocol '{}' (udp or tcp)",
                    lineno, protocol
                )))
            }
        };

        let next_hops = fields
            .map(|hop| normalize_next_hop(hop).map_err(|e| Error::Config(format!("line {}: {}", lineno, e))))
            .collect::<Result<Vec<_>>>()?;
        if next_hops.is_empty() {
            return Err(Error::Config(format!("line {}: no next hop for {}", lineno, prefix)));
        }

        routes.push(RouteSpec {
            prefix: prefix.to_string(),
            face_type,
            next_hops,
        });
    }
    Ok(routes)
}

/// `host[:port]` → `host:port` with the default port applied.
pub fn normalize_next_hop(hop: &str) -> std::result::Result<String, String> {
    if hop.is_empty() {
        return Err("empty next hop".into());
    }

    if let Some(rest) = hop.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 literal '{}'", hop))?;
        let port = match tail {
            "" => DEFAULT_PORT,
            _ => parse_port(tail.strip_prefix(':').unwrap_or(tail), hop)?,
        };
        return Ok(format!("[{}]:{}", host, port));
    }

    // A bare IPv6 literal has more than one colon and no port.
    if hop.matches(':').count() > 1 {
        return Ok(format!("[{}]:{}", hop, DEFAULT_PORT));
    }

    match hop.split_once(':') {
        Some((host, port)) if !host.is_empty() => Ok(format!("{}:{}", host, parse_port(port, hop)?)),
        Some(_) => Err(format!("missing host in '{}'", hop)),
        None => Ok(format!("{}:{}", hop, DEFAULT_PORT)),
    }
}

fn parse_port(port: &str, hop: &str) -> std::result::Result<u16, String> {
    port.parse::<u16>()
        .map_err(|_| format!("invalid port in '{}'", hop))
}
