//! Hub names and hub restriction sets.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Hub numbers at or above this offset are IceTop hubs (`201` is `ithub01`).
const ICETOP_OFFSET: u32 = 200;

/// Highest in-ice hub number.
const MAX_INICE_HUB: u32 = 86;

/// Highest IceTop hub number.
const MAX_ICETOP_HUB: u32 = 81;

/// Short name of the local host, used as this hub's identity.
pub fn local_hub_name() -> String {
    let host = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());
    short_host_name(&host).to_string()
}

/// Strip any domain from a host name (`ichub01.spts.icecube.wisc.edu` -> `ichub01`).
pub fn short_host_name(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Name of an in-ice (`ichub`) or IceTop (`ithub`) hub by number.
pub fn hub_name(number: u32, icetop: bool) -> String {
    if icetop {
        format!("ithub{number:02}")
    } else {
        format!("ichub{number:02}")
    }
}

/// Optional restriction of a request to a subset of hubs.
///
/// An empty set means every subscribed hub.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HubSet(BTreeSet<String>);

impl HubSet {
    /// The unrestricted set.
    pub fn all() -> Self {
        Self::default()
    }

    /// Parse a restriction list.
    ///
    /// Entries are separated by commas or whitespace. Each entry is a hub
    /// name (`ichub05`), a number (`5`, `205` for IceTop), a shorthand
    /// (`i5`, `t3`), or an inclusive range of numbers (`1-3`, `t1-2`).
    pub fn parse(input: &str) -> Result<Self> {
        let mut hubs = BTreeSet::new();
        for token in input
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            parse_token(token, &mut hubs)?;
        }
        Ok(Self(hubs))
    }

    /// Build a set from explicit names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            names
                .into_iter()
                .map(|n| short_host_name(n.as_ref()).to_ascii_lowercase())
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `hub` takes part in a request with this restriction.
    pub fn includes(&self, hub: &str) -> bool {
        self.0.is_empty() || self.0.contains(short_host_name(hub))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Comma-separated names, empty for the unrestricted set.
impl fmt::Display for HubSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.iter().collect();
        f.write_str(&joined.join(","))
    }
}

fn parse_token(token: &str, hubs: &mut BTreeSet<String>) -> Result<()> {
    let lower = token.to_ascii_lowercase();
    if lower.starts_with("ichub") || lower.starts_with("ithub") {
        let (kind, digits) = lower.split_at(5);
        let number = parse_number(digits, token)?;
        hubs.insert(numbered_hub(number, Some(kind == "ithub"), token)?);
        return Ok(());
    }

    let (icetop, body) = match lower.chars().next() {
        Some('i') => (Some(false), &lower[1..]),
        Some('t') => (Some(true), &lower[1..]),
        _ => (None, lower.as_str()),
    };

    let (first, last) = match body.split_once('-') {
        Some((a, b)) => (parse_number(a, token)?, parse_number(b, token)?),
        None => {
            let n = parse_number(body, token)?;
            (n, n)
        }
    };
    if first > last {
        return Err(Error::BadHubList(format!("descending range {token:?}")));
    }
    // Both ends must name real hubs before the range is walked.
    numbered_hub(first, icetop, token)?;
    numbered_hub(last, icetop, token)?;

    for number in first..=last {
        hubs.insert(numbered_hub(number, icetop, token)?);
    }
    Ok(())
}

/// Hub named by `number`. Without an explicit kind, numbers past
/// `ICETOP_OFFSET` are IceTop hubs.
fn numbered_hub(number: u32, icetop: Option<bool>, token: &str) -> Result<String> {
    let (number, top) = match icetop {
        Some(top) => (number, top),
        None if number > ICETOP_OFFSET => (number - ICETOP_OFFSET, true),
        None => (number, false),
    };
    let max = if top { MAX_ICETOP_HUB } else { MAX_INICE_HUB };
    if number > max {
        return Err(Error::BadHubList(format!("no such hub in {token:?}")));
    }
    Ok(hub_name(number, top))
}

fn parse_number(digits: &str, token: &str) -> Result<u32> {
    match digits.parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::BadHubList(format!("bad hub entry {token:?}"))),
        Ok(n) => Ok(n),
    }
}
