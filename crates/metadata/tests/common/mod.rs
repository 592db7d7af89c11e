//! Common test utilities and fixtures.

use hitspool_core::{HubSet, Prefix, Request};

pub fn request(id: &str, start_tick: i64) -> Request {
    Request {
        id: id.to_string(),
        username: "sndaq".to_string(),
        prefix: Prefix::SnAlert,
        start_tick,
        stop_tick: start_tick + 50_000_000_000,
        destination_dir: "/mnt/data/pdaqlocal/HsDataCopy".to_string(),
        hubs: HubSet::all(),
        extract: false,
    }
}
