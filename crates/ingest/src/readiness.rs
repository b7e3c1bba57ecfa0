use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::object_store::ObjectSummary;

pub const SUCCESS_SENTINEL: &str = "_SUCCESS";
const PARTITION_PREFIX: &str = "part-";
const CHECKSUM_SUFFIX: &str = ".crc";

/// Remembers the last modification time of every `_SUCCESS` sentinel seen
/// per bucket, so each completed run is reported once.
#[derive(Debug, Default)]
pub struct ReadinessTracker {
    seen: HashMap<String, DateTime<Utc>>,
    primed: bool,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sentinel keys in `bucket` that are new or newer than last
    /// time. While the tracker is not yet primed, new sentinels are only
    /// recorded.
    pub fn scan(&mut self, bucket: &str, objects: &[ObjectSummary]) -> Vec<String> {
        let mut ready = Vec::new();
        for object in objects.iter().filter(|object| object.key.ends_with(SUCCESS_SENTINEL)) {
            let history_key = format!("{bucket}/{}", object.key);
            match self.seen.get(&history_key) {
                None => {
                    self.seen.insert(history_key, object.last_modified);
                    if self.primed {
                        ready.push(object.key.clone());
                    } else {
                        debug!(bucket, key = %object.key, "recording existing sentinel");
                    }
                }
                Some(previous) if *previous < object.last_modified => {
                    self.seen.insert(history_key, object.last_modified);
                    ready.push(object.key.clone());
                }
                Some(_) => {}
            }
        }
        ready
    }

    /// Ends the first scan cycle; later scans report new sentinels.
    pub fn prime(&mut self) {
        self.primed = true;
    }
}

/// Partition keys written alongside `sentinel_key`, skipping checksum files.
pub fn partition_keys(sentinel_key: &str, objects: &[ObjectSummary]) -> Vec<String> {
    let path = sentinel_key.strip_suffix(SUCCESS_SENTINEL).unwrap_or(sentinel_key);
    let prefix = format!("{path}{PARTITION_PREFIX}");
    objects
        .iter()
        .map(|object| object.key.as_str())
        .filter(|key| key.starts_with(&prefix) && !key.ends_with(CHECKSUM_SUFFIX))
        .map(str::to_string)
        .collect()
}
