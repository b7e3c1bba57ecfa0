//! Region-attributed scores and their additive merge.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Geographic bucket code, always stored upper-case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Region(String);

impl Region {
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// Returns `None` for blank codes so callers can treat them as "no location".
    pub fn parse(code: &str) -> Option<Self> {
        let region = Self::new(code);
        (!region.0.is_empty()).then_some(region)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Region {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Region> for String {
    fn from(value: Region) -> Self {
        value.0
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionScore {
    pub region: Region,
    pub score: u64,
}

impl RegionScore {
    pub fn new(region: impl AsRef<str>, score: u64) -> Self {
        Self { region: Region::new(region), score }
    }
}

/// Ordered region scores holding at most one entry per region.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionScoreSet(Vec<RegionScore>);

impl RegionScoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from raw entries, folding repeated regions into one entry.
    pub fn from_scores(scores: impl IntoIterator<Item = RegionScore>) -> Self {
        let mut set = Self::new();
        for score in scores {
            set.add(score);
        }
        set
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegionScore> {
        self.0.iter()
    }

    pub fn get(&self, region: &Region) -> Option<&RegionScore> {
        self.0.iter().find(|entry| &entry.region == region)
    }

    /// Score for `region`, zero when the region has no entry.
    pub fn score_for(&self, region: &Region) -> u64 {
        self.get(region).map(|entry| entry.score).unwrap_or(0)
    }

    pub fn add(&mut self, incoming: RegionScore) {
        match self.0.iter_mut().find(|entry| entry.region == incoming.region) {
            Some(existing) => existing.score = existing.score.saturating_add(incoming.score),
            None => self.0.push(incoming),
        }
    }

    /// Adds every incoming region into this set: matching regions sum, new regions append.
    pub fn merge(&mut self, incoming: &RegionScoreSet) {
        for entry in &incoming.0 {
            self.add(entry.clone());
        }
    }

    /// Entries ordered by descending score; ties keep their current order.
    pub fn sorted_by_score(&self) -> RegionScoreSet {
        let mut entries = self.0.clone();
        entries.sort_by(|left, right| right.score.cmp(&left.score));
        Self(entries)
    }
}

impl FromIterator<RegionScore> for RegionScoreSet {
    fn from_iter<T: IntoIterator<Item = RegionScore>>(iter: T) -> Self {
        Self::from_scores(iter)
    }
}
