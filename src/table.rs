use std::collections::HashMap;

use crate::error::{FuseError, FuseResult};

/// A passage (or entity) identifier paired with its fused score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub key: String,
    pub score: f64,
}

/// Insertion-ordered `ParagraphID -> Score` map.
///
/// Run files are streamed line by line, so a duplicate key within one
/// source overwrites the earlier score while keeping its original
/// position. Iteration order is insertion order, which downstream sorting
/// relies on as the tie-break.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreMap {
    entries: Vec<(String, f64)>,
    index: HashMap<String, usize>,
}

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or overwrites a score (last-write-wins within a single source).
    pub fn insert(&mut self, key: &str, score: f64) {
        if let Some(&position) = self.index.get(key) {
            self.entries[position].1 = score;
            return;
        }
        self.index.insert(key.to_string(), self.entries.len());
        self.entries.push((key.to_string(), score));
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.index.get(key).map(|&position| self.entries[position].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(key, score)| (key.as_str(), *score))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    /// Combines overlapping keys with `combine`; copies the rest. New keys
    /// append in the other map's iteration order.
    pub fn merge(&mut self, other: &ScoreMap, combine: impl Fn(f64, f64) -> f64) {
        for (key, score) in other.iter() {
            match self.index.get(key) {
                Some(&position) => {
                    let existing = self.entries[position].1;
                    self.entries[position].1 = combine(existing, score);
                }
                None => self.insert(key, score),
            }
        }
    }

    pub fn into_entries(self) -> Vec<ScoredEntry> {
        self.entries
            .into_iter()
            .map(|(key, score)| ScoredEntry { key, score })
            .collect()
    }
}

impl FromIterator<(String, f64)> for ScoreMap {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        let mut map = ScoreMap::new();
        for (key, score) in iter {
            map.insert(&key, score);
        }
        map
    }
}

/// Two-level ranking, `QueryID -> (ParagraphID -> Score)`, for entity-less
/// run files such as an entity ranking or a candidate passage ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ranking {
    queries: Vec<String>,
    by_query: HashMap<String, ScoreMap>,
}

impl Ranking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: &str, doc: &str, score: f64) {
        if !self.by_query.contains_key(query) {
            self.queries.push(query.to_string());
        }
        self.by_query
            .entry(query.to_string())
            .or_default()
            .insert(doc, score);
    }

    /// Absence means "no candidates for this query", never a fatal state.
    pub fn get(&self, query: &str) -> FuseResult<&ScoreMap> {
        self.by_query
            .get(query)
            .ok_or_else(|| FuseError::not_found(query))
    }

    pub fn contains_query(&self, query: &str) -> bool {
        self.by_query.contains_key(query)
    }

    /// Fresh iterator per call, deterministic insertion order.
    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn merge(&mut self, other: &Ranking, combine: impl Fn(f64, f64) -> f64 + Copy) {
        for query in other.queries() {
            let incoming = &other.by_query[query];
            if !self.by_query.contains_key(query) {
                self.queries.push(query.to_string());
            }
            self.by_query
                .entry(query.to_string())
                .or_default()
                .merge(incoming, combine);
        }
    }
}

/// Insertion-ordered `EntityID -> (ParagraphID -> Score)` map for one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityScores {
    entities: Vec<String>,
    by_entity: HashMap<String, ScoreMap>,
}

impl EntityScores {
    pub fn insert(&mut self, entity: &str, doc: &str, score: f64) {
        if !self.by_entity.contains_key(entity) {
            self.entities.push(entity.to_string());
        }
        self.by_entity
            .entry(entity.to_string())
            .or_default()
            .insert(doc, score);
    }

    pub fn get(&self, entity: &str) -> FuseResult<&ScoreMap> {
        self.by_entity
            .get(entity)
            .ok_or_else(|| FuseError::not_found(entity))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ScoreMap)> {
        self.entities
            .iter()
            .map(|entity| (entity.as_str(), &self.by_entity[entity]))
    }

    fn merge(&mut self, other: &EntityScores, combine: impl Fn(f64, f64) -> f64 + Copy) {
        for (entity, incoming) in other.iter() {
            if !self.by_entity.contains_key(entity) {
                self.entities.push(entity.to_string());
            }
            self.by_entity
                .entry(entity.to_string())
                .or_default()
                .merge(incoming, combine);
        }
    }
}

/// Three-level ranking, `QueryID -> EntityID -> (ParagraphID -> Score)`,
/// built from a support-passage run file with composite topics.
///
/// Constructed once per input file by the run-file codec and read-only
/// afterwards, so concurrent per-query workers can share a reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingTable {
    queries: Vec<String>,
    by_query: HashMap<String, EntityScores>,
}

impl RankingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, query: &str, entity: &str, doc: &str, score: f64) {
        if !self.by_query.contains_key(query) {
            self.queries.push(query.to_string());
        }
        self.by_query
            .entry(query.to_string())
            .or_default()
            .insert(entity, doc, score);
    }

    pub fn get(&self, query: &str) -> FuseResult<&EntityScores> {
        self.by_query
            .get(query)
            .ok_or_else(|| FuseError::not_found(query))
    }

    pub fn get_entity(&self, query: &str, entity: &str) -> FuseResult<&ScoreMap> {
        self.get(query)?.get(entity)
    }

    /// Fresh iterator per call, deterministic insertion order.
    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// The only operation that aggregates across multiple source files.
    pub fn merge(&mut self, other: &RankingTable, combine: impl Fn(f64, f64) -> f64 + Copy) {
        for query in other.queries() {
            let incoming = &other.by_query[query];
            if !self.by_query.contains_key(query) {
                self.queries.push(query.to_string());
            }
            self.by_query
                .entry(query.to_string())
                .or_default()
                .merge(incoming, combine);
        }
    }
}
