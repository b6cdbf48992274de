//! Codec for RankLib-style feature files.
//!
//! Input lines look like
//! `0 qid:3 1:0.25 2:0.5 ... #queryID+entityID_paragraphID`:
//! a relevance label, a query number, `index:value` feature pairs, and a
//! comment naming the (query, entity, paragraph) the vector belongs to.
//! The averaging step collapses the per-entity vectors of a paragraph
//! into one mean vector and re-emits the file keyed by paragraph alone.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::error::{FuseError, FuseResult};
use crate::fusion::average_vectors;
use crate::run_file::ParseStats;

/// Feature vectors grouped `QueryID -> ParagraphID -> per-entity vectors`,
/// in insertion order at every level.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    queries: Vec<String>,
    by_query: HashMap<String, ParagraphVectors>,
}

#[derive(Debug, Clone, Default)]
pub struct ParagraphVectors {
    paragraphs: Vec<String>,
    by_paragraph: HashMap<String, Vec<(String, Vec<f64>)>>,
}

impl ParagraphVectors {
    fn insert(&mut self, paragraph: &str, entity: &str, vector: Vec<f64>) {
        if !self.by_paragraph.contains_key(paragraph) {
            self.paragraphs.push(paragraph.to_string());
        }
        let vectors = self.by_paragraph.entry(paragraph.to_string()).or_default();
        match vectors.iter_mut().find(|(seen, _)| seen == entity) {
            Some((_, existing)) => *existing = vector,
            None => vectors.push((entity.to_string(), vector)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[(String, Vec<f64>)])> {
        self.paragraphs
            .iter()
            .map(|paragraph| (paragraph.as_str(), self.by_paragraph[paragraph].as_slice()))
    }
}

impl FeatureTable {
    pub fn insert(&mut self, query: &str, entity: &str, paragraph: &str, vector: Vec<f64>) {
        if !self.by_query.contains_key(query) {
            self.queries.push(query.to_string());
        }
        self.by_query
            .entry(query.to_string())
            .or_default()
            .insert(paragraph, entity, vector);
    }

    pub fn queries(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn get(&self, query: &str) -> Option<&ParagraphVectors> {
        self.by_query.get(query)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

fn parse_feature_line(line: &str, prefix: &Regex) -> FuseResult<(String, String, String, Vec<f64>)> {
    let (body, info) = line
        .split_once('#')
        .ok_or_else(|| FuseError::malformed("missing #info comment"))?;

    if !prefix.is_match(body.trim_start()) {
        return Err(FuseError::malformed("missing relevance/qid prefix"));
    }

    // Entity names may contain underscores; paragraph IDs never do, so the
    // last underscore separates the topic from the paragraph.
    let (topic, paragraph) = info
        .trim()
        .rsplit_once('_')
        .ok_or_else(|| FuseError::malformed("info comment is not topic_paragraph"))?;
    let (query, entity) = topic
        .split_once('+')
        .ok_or_else(|| FuseError::malformed("topic is not a query+entity composite"))?;
    if query.is_empty() || entity.is_empty() || paragraph.is_empty() {
        return Err(FuseError::malformed("empty query, entity, or paragraph id"));
    }

    let mut vector = Vec::new();
    for token in body.split_whitespace() {
        let Some((_, value)) = token.split_once(':') else {
            continue;
        };
        if token.starts_with("qid:") {
            continue;
        }
        let parsed: f64 = value.parse().map_err(|_| FuseError::number(value))?;
        vector.push(parsed);
    }

    Ok((
        query.to_string(),
        entity.to_string(),
        paragraph.to_string(),
        vector,
    ))
}

pub fn parse_feature_lines<'a, I>(lines: I) -> Result<(FeatureTable, ParseStats)>
where
    I: IntoIterator<Item = &'a str>,
{
    let prefix =
        Regex::new(r"^\d+\s+qid:\S+").context("failed to compile feature prefix regex")?;
    let mut table = FeatureTable::default();
    let mut stats = ParseStats::default();

    for (number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        match parse_feature_line(line, &prefix) {
            Ok((query, entity, paragraph, vector)) => {
                table.insert(&query, &entity, &paragraph, vector);
                stats.parsed += 1;
            }
            Err(err) => {
                warn!(line = number + 1, error = %err, "skipping feature line");
                stats.skipped += 1;
            }
        }
    }

    Ok((table, stats))
}

pub fn load_feature_file(path: &Path) -> Result<(FeatureTable, ParseStats)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read feature file: {}", path.display()))?;
    parse_feature_lines(text.lines())
}

/// Binary relevance judgments: `<query> 0 <docid> <rel>` per line, one
/// entry per judged document.
#[derive(Debug, Clone, Default)]
pub struct QrelSet {
    by_query: HashMap<String, HashSet<String>>,
}

impl QrelSet {
    pub fn contains_query(&self, query: &str) -> bool {
        self.by_query.contains_key(query)
    }

    pub fn is_relevant(&self, query: &str, doc: &str) -> bool {
        self.by_query
            .get(query)
            .is_some_and(|docs| docs.contains(doc))
    }
}

pub fn parse_qrel_lines<'a, I>(lines: I) -> (QrelSet, ParseStats)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut qrels = QrelSet::default();
    let mut stats = ParseStats::default();

    for (number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            warn!(line = number + 1, "skipping qrel line: expected 4 fields");
            stats.skipped += 1;
            continue;
        }
        let relevance: i64 = match fields[3].parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(line = number + 1, value = fields[3], "skipping qrel line: bad relevance");
                stats.skipped += 1;
                continue;
            }
        };
        stats.parsed += 1;
        if relevance > 0 {
            qrels
                .by_query
                .entry(fields[0].to_string())
                .or_default()
                .insert(fields[2].to_string());
        }
    }

    (qrels, stats)
}

pub fn load_qrels(path: &Path) -> Result<(QrelSet, ParseStats)> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read qrels file: {}", path.display()))?;
    Ok(parse_qrel_lines(text.lines()))
}

/// Accounting for the averaging pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct AverageStats {
    pub queries_without_judgments: usize,
    pub paragraphs_averaged: usize,
    pub paragraphs_skipped: usize,
}

/// Collapses per-entity vectors to per-paragraph means and renders the
/// output feature file. Queries without judgments are dropped (logged);
/// a paragraph whose vectors disagree on dimensionality is skipped, not
/// fatal. Output qids are sequential and 1-based in query insertion
/// order.
pub fn average_and_render(
    table: &FeatureTable,
    qrels: &QrelSet,
    dimensions: usize,
) -> (Vec<String>, AverageStats) {
    let mut lines = Vec::new();
    let mut stats = AverageStats::default();

    for (qid, query) in table.queries().enumerate() {
        if !qrels.contains_query(query) {
            warn!(query, "no ground truth for query; dropping its paragraphs");
            stats.queries_without_judgments += 1;
            continue;
        }
        let Some(paragraphs) = table.get(query) else {
            continue;
        };

        for (paragraph, entries) in paragraphs.iter() {
            let vectors: Vec<Vec<f64>> =
                entries.iter().map(|(_, vector)| vector.clone()).collect();
            let averaged = match average_vectors(&vectors, dimensions) {
                Ok(averaged) => averaged,
                Err(err) => {
                    warn!(query, paragraph, error = %err, "skipping paragraph");
                    stats.paragraphs_skipped += 1;
                    continue;
                }
            };

            let relevance = i32::from(qrels.is_relevant(query, paragraph));
            lines.push(render_feature_line(
                relevance,
                qid + 1,
                &averaged,
                query,
                paragraph,
            ));
            stats.paragraphs_averaged += 1;
        }
    }

    (lines, stats)
}

fn render_feature_line(
    relevance: i32,
    qid: usize,
    vector: &[f64],
    query: &str,
    paragraph: &str,
) -> String {
    let mut line = format!("{relevance} qid:{qid}");
    for (index, value) in vector.iter().enumerate() {
        line.push_str(&format!(" {}:{}", index + 1, value));
    }
    line.push_str(&format!(" #{query}_{paragraph}"));
    line
}
