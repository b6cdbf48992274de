//! Codec for TREC-style run files: `<topic> Q0 <docid> <rank> <score> <tag>`.
//!
//! Parsing is tolerant of research-grade data: malformed lines are
//! reported to the caller, logged with their line number, and skipped —
//! a bad line never aborts the file.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::error::{FuseError, FuseResult};
use crate::table::{Ranking, RankingTable, ScoredEntry};

/// One parsed run-file record. `topic` is kept verbatim; composite
/// `query+entity` topics are split on demand via [`RunLine::split_topic`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunLine {
    pub topic: String,
    pub doc: String,
    pub rank: usize,
    pub score: f64,
    pub tag: String,
}

impl RunLine {
    /// Splits a composite `QueryID+EntityID` topic on the first `+`.
    pub fn split_topic(&self) -> (&str, Option<&str>) {
        match self.topic.split_once('+') {
            Some((query, entity)) => (query, Some(entity)),
            None => (self.topic.as_str(), None),
        }
    }
}

/// Parses one whitespace-delimited run line. Extra trailing whitespace is
/// tolerated; fewer than 6 fields or a non-numeric score are errors the
/// caller is expected to log and skip.
pub fn parse_line(line: &str) -> FuseResult<RunLine> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return Err(FuseError::malformed(format!(
            "expected 6 fields, found {}",
            fields.len()
        )));
    }

    let score: f64 = fields[4]
        .parse()
        .map_err(|_| FuseError::number(fields[4]))?;
    // The rank field is informational on input; re-ranking assigns fresh
    // ranks, so a junk value degrades to zero instead of skipping the line.
    let rank: usize = fields[3].parse().unwrap_or(0);

    Ok(RunLine {
        topic: fields[0].to_string(),
        doc: fields[2].to_string(),
        rank,
        score,
        tag: fields[5].to_string(),
    })
}

/// Line-accounting for one parsed input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: usize,
    pub parsed: usize,
    pub skipped: usize,
}

/// Builds a three-level table from support-passage run lines, whose topics
/// must carry an entity qualifier (`query+entity`).
pub fn parse_support_lines<'a, I>(lines: I) -> (RankingTable, ParseStats)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut table = RankingTable::new();
    let mut stats = ParseStats::default();

    for (number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let parsed = parse_line(line).and_then(|record| {
            let (query, entity) = match record.split_topic() {
                (query, Some(entity)) if !query.is_empty() && !entity.is_empty() => {
                    (query.to_string(), entity.to_string())
                }
                _ => {
                    return Err(FuseError::malformed(
                        "topic is not a query+entity composite",
                    ));
                }
            };
            Ok((query, entity, record.doc, record.score))
        });

        match parsed {
            Ok((query, entity, doc, score)) => {
                table.insert(&query, &entity, &doc, score);
                stats.parsed += 1;
            }
            Err(err) => {
                warn!(line = number + 1, error = %err, "skipping run line");
                stats.skipped += 1;
            }
        }
    }

    (table, stats)
}

/// Builds a two-level ranking from entity-less run lines; the whole topic
/// is the query key.
pub fn parse_ranking_lines<'a, I>(lines: I) -> (Ranking, ParseStats)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut ranking = Ranking::new();
    let mut stats = ParseStats::default();

    for (number, line) in lines.into_iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        match parse_line(line) {
            Ok(record) => {
                ranking.insert(&record.topic, &record.doc, record.score);
                stats.parsed += 1;
            }
            Err(err) => {
                warn!(line = number + 1, error = %err, "skipping run line");
                stats.skipped += 1;
            }
        }
    }

    (ranking, stats)
}

pub fn load_support_table(path: &Path) -> Result<(RankingTable, ParseStats)> {
    let text = read_file(path)?;
    Ok(parse_support_lines(text.lines()))
}

pub fn load_ranking(path: &Path) -> Result<(Ranking, ParseStats)> {
    let text = read_file(path)?;
    Ok(parse_ranking_lines(text.lines()))
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .with_context(|| format!("failed to read run file: {}", path.display()))
}

/// Formats a score with full round-trip precision, padded to at least two
/// decimal places so distinct ranked values never collapse to equal text.
pub fn format_score(score: f64) -> String {
    let text = format!("{score}");
    match text.split_once('.') {
        Some((_, fraction)) if fraction.len() >= 2 => text,
        Some((whole, fraction)) => format!("{whole}.{fraction:0<2}"),
        None => format!("{text}.00"),
    }
}

/// A ranked, pre-sorted result set for one output topic. Ranks are
/// implicit: entry `i` is written with rank `i + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub topic: String,
    pub entries: Vec<ScoredEntry>,
}

/// Accounting for one written run file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub lines_written: usize,
    pub duplicates_suppressed: usize,
}

/// Writes ranked results in run-file format, one topic after another.
///
/// If the same docid would be emitted twice for one topic, only the first
/// (highest-scoring, since entries are pre-sorted) occurrence is kept, so
/// downstream recall counts are not inflated.
pub fn write_run_file(path: &Path, results: &[RankedResult], tag: &str) -> Result<WriteStats> {
    let file = File::create(path)
        .with_context(|| format!("failed to create run file: {}", path.display()))?;
    let mut output = BufWriter::new(file);
    let mut stats = WriteStats::default();

    for result in results {
        let mut seen = std::collections::HashSet::new();
        let mut rank = 1_usize;
        for entry in &result.entries {
            if !seen.insert(entry.key.as_str()) {
                stats.duplicates_suppressed += 1;
                continue;
            }
            writeln!(
                output,
                "{} Q0 {} {} {} {}",
                result.topic,
                entry.key,
                rank,
                format_score(entry.score),
                tag
            )
            .with_context(|| format!("failed to write run file: {}", path.display()))?;
            rank += 1;
            stats.lines_written += 1;
        }
    }

    output
        .flush()
        .with_context(|| format!("failed to flush run file: {}", path.display()))?;
    Ok(stats)
}

/// Renders a three-level table back into run lines with composite topics.
/// Together with [`parse_support_lines`] this round-trips any table built
/// from well-formed input.
pub fn serialize_table(table: &RankingTable, tag: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for query in table.queries() {
        let Ok(entities) = table.get(query) else {
            continue;
        };
        for (entity, scores) in entities.iter() {
            for (position, (doc, score)) in scores.iter().enumerate() {
                lines.push(format!(
                    "{query}+{entity} Q0 {doc} {} {} {tag}",
                    position + 1,
                    format_score(score)
                ));
            }
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::ScoredEntry;

    #[test]
    fn parse_line_splits_composite_topic() {
        let record = parse_line("enwiki:Query+enwiki:Entity Q0 para7 3 0.42 some-tag").unwrap();
        assert_eq!(record.doc, "para7");
        assert_eq!(record.rank, 3);
        assert_eq!(record.score, 0.42);
        assert_eq!(record.tag, "some-tag");
        assert_eq!(
            record.split_topic(),
            ("enwiki:Query", Some("enwiki:Entity"))
        );
    }

    #[test]
    fn parse_line_without_entity_keeps_whole_topic() {
        let record = parse_line("plainquery Q0 para1 1 1.5 tag  ").unwrap();
        assert_eq!(record.split_topic(), ("plainquery", None));
    }

    #[test]
    fn parse_line_rejects_short_lines() {
        let err = parse_line("q1 Q0 para1 1 0.5").unwrap_err();
        assert!(matches!(err, FuseError::MalformedLine { .. }));
    }

    #[test]
    fn parse_line_rejects_non_numeric_scores() {
        let err = parse_line("q1 Q0 para1 1 not-a-score tag").unwrap_err();
        assert_eq!(err, FuseError::number("not-a-score"));
    }

    #[test]
    fn support_parser_skips_bad_lines_and_counts_them() {
        let lines = vec![
            "q1+e1 Q0 p1 1 0.5 tag",
            "",
            "q1+e1 Q0 p2 2 bogus tag",
            "q1 Q0 p3 1 0.5 tag",
            "q1+e2 Q0 p3 1 0.25 tag",
        ];

        let (table, stats) = parse_support_lines(lines);
        assert_eq!(stats.lines, 4);
        assert_eq!(stats.parsed, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(table.get_entity("q1", "e1").unwrap().get("p1"), Some(0.5));
        assert_eq!(table.get_entity("q1", "e2").unwrap().get("p3"), Some(0.25));
    }

    #[test]
    fn format_score_pads_to_two_decimals_and_keeps_precision() {
        assert_eq!(format_score(1.0), "1.00");
        assert_eq!(format_score(0.5), "0.50");
        assert_eq!(format_score(0.123456789), "0.123456789");
        assert_eq!(format_score(12.25), "12.25");
    }

    #[test]
    fn serialize_then_parse_round_trips_the_table() {
        let mut table = RankingTable::new();
        table.insert("q1", "e1", "p1", 0.75);
        table.insert("q1", "e1", "p2", 0.5);
        table.insert("q1", "e2", "p1", 0.25);
        table.insert("q2", "e3", "p9", 1.0);

        let lines = serialize_table(&table, "round-trip");
        let (reparsed, stats) =
            parse_support_lines(lines.iter().map(String::as_str));

        assert_eq!(stats.skipped, 0);
        assert_eq!(reparsed, table);
    }

    #[test]
    fn writer_deduplicates_docids_within_a_topic() {
        let dir = std::env::temp_dir().join("rankfuse-codec-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dedup.run");

        let results = vec![RankedResult {
            topic: "q1".to_string(),
            entries: vec![
                ScoredEntry {
                    key: "pX".to_string(),
                    score: 1.0,
                },
                ScoredEntry {
                    key: "pY".to_string(),
                    score: 0.8,
                },
                ScoredEntry {
                    key: "pX".to_string(),
                    score: 0.3,
                },
            ],
        }];

        let stats = write_run_file(&path, &results, "dedup-tag").unwrap();
        assert_eq!(stats.lines_written, 2);
        assert_eq!(stats.duplicates_suppressed, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec!["q1 Q0 pX 1 1.00 dedup-tag", "q1 Q0 pY 2 0.80 dedup-tag"]);
    }
}
