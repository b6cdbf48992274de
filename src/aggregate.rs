//! Per-query fusion driver.
//!
//! Queries are independent, so they run on a fixed-size rayon worker pool
//! over read-only ranking tables. Per-query failures are logged and never
//! abort sibling queries. The writer policy is pinned: results are
//! buffered and emitted sorted by query ID, so output content is
//! deterministic regardless of worker completion order.

use std::path::Path;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::error::FuseResult;
use crate::run_file::{self, RankedResult, WriteStats};
use crate::table::{ScoreMap, ScoredEntry};

/// Lifecycle of one query inside the driver. `Written` is terminal;
/// queries with no candidates after loading jump straight to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPhase {
    Pending,
    Loaded,
    Scored,
    Ranked,
    Written,
}

/// Working state for one query's fusion step: the merged candidate scores
/// plus bookkeeping about the sources that contributed. Created and
/// dropped inside a single worker, never shared across threads.
#[derive(Debug, Default)]
pub struct FusionContext {
    merged: ScoreMap,
    sources: usize,
    entities_skipped: usize,
}

impl FusionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one source's partial scores into the merged map. Paragraphs
    /// proposed by several entities accumulate by summation.
    pub fn absorb(&mut self, partial: ScoreMap) {
        self.sources += 1;
        self.merged.merge(&partial, |a, b| a + b);
    }

    /// Records an entity that contributed nothing (absent upstream score
    /// or no usable annotations).
    pub fn skip_entity(&mut self) {
        self.entities_skipped += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }
}

/// Terminal record for one query.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub query: String,
    pub phase: QueryPhase,
    pub entries: Vec<ScoredEntry>,
    pub sources: usize,
    pub entities_skipped: usize,
    pub failed: bool,
}

/// Aggregated accounting for a whole fusion run.
#[derive(Debug, Clone, Copy, Default)]
pub struct FuseReport {
    pub queries_total: usize,
    pub queries_ranked: usize,
    pub queries_empty: usize,
    pub queries_failed: usize,
    pub entities_skipped: usize,
    pub write: WriteStats,
}

/// Scores every query on the worker pool, ranks the merged candidates,
/// and streams the results to `output` in run-file format.
///
/// `workers == 0` uses all available parallelism. The scorer sees one
/// query at a time and returns that query's [`FusionContext`]; recoverable
/// scorer errors turn into empty, logged results.
pub fn fuse_to_run_file<S>(
    queries: Vec<String>,
    workers: usize,
    scorer: S,
    output: &Path,
    tag: &str,
) -> Result<FuseReport>
where
    S: Fn(&str) -> FuseResult<FusionContext> + Sync,
{
    let mut outcomes = score_queries(queries, workers, &scorer)?;
    outcomes.sort_by(|a, b| a.query.cmp(&b.query));

    let results: Vec<RankedResult> = outcomes
        .iter()
        .filter(|outcome| !outcome.entries.is_empty())
        .map(|outcome| RankedResult {
            topic: outcome.query.clone(),
            entries: outcome.entries.clone(),
        })
        .collect();

    let write = run_file::write_run_file(output, &results, tag)?;

    let mut report = FuseReport {
        queries_total: outcomes.len(),
        write,
        ..FuseReport::default()
    };
    for outcome in &mut outcomes {
        outcome.phase = QueryPhase::Written;
        report.entities_skipped += outcome.entities_skipped;
        if outcome.failed {
            report.queries_failed += 1;
        } else if outcome.entries.is_empty() {
            report.queries_empty += 1;
        } else {
            report.queries_ranked += 1;
        }
    }

    Ok(report)
}

fn score_queries<S>(queries: Vec<String>, workers: usize, scorer: &S) -> Result<Vec<QueryOutcome>>
where
    S: Fn(&str) -> FuseResult<FusionContext> + Sync,
{
    if workers == 0 {
        return Ok(queries.par_iter().map(|query| fuse_one(query, scorer)).collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("failed to build worker pool")?;
    Ok(pool.install(|| queries.par_iter().map(|query| fuse_one(query, scorer)).collect()))
}

fn fuse_one<S>(query: &str, scorer: &S) -> QueryOutcome
where
    S: Fn(&str) -> FuseResult<FusionContext> + Sync,
{
    let mut outcome = QueryOutcome {
        query: query.to_string(),
        phase: QueryPhase::Pending,
        entries: Vec::new(),
        sources: 0,
        entities_skipped: 0,
        failed: false,
    };

    let context = match scorer(query) {
        Ok(context) => context,
        Err(err) => {
            warn!(query, error = %err, "query fusion failed; emitting empty result");
            outcome.failed = true;
            outcome.phase = QueryPhase::Written;
            return outcome;
        }
    };

    outcome.phase = QueryPhase::Loaded;
    outcome.sources = context.sources;
    outcome.entities_skipped = context.entities_skipped;

    if context.is_empty() {
        debug!(query, "no candidates after loading");
        outcome.phase = QueryPhase::Written;
        return outcome;
    }

    outcome.phase = QueryPhase::Scored;

    let mut entries = context.merged.into_entries();
    // Stable sort: equal scores keep the candidates' insertion order.
    entries.sort_by(|a, b| b.score.total_cmp(&a.score));
    outcome.entries = entries;
    outcome.phase = QueryPhase::Ranked;

    debug!(
        query,
        phase = ?outcome.phase,
        results = outcome.entries.len(),
        sources = outcome.sources,
        entities_skipped = outcome.entities_skipped,
        "query ranked"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FuseError;
    use std::path::PathBuf;

    fn temp_output(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rankfuse-aggregate-test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn paragraphs_proposed_by_two_entities_accumulate_and_dedupe() {
        let output = temp_output("accumulate.run");
        let scorer = |_query: &str| {
            let mut context = FusionContext::new();
            let mut first = ScoreMap::new();
            first.insert("pX", 0.3);
            let mut second = ScoreMap::new();
            second.insert("pX", 0.7);
            context.absorb(first);
            context.absorb(second);
            Ok(context)
        };

        let report =
            fuse_to_run_file(vec!["q1".to_string()], 1, scorer, &output, "test-tag").unwrap();

        assert_eq!(report.queries_ranked, 1);
        assert_eq!(report.write.lines_written, 1);

        let text = std::fs::read_to_string(&output).unwrap();
        assert_eq!(text.lines().collect::<Vec<_>>(), vec!["q1 Q0 pX 1 1.00 test-tag"]);
    }

    #[test]
    fn ties_keep_insertion_order() {
        let output = temp_output("ties.run");
        let scorer = |_query: &str| {
            let mut context = FusionContext::new();
            let mut partial = ScoreMap::new();
            partial.insert("first", 0.5);
            partial.insert("second", 0.5);
            partial.insert("top", 0.9);
            context.absorb(partial);
            Ok(context)
        };

        fuse_to_run_file(vec!["q1".to_string()], 1, scorer, &output, "tie-tag").unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        let docs: Vec<&str> = text
            .lines()
            .map(|line| line.split_whitespace().nth(2).unwrap())
            .collect();
        assert_eq!(docs, vec!["top", "first", "second"]);
    }

    #[test]
    fn empty_and_failed_queries_emit_no_lines_but_finish() {
        let output = temp_output("empty.run");
        let scorer = |query: &str| match query {
            "q-empty" => Ok(FusionContext::new()),
            _ => Err(FuseError::not_found(query)),
        };

        let report = fuse_to_run_file(
            vec!["q-empty".to_string(), "q-broken".to_string()],
            1,
            scorer,
            &output,
            "tag",
        )
        .unwrap();

        assert_eq!(report.queries_total, 2);
        assert_eq!(report.queries_empty, 1);
        assert_eq!(report.queries_failed, 1);
        assert_eq!(report.write.lines_written, 0);
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "");
    }

    #[test]
    fn output_is_grouped_by_query_in_ascending_order() {
        let output = temp_output("ordering.run");
        let scorer = |query: &str| {
            let mut context = FusionContext::new();
            let mut partial = ScoreMap::new();
            partial.insert(&format!("doc-{query}"), 1.0);
            context.absorb(partial);
            Ok(context)
        };

        let queries: Vec<String> = ["q3", "q1", "q2"].iter().map(|s| s.to_string()).collect();
        fuse_to_run_file(queries, 0, scorer, &output, "order-tag").unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        let topics: Vec<&str> = text
            .lines()
            .map(|line| line.split_whitespace().next().unwrap())
            .collect();
        assert_eq!(topics, vec!["q1", "q2", "q3"]);
    }
}
