use std::collections::HashSet;
use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::InspectArgs;
use crate::run_file::parse_line;

pub fn run(args: InspectArgs) -> Result<()> {
    let text = fs::read_to_string(&args.run_file)
        .with_context(|| format!("failed to read run file: {}", args.run_file.display()))?;

    let mut lines = 0_usize;
    let mut parsed = 0_usize;
    let mut skipped = 0_usize;
    let mut queries = HashSet::new();
    let mut entities = HashSet::new();
    let mut docs = HashSet::new();
    let mut tags = HashSet::new();
    let mut composite_topics = 0_usize;
    let mut max_rank = 0_usize;
    let mut min_score = f64::INFINITY;
    let mut max_score = f64::NEG_INFINITY;

    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;

        let record = match parse_line(line) {
            Ok(record) => record,
            Err(err) => {
                warn!(line = number + 1, error = %err, "unparseable run line");
                skipped += 1;
                continue;
            }
        };
        parsed += 1;

        let (query, entity) = record.split_topic();
        queries.insert(query.to_string());
        if let Some(entity) = entity {
            entities.insert(entity.to_string());
            composite_topics += 1;
        }
        docs.insert(record.doc.clone());
        tags.insert(record.tag.clone());
        max_rank = max_rank.max(record.rank);
        min_score = min_score.min(record.score);
        max_score = max_score.max(record.score);
    }

    info!(
        path = %args.run_file.display(),
        lines,
        parsed,
        skipped,
        queries = queries.len(),
        entities = entities.len(),
        docs = docs.len(),
        tags = tags.len(),
        composite_topics,
        "run file inspected"
    );

    if parsed > 0 {
        info!(min_score, max_score, max_rank, "score and rank range");
    } else {
        warn!(path = %args.run_file.display(), "no parseable lines in run file");
    }

    Ok(())
}
