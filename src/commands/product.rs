use anyhow::Result;
use tracing::{debug, info, warn};

use crate::aggregate::{self, FusionContext};
use crate::cli::ProductArgs;
use crate::commands::{fuse_counts, manifest_path, skip_warning, source_entry};
use crate::error::{FuseError, FuseResult};
use crate::fusion;
use crate::model::FuseRunManifest;
use crate::normalize::normalize;
use crate::run_file::{self, ParseStats};
use crate::salience::{FileAnnotations, SalienceCache, process_entity_id};
use crate::table::ScoreMap;
use crate::util::{now_utc_string, write_json_pretty};

const POLICY: &str = "probabilistic-product";

pub fn run(args: ProductArgs) -> Result<()> {
    let (support, support_stats) = run_file::load_support_table(&args.support_run)?;
    let (entity_ranking, entity_stats) = run_file::load_ranking(&args.entity_run)?;
    if entity_ranking.is_empty() {
        warn!(path = %args.entity_run.display(), "entity ranking produced no queries");
    }
    let annotations = FileAnnotations::load(&args.annotations)?;
    if annotations.is_empty() {
        warn!(path = %args.annotations.display(), "annotation file contains no paragraphs");
    }
    info!(
        support_queries = support.len(),
        entity_queries = entity_ranking.len(),
        annotated_paragraphs = annotations.len(),
        "loaded inputs"
    );

    let cache = SalienceCache::new(&annotations);
    let queries: Vec<String> = support.queries().map(str::to_string).collect();

    let scorer = |query: &str| {
        let entities = support.get(query)?;
        // A query absent from the entity ranking has no usable weights at
        // all; surfacing NotFound lets the driver log it and move on.
        let entity_weights = entity_ranking.get(query)?;

        let mut context = FusionContext::new();
        for (entity, paragraphs) in entities.iter() {
            let weight = match entity_weight(entity_weights, query, entity) {
                Ok(weight) => weight,
                Err(err) => {
                    debug!(error = %err, "skipping entity");
                    context.skip_entity();
                    continue;
                }
            };

            let Some(salience) = salience_scores(&cache, paragraphs, entity) else {
                debug!(query, entity, "no salience annotations for any candidate");
                context.skip_entity();
                continue;
            };
            context.absorb(fusion::probabilistic_product(weight, &normalize(&salience)));
        }
        Ok(context)
    };

    let report =
        aggregate::fuse_to_run_file(queries, args.workers, scorer, &args.output, &args.tag)?;
    info!(
        path = %args.output.display(),
        queries_ranked = report.queries_ranked,
        queries_empty = report.queries_empty,
        queries_failed = report.queries_failed,
        entities_skipped = report.entities_skipped,
        lines_written = report.write.lines_written,
        cached_paragraphs = cache.cached_paragraphs(),
        "wrote fused run"
    );

    let manifest = build_manifest(&args, support_stats, entity_stats, &annotations, &report)?;
    let manifest_file = manifest_path(&args.output);
    write_json_pretty(&manifest_file, &manifest)?;
    info!(path = %manifest_file.display(), "wrote run manifest");

    Ok(())
}

/// P(e|q) straight from the entity ranking; absence is a per-entity skip,
/// not a query failure.
fn entity_weight(weights: &ScoreMap, query: &str, entity: &str) -> FuseResult<f64> {
    weights
        .get(entity)
        .ok_or_else(|| FuseError::MissingUpstreamScore {
            query: query.to_string(),
            entity: entity.to_string(),
        })
}

/// Raw per-paragraph salience of `entity`, in candidate insertion order.
/// `None` when not a single candidate paragraph has annotations.
fn salience_scores(
    cache: &SalienceCache<'_>,
    paragraphs: &ScoreMap,
    entity: &str,
) -> Option<ScoreMap> {
    let processed = process_entity_id(entity);
    let mut raw = ScoreMap::new();
    for (paragraph, _) in paragraphs.iter() {
        if let Some(score) = cache.entity_score(paragraph, processed) {
            raw.insert(paragraph, score);
        }
    }
    (!raw.is_empty()).then_some(raw)
}

fn build_manifest(
    args: &ProductArgs,
    support_stats: ParseStats,
    entity_stats: ParseStats,
    annotations: &FileAnnotations,
    report: &aggregate::FuseReport,
) -> Result<FuseRunManifest> {
    let annotation_stats = ParseStats {
        lines: annotations.len(),
        parsed: annotations.len(),
        skipped: 0,
    };
    let warnings = [
        skip_warning("support run", support_stats),
        skip_warning("entity run", entity_stats),
    ]
    .into_iter()
    .flatten()
    .collect();

    Ok(FuseRunManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        command: render_command(args),
        policy: POLICY.to_string(),
        tag: args.tag.clone(),
        workers: args.workers,
        output_path: args.output.display().to_string(),
        sources: vec![
            source_entry("support-run", &args.support_run, support_stats)?,
            source_entry("entity-run", &args.entity_run, entity_stats)?,
            source_entry("annotations", &args.annotations, annotation_stats)?,
        ],
        counts: fuse_counts(report),
        warnings,
    })
}

fn render_command(args: &ProductArgs) -> String {
    format!(
        "rankfuse product --support-run {} --entity-run {} --annotations {} --output {} --tag {} --workers {}",
        args.support_run.display(),
        args.entity_run.display(),
        args.annotations.display(),
        args.output.display(),
        args.tag,
        args.workers
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(case: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rankfuse-product-test").join(case);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_fixture_inputs(dir: &PathBuf) -> (PathBuf, PathBuf, PathBuf) {
        let support = dir.join("support.run");
        let entity = dir.join("entity.run");
        let annotations = dir.join("annotations.json");

        std::fs::write(
            &support,
            "q1+e1 Q0 p1 1 9.0 in\n\
             q1+e1 Q0 p2 2 8.0 in\n\
             q1+e2 Q0 p2 1 7.0 in\n\
             q2+e1 Q0 p3 1 6.0 in\n\
             q2+eX Q0 p9 1 5.0 in\n\
             q3+e1 Q0 p5 1 4.0 in\n",
        )
        .unwrap();

        // q3 is deliberately absent: the whole query is skipped.
        std::fs::write(
            &entity,
            "q1 Q0 e1 1 0.5 in\n\
             q1 Q0 e2 2 0.5 in\n\
             q2 Q0 e1 1 0.75 in\n",
        )
        .unwrap();

        std::fs::write(
            &annotations,
            r#"{
                "p1": { "e1": 0.75 },
                "p2": { "e1": 0.25, "e2": 0.5 },
                "p3": { "e1": 0.5 }
            }"#,
        )
        .unwrap();

        (support, entity, annotations)
    }

    #[test]
    fn fused_scores_multiply_entity_weight_and_salience_distribution() {
        let dir = temp_dir("scores");
        let (support, entity, annotations) = write_fixture_inputs(&dir);
        let output = dir.join("fused.run");

        run(ProductArgs {
            support_run: support,
            entity_run: entity,
            annotations,
            output: output.clone(),
            tag: "sp-test".to_string(),
            workers: 1,
        })
        .unwrap();

        // q1/e1: salience {p1: 0.75, p2: 0.25} is already a distribution,
        // weight 0.5 -> p1 0.375, p2 0.125. q1/e2: {p2} normalizes to 1.0,
        // weight 0.5 -> p2 accumulates to 0.625.
        let text = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "q1 Q0 p2 1 0.625 sp-test",
                "q1 Q0 p1 2 0.375 sp-test",
                "q2 Q0 p3 1 0.75 sp-test",
            ]
        );
    }

    #[test]
    fn scores_per_query_are_strictly_decreasing_with_ranks_from_one() {
        let dir = temp_dir("ordering");
        let (support, entity, annotations) = write_fixture_inputs(&dir);
        let output = dir.join("fused-ordering.run");

        run(ProductArgs {
            support_run: support,
            entity_run: entity,
            annotations,
            output: output.clone(),
            tag: "sp".to_string(),
            workers: 0,
        })
        .unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        let mut previous_topic = String::new();
        let mut previous_score = f64::INFINITY;
        let mut expected_rank = 1;
        for line in text.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields[0] != previous_topic {
                previous_topic = fields[0].to_string();
                previous_score = f64::INFINITY;
                expected_rank = 1;
            }
            let rank: usize = fields[3].parse().unwrap();
            let score: f64 = fields[4].parse().unwrap();
            assert_eq!(rank, expected_rank);
            assert!(score < previous_score);
            previous_score = score;
            expected_rank += 1;
        }
    }

    #[test]
    fn manifest_counts_skipped_entities_and_failed_queries() {
        let dir = temp_dir("manifest");
        let (support, entity, annotations) = write_fixture_inputs(&dir);
        let output = dir.join("fused-manifest.run");

        run(ProductArgs {
            support_run: support,
            entity_run: entity,
            annotations,
            output: output.clone(),
            tag: "sp".to_string(),
            workers: 1,
        })
        .unwrap();

        let manifest_text = std::fs::read_to_string(manifest_path(&output)).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest_text).unwrap();
        assert_eq!(manifest["policy"], "probabilistic-product");
        assert_eq!(manifest["counts"]["queries_total"], 3);
        assert_eq!(manifest["counts"]["queries_ranked"], 2);
        // q2+eX has no weight in the entity ranking.
        assert_eq!(manifest["counts"]["entities_skipped"], 1);
        // q3 is missing from the entity ranking entirely.
        assert_eq!(manifest["counts"]["queries_failed"], 1);
        assert_eq!(manifest["sources"].as_array().unwrap().len(), 3);
    }
}
