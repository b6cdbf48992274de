use anyhow::Result;
use tracing::{debug, info, warn};

use crate::aggregate::{self, FusionContext};
use crate::cli::RoundedProductArgs;
use crate::commands::{fuse_counts, manifest_path, skip_warning, source_entry};
use crate::fusion;
use crate::model::FuseRunManifest;
use crate::normalize::normalize;
use crate::run_file::{self, ParseStats};
use crate::salience::{FileAnnotations, SalienceCache, process_entity_id};
use crate::table::ScoreMap;
use crate::util::{now_utc_string, write_json_pretty};

const POLICY: &str = "rounded-product";

pub fn run(args: RoundedProductArgs) -> Result<()> {
    let (support, support_stats) = run_file::load_support_table(&args.support_run)?;
    let (passage_ranking, passage_stats) = run_file::load_ranking(&args.passage_run)?;
    let annotations = FileAnnotations::load(&args.annotations)?;
    if annotations.is_empty() {
        warn!(path = %args.annotations.display(), "annotation file contains no paragraphs");
    }
    info!(
        support_queries = support.len(),
        passage_queries = passage_ranking.len(),
        annotated_paragraphs = annotations.len(),
        "loaded inputs"
    );

    let cache = SalienceCache::new(&annotations);
    let queries: Vec<String> = support.queries().map(str::to_string).collect();

    let scorer = |query: &str| {
        let entities = support.get(query)?;
        // Without a candidate passage ranking there is no P(p|q) factor;
        // NotFound bubbles to the driver as an empty, logged result.
        let passage_scores = passage_ranking.get(query)?;
        let passage_dist = normalize(passage_scores);

        let mut context = FusionContext::new();
        for (entity, paragraphs) in entities.iter() {
            let Some(salience) = salience_scores(&cache, paragraphs, entity) else {
                debug!(query, entity, "no salience annotations for any candidate");
                context.skip_entity();
                continue;
            };
            context.absorb(fusion::rounded_product(&passage_dist, &normalize(&salience)));
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
        lines_written = report.write.lines_written,
        "wrote fused run"
    );

    let manifest = build_manifest(&args, support_stats, passage_stats, &annotations, &report)?;
    let manifest_file = manifest_path(&args.output);
    write_json_pretty(&manifest_file, &manifest)?;
    info!(path = %manifest_file.display(), "wrote run manifest");

    Ok(())
}

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
    args: &RoundedProductArgs,
    support_stats: ParseStats,
    passage_stats: ParseStats,
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
        skip_warning("passage run", passage_stats),
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
            source_entry("passage-run", &args.passage_run, passage_stats)?,
            source_entry("annotations", &args.annotations, annotation_stats)?,
        ],
        counts: fuse_counts(report),
        warnings,
    })
}

fn render_command(args: &RoundedProductArgs) -> String {
    format!(
        "rankfuse rounded-product --support-run {} --passage-run {} --annotations {} --output {} --tag {} --workers {}",
        args.support_run.display(),
        args.passage_run.display(),
        args.annotations.display(),
        args.output.display(),
        args.tag,
        args.workers
    )
}
