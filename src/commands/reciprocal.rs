use anyhow::Result;
use tracing::{info, warn};

use crate::aggregate::{self, FusionContext};
use crate::cli::ReciprocalArgs;
use crate::commands::{fuse_counts, manifest_path, skip_warning, source_entry};
use crate::fusion;
use crate::model::FuseRunManifest;
use crate::run_file;
use crate::util::{now_utc_string, write_json_pretty};

const POLICY: &str = "reciprocal-rank-summation";

pub fn run(args: ReciprocalArgs) -> Result<()> {
    let (table, support_stats) = run_file::load_support_table(&args.support_run)?;
    if table.is_empty() {
        warn!(path = %args.support_run.display(), "support run produced no queries");
    }
    info!(
        path = %args.support_run.display(),
        queries = table.len(),
        lines = support_stats.lines,
        skipped = support_stats.skipped,
        "loaded support-passage run"
    );

    let queries: Vec<String> = table.queries().map(str::to_string).collect();
    let scorer = |query: &str| {
        let entities = table.get(query)?;
        let mut context = FusionContext::new();
        for (_, scores) in entities.iter() {
            let list: Vec<String> = scores.keys().map(str::to_string).collect();
            context.absorb(fusion::reciprocal_rank(&[list]));
        }
        Ok(context)
    };

    let report =
        aggregate::fuse_to_run_file(queries, args.workers, scorer, &args.output, &args.tag)?;
    info!(
        path = %args.output.display(),
        queries_ranked = report.queries_ranked,
        queries_empty = report.queries_empty,
        lines_written = report.write.lines_written,
        "wrote fused run"
    );

    let manifest = FuseRunManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        command: render_command(&args),
        policy: POLICY.to_string(),
        tag: args.tag.clone(),
        workers: args.workers,
        output_path: args.output.display().to_string(),
        sources: vec![source_entry("support-run", &args.support_run, support_stats)?],
        counts: fuse_counts(&report),
        warnings: skip_warning("support run", support_stats)
            .into_iter()
            .collect(),
    };
    let manifest_file = manifest_path(&args.output);
    write_json_pretty(&manifest_file, &manifest)?;
    info!(path = %manifest_file.display(), "wrote run manifest");

    Ok(())
}

fn render_command(args: &ReciprocalArgs) -> String {
    format!(
        "rankfuse reciprocal --support-run {} --output {} --tag {} --workers {}",
        args.support_run.display(),
        args.output.display(),
        args.tag,
        args.workers
    )
}
