use anyhow::Result;
use tracing::{info, warn};

use crate::cli::AverageFeaturesArgs;
use crate::commands::{manifest_path, skip_warning, source_entry};
use crate::features;
use crate::model::{FeatureCounts, FeatureRunManifest};
use crate::util::{now_utc_string, write_json_pretty, write_lines};

pub fn run(args: AverageFeaturesArgs) -> Result<()> {
    let (table, feature_stats) = features::load_feature_file(&args.feature_file)?;
    if table.is_empty() {
        warn!(path = %args.feature_file.display(), "feature file produced no queries");
    }
    let (qrels, qrel_stats) = features::load_qrels(&args.qrels)?;
    info!(
        path = %args.feature_file.display(),
        queries = table.len(),
        lines = feature_stats.lines,
        skipped = feature_stats.skipped,
        judged_lines = qrel_stats.parsed,
        "loaded feature file and judgments"
    );

    let (lines, average_stats) = features::average_and_render(&table, &qrels, args.dimensions);
    write_lines(&args.output, &lines)?;
    info!(
        path = %args.output.display(),
        paragraphs_averaged = average_stats.paragraphs_averaged,
        paragraphs_skipped = average_stats.paragraphs_skipped,
        queries_without_judgments = average_stats.queries_without_judgments,
        "wrote averaged feature file"
    );

    let warnings = [
        skip_warning("feature file", feature_stats),
        skip_warning("qrels", qrel_stats),
    ]
    .into_iter()
    .flatten()
    .collect();

    let manifest = FeatureRunManifest {
        manifest_version: 1,
        generated_at: now_utc_string(),
        command: render_command(&args),
        dimensions: args.dimensions,
        output_path: args.output.display().to_string(),
        sources: vec![
            source_entry("feature-file", &args.feature_file, feature_stats)?,
            source_entry("qrels", &args.qrels, qrel_stats)?,
        ],
        counts: FeatureCounts {
            queries_total: table.len(),
            queries_without_judgments: average_stats.queries_without_judgments,
            paragraphs_averaged: average_stats.paragraphs_averaged,
            paragraphs_skipped: average_stats.paragraphs_skipped,
            lines_written: lines.len(),
        },
        warnings,
    };
    let manifest_file = manifest_path(&args.output);
    write_json_pretty(&manifest_file, &manifest)?;
    info!(path = %manifest_file.display(), "wrote run manifest");

    Ok(())
}

fn render_command(args: &AverageFeaturesArgs) -> String {
    format!(
        "rankfuse average-features --feature-file {} --qrels {} --output {} --dimensions {}",
        args.feature_file.display(),
        args.qrels.display(),
        args.output.display(),
        args.dimensions
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_dir(case: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("rankfuse-features-test")
            .join(case);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn entity_vectors_collapse_to_paragraph_means_with_labels() {
        let dir = temp_dir("collapse");
        let feature_file = dir.join("features.txt");
        let qrels = dir.join("qrels.txt");
        let output = dir.join("averaged.txt");

        std::fs::write(
            &feature_file,
            "0 qid:1 1:1 2:2 3:3 #q1+e1_p1\n\
             0 qid:1 1:3 2:2 3:1 #q1+e2_p1\n\
             0 qid:1 1:4 2:4 3:4 #q1+e1_p2\n\
             0 qid:2 1:2 2:2 3:2 #q2+e1_p3\n",
        )
        .unwrap();
        std::fs::write(&qrels, "q1 0 p1 1\nq1 0 p2 0\nq2 0 p3 1\n").unwrap();

        run(AverageFeaturesArgs {
            feature_file,
            qrels,
            output: output.clone(),
            dimensions: 3,
        })
        .unwrap();

        let text = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "1 qid:1 1:2 2:2 3:2 #q1_p1",
                "0 qid:1 1:4 2:4 3:4 #q1_p2",
                "1 qid:2 1:2 2:2 3:2 #q2_p3",
            ]
        );
    }

    #[test]
    fn manifest_tracks_dropped_queries_and_dimension_skips() {
        let dir = temp_dir("manifest");
        let feature_file = dir.join("features.txt");
        let qrels = dir.join("qrels.txt");
        let output = dir.join("averaged.txt");

        std::fs::write(
            &feature_file,
            "0 qid:1 1:1 2:2 3:3 #q1+e1_p1\n\
             0 qid:1 1:1 2:2 #q1+e2_p1\n\
             0 qid:9 1:1 2:2 3:3 #q-unjudged+e1_p9\n",
        )
        .unwrap();
        std::fs::write(&qrels, "q1 0 p1 1\n").unwrap();

        run(AverageFeaturesArgs {
            feature_file,
            qrels,
            output: output.clone(),
            dimensions: 3,
        })
        .unwrap();

        let manifest_text = std::fs::read_to_string(manifest_path(&output)).unwrap();
        let manifest: serde_json::Value = serde_json::from_str(&manifest_text).unwrap();
        assert_eq!(manifest["counts"]["queries_total"], 2);
        assert_eq!(manifest["counts"]["queries_without_judgments"], 1);
        assert_eq!(manifest["counts"]["paragraphs_skipped"], 1);
        assert_eq!(manifest["counts"]["lines_written"], 0);
        assert_eq!(manifest["dimensions"], 3);
    }
}
