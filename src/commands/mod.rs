use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::aggregate::FuseReport;
use crate::model::{FuseCounts, RunSourceEntry};
use crate::run_file::ParseStats;
use crate::util::sha256_file;

pub mod average_features;
pub mod inspect;
pub mod product;
pub mod reciprocal;
pub mod rounded_product;

pub(crate) fn source_entry(role: &str, path: &Path, stats: ParseStats) -> Result<RunSourceEntry> {
    Ok(RunSourceEntry {
        role: role.to_string(),
        path: path.display().to_string(),
        sha256: sha256_file(path)?,
        lines: stats.lines,
        parsed: stats.parsed,
        skipped: stats.skipped,
    })
}

pub(crate) fn fuse_counts(report: &FuseReport) -> FuseCounts {
    FuseCounts {
        queries_total: report.queries_total,
        queries_ranked: report.queries_ranked,
        queries_empty: report.queries_empty,
        queries_failed: report.queries_failed,
        entities_skipped: report.entities_skipped,
        lines_written: report.write.lines_written,
        duplicates_suppressed: report.write.duplicates_suppressed,
    }
}

pub(crate) fn skip_warning(role: &str, stats: ParseStats) -> Option<String> {
    (stats.skipped > 0).then(|| format!("{} malformed lines skipped in {role}", stats.skipped))
}

pub(crate) fn manifest_path(output: &Path) -> PathBuf {
    output.with_extension("manifest.json")
}
