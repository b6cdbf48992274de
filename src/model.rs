use serde::Serialize;

/// One input file consumed by a fusion run, hashed for provenance.
#[derive(Debug, Clone, Serialize)]
pub struct RunSourceEntry {
    pub role: String,
    pub path: String,
    pub sha256: String,
    pub lines: usize,
    pub parsed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FuseCounts {
    pub queries_total: usize,
    pub queries_ranked: usize,
    pub queries_empty: usize,
    pub queries_failed: usize,
    pub entities_skipped: usize,
    pub lines_written: usize,
    pub duplicates_suppressed: usize,
}

/// Provenance manifest written next to each output run file.
#[derive(Debug, Clone, Serialize)]
pub struct FuseRunManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub command: String,
    pub policy: String,
    pub tag: String,
    pub workers: usize,
    pub output_path: String,
    pub sources: Vec<RunSourceEntry>,
    pub counts: FuseCounts,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct FeatureCounts {
    pub queries_total: usize,
    pub queries_without_judgments: usize,
    pub paragraphs_averaged: usize,
    pub paragraphs_skipped: usize,
    pub lines_written: usize,
}

/// Provenance manifest for the feature-averaging command.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureRunManifest {
    pub manifest_version: u32,
    pub generated_at: String,
    pub command: String,
    pub dimensions: usize,
    pub output_path: String,
    pub sources: Vec<RunSourceEntry>,
    pub counts: FeatureCounts,
    pub warnings: Vec<String>,
}
