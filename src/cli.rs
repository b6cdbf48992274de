use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "rankfuse",
    version,
    about = "Rank-fusion experiments over TREC-style run files"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Reciprocal-rank summation over per-entity passage lists
    Reciprocal(ReciprocalArgs),
    /// Entity-weight times normalized salience, merged per passage
    Product(ProductArgs),
    /// Passage-probability times salience with per-factor ceiling rounding
    RoundedProduct(RoundedProductArgs),
    /// Collapse per-entity feature vectors into per-passage means
    AverageFeatures(AverageFeaturesArgs),
    /// Parse a run file and report its shape
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReciprocalArgs {
    /// Support-passage run file with composite query+entity topics
    #[arg(long)]
    pub support_run: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value = "reciprocal-rank")]
    pub tag: String,

    /// Worker threads; 0 uses all available parallelism
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ProductArgs {
    /// Support-passage run file with composite query+entity topics
    #[arg(long)]
    pub support_run: PathBuf,

    /// Entity ranking supplying normalized per-query entity weights
    #[arg(long)]
    pub entity_run: PathBuf,

    /// JSON annotation file: paragraph -> entity -> salience score
    #[arg(long)]
    pub annotations: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value = "salience-product")]
    pub tag: String,

    /// Worker threads; 0 uses all available parallelism
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct RoundedProductArgs {
    /// Support-passage run file with composite query+entity topics
    #[arg(long)]
    pub support_run: PathBuf,

    /// Candidate passage ranking for the per-query passage distribution
    #[arg(long)]
    pub passage_run: PathBuf,

    /// JSON annotation file: paragraph -> entity -> salience score
    #[arg(long)]
    pub annotations: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    #[arg(long, default_value = "rounded-product")]
    pub tag: String,

    /// Worker threads; 0 uses all available parallelism
    #[arg(long, default_value_t = 0)]
    pub workers: usize,
}

#[derive(Args, Debug, Clone)]
pub struct AverageFeaturesArgs {
    /// RankLib-style feature file keyed by query+entity_paragraph
    #[arg(long)]
    pub feature_file: PathBuf,

    /// Relevance judgments used to label the averaged vectors
    #[arg(long)]
    pub qrels: PathBuf,

    #[arg(long)]
    pub output: PathBuf,

    /// Fixed feature-vector dimensionality
    #[arg(long, default_value_t = 16)]
    pub dimensions: usize,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[arg(long)]
    pub run_file: PathBuf,
}
