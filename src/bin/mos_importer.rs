use std::path::PathBuf;

use clap::Parser;

use mos_loader::config::{DatabaseConfig, LoaderConfig};
use mos_loader::db;
use mos_loader::error::LoadError;
use mos_loader::load::{ForecastImporter, PartitionResolver, load_known_partitions};
use mos_loader::models::LoadSummary;
use mos_loader::store::PgStore;

#[derive(Parser, Debug)]
#[command(
    name = "mos_importer",
    about = "Load MOS forecast records into their station partitions"
)]
struct Args {
    /// Input files, one record per line (`.gz` is decompressed on the fly).
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Schema holding the forecast tables (default from MOS_SCHEMA).
    #[arg(long)]
    schema: Option<String>,

    /// Default table name and partition prefix (default from MOS_TABLE_PREFIX).
    #[arg(long)]
    table_prefix: Option<String>,

    /// Flush a batch once it holds this many records.
    #[arg(long)]
    max_batch_rows: Option<usize>,

    /// Commit after this many files.
    #[arg(long)]
    commit_interval_files: Option<usize>,

    /// Print the final summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::from_env();
        if let Some(schema) = &self.schema {
            config.schema = schema.clone();
        }
        if let Some(prefix) = &self.table_prefix {
            config.table_prefix = prefix.clone();
        }
        if let Some(rows) = self.max_batch_rows {
            config.max_batch_rows = rows.max(1);
        }
        if let Some(files) = self.commit_interval_files {
            config.commit_interval_files = files.max(1);
        }
        config
    }
}

async fn run(args: &Args) -> Result<LoadSummary, LoadError> {
    let config = args.loader_config();
    let pool = db::connect(&DatabaseConfig::from_env()).await?;

    let partitions = load_known_partitions(&pool, &config.schema, &config.table_prefix).await?;
    let resolver = PartitionResolver::new(config.table_prefix.clone(), partitions);

    let store = PgStore::begin(pool.clone(), config.schema.clone()).await?;
    let mut importer = ForecastImporter::new(store, resolver, &config);

    for path in &args.files {
        importer.import_file(path).await?;
    }

    let (store, summary) = importer.finish()?;
    store.finish().await?;
    pool.close().await;

    Ok(summary)
}

#[tokio::main]
async fn main() {
    mos_loader::init_logger();
    let args = Args::parse();

    match run(&args).await {
        Ok(summary) => {
            log::info!(
                "{} files, {} batches ({} row-level), {} lines read, {} rows inserted, {} duplicates skipped",
                summary.files,
                summary.batches,
                summary.fallback_batches,
                summary.lines_read,
                summary.rows_inserted,
                summary.duplicates_skipped
            );
            if args.json {
                match serde_json::to_string_pretty(&summary) {
                    Ok(json) => println!("{}", json),
                    Err(err) => log::error!("failed to encode summary: {}", err),
                }
            }
        }
        Err(err) => {
            log::error!("import failed, nothing after the last commit was kept: {}", err);
            std::process::exit(1);
        }
    }
}
