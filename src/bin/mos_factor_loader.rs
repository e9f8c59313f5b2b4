use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;

use mos_loader::config::{DatabaseConfig, LoaderConfig};
use mos_loader::db;
use mos_loader::error::LoadError;
use mos_loader::models::WeightSummary;
use mos_loader::store::PgStore;
use mos_loader::weights::{
    DeleteFilter, FactorFileMeta, FactorLoader, LookupTables, collect_factor_files, delete_weights,
};
use sqlx::PgPool;

#[derive(Parser, Debug)]
#[command(
    name = "mos_factor_loader",
    about = "Load MOS regression weights from factor CSV files"
)]
struct Args {
    /// Label of the MOS version the weights belong to.
    #[arg(short = 'm', long)]
    mos_label: String,

    /// Analysis hour; overrides the file name.
    #[arg(short = 'a', long)]
    analysis_hour: Option<i32>,

    /// Network-local station id; overrides the file name.
    #[arg(short = 'w', long)]
    station_id: Option<String>,

    /// Station network used to resolve local station ids.
    #[arg(short = 'n', long, default_value_t = 1)]
    network_id: i32,

    /// Target parameter term (e.g. TA); overrides the file name.
    #[arg(short = 'p', long)]
    param: Option<String>,

    /// Season; overrides the file name.
    #[arg(short = 's', long)]
    season: Option<i32>,

    /// Commit after this many files (default from MOS_COMMIT_INTERVAL_FILES).
    #[arg(long)]
    commit_interval_files: Option<usize>,

    /// Delete the weights matching the filters instead of loading.
    #[arg(long)]
    delete: bool,

    /// Factor files, or directories holding station*.csv files.
    #[arg(required_unless_present = "delete")]
    files: Vec<PathBuf>,
}

impl Args {
    fn overrides(&self) -> FactorFileMeta {
        FactorFileMeta {
            station: self.station_id.clone(),
            analysis_hour: self.analysis_hour,
            season: self.season,
            target_param: self.param.clone(),
        }
    }

    fn delete_filter(&self) -> DeleteFilter {
        DeleteFilter {
            mos_label: self.mos_label.clone(),
            analysis_hour: self.analysis_hour,
            station: self.station_id.clone(),
            network_id: self.network_id,
            param: self.param.clone(),
            season: self.season,
        }
    }
}

async fn load(args: &Args, pool: &PgPool) -> Result<WeightSummary, LoadError> {
    let mut config = LoaderConfig::from_env();
    if let Some(files) = args.commit_interval_files {
        config.commit_interval_files = files.max(1);
    }

    let lookups = LookupTables::load(pool, &args.mos_label, args.network_id).await?;
    let files = collect_factor_files(&args.files)?;

    let store = PgStore::begin(pool.clone(), config.schema.clone()).await?;
    let mut loader =
        FactorLoader::new(store, lookups, args.overrides(), config.commit_interval_files);

    for path in &files {
        loader.load_file(path).await?;
    }

    let (store, summary) = loader.finish();
    store.finish().await?;
    Ok(summary)
}

fn confirm(filter: &DeleteFilter) -> Result<bool, LoadError> {
    let prompt = || -> io::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "Deleting weights matching:\n{}", filter.describe())?;
        write!(out, "Type 'yes' to continue: ")?;
        out.flush()
    };
    prompt().map_err(|e| LoadError::io("<stdout>", e))?;

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|e| LoadError::io("<stdin>", e))?;
    Ok(answer.trim() == "yes")
}

async fn run(args: &Args) -> Result<(), LoadError> {
    let pool = db::connect(&DatabaseConfig::from_env()).await?;

    if args.delete {
        let filter = args.delete_filter();
        if confirm(&filter)? {
            let deleted = delete_weights(&pool, &filter).await?;
            println!("{} rows deleted", deleted);
        } else {
            log::info!("deletion cancelled");
        }
    } else {
        let summary = load(args, &pool).await?;
        log::info!(
            "{} files loaded, {} skipped, {} steps read, {} inserted, {} updated, {} all-zero dropped",
            summary.files,
            summary.skipped_files,
            summary.steps_read,
            summary.inserted,
            summary.updated,
            summary.zero_steps_dropped
        );
    }

    pool.close().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    mos_loader::init_logger();
    let args = Args::parse();

    if let Err(err) = run(&args).await {
        log::error!("factor loading failed: {}", err);
        std::process::exit(1);
    }
}
