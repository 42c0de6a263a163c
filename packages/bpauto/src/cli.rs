//! Command-line interface for bpauto.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::batch::{run_single, BatchOptions, BatchRunner, BatchSummary, SingleTarget};
use crate::config::{
    validate_row_range, ColumnMapping, NorthDataConfig, DEFAULT_COOLDOWN_SECS, DEFAULT_START_ROW,
};
use crate::error::Result;
use crate::reconcile::Reconciler;
use crate::resolve::{DocumentArchive, Resolver};
use crate::source::{HandelsregisterConfig, HandelsregisterSource, NorthDataSource, Source};
use crate::store::SheetStore;
use crate::types::{Field, ResolutionOutcome, SearchCriteria, SearchMode};

/// Name of the review file written to the output directory.
const REVIEW_FILE: &str = "review.txt";

/// bpauto - verify business partners against the German commercial register.
#[derive(Parser)]
#[command(name = "bpauto")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Whether debug logging was requested.
    #[must_use]
    pub fn debug(&self) -> bool {
        match &self.command {
            Commands::Batch { common, .. } | Commands::Single { common, .. } => common.debug,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve every row of a workbook and write the results back.
    Batch {
        /// Workbook (.xlsx) or CSV file to process
        #[arg(long)]
        excel: PathBuf,

        /// Sheet name (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,

        /// First row to process (1-based)
        #[arg(long, default_value_t = DEFAULT_START_ROW)]
        start: u32,

        /// Last row to process, inclusive (default: last row with a name)
        #[arg(long)]
        end: Option<u32>,

        /// Pause after repeated source errors, in seconds
        #[arg(long, default_value_t = DEFAULT_COOLDOWN_SECS)]
        cooldown_secs: u64,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Resolve a single company, optionally updating one row.
    Single {
        /// Company name to search for
        #[arg(short = 's', long = "keywords")]
        keywords: String,

        /// Register number to narrow the search
        #[arg(long)]
        register_number: Option<String>,

        /// Postal code to narrow the search
        #[arg(long)]
        plz: Option<String>,

        /// Row to write the result to (requires --excel)
        #[arg(long, requires = "excel")]
        row: Option<u32>,

        /// Workbook (.xlsx) or CSV file holding the target row
        #[arg(long, requires = "row")]
        excel: Option<PathBuf>,

        /// Sheet name (default: first sheet)
        #[arg(long)]
        sheet: Option<String>,

        /// Supplier or customer number the target row must carry
        #[arg(long)]
        external_key: Option<String>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

/// Registry source to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// handelsregister.de web UI
    Ui,
    /// NorthData REST API (needs NORTHDATA_API_KEY)
    Api,
}

/// Flags shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Registry source
    #[arg(long, value_enum, default_value_t = SourceKind::Ui)]
    pub source: SourceKind,

    /// Keyword matching: all, min (any keyword) or exact
    #[arg(long, visible_alias = "so", default_value = "all", value_parser = parse_mode)]
    pub mode: SearchMode,

    /// Keep the fetched register document for every unique match
    #[arg(long)]
    pub download_ad: bool,

    /// Directory for documents and the review file
    #[arg(long, default_value = "downloads")]
    pub outdir: PathBuf,

    /// Search the register by postal code and drop results whose address lacks it
    #[arg(long)]
    pub postal_code: bool,

    /// Keep every fetched register page under <outdir>/pages
    #[arg(long)]
    pub headful: bool,

    /// Column mapping YAML (default: standard partner workbook layout)
    #[arg(long)]
    pub mapping: Option<PathBuf>,

    /// Save the workbook after every row
    #[arg(long)]
    pub persist_every_row: bool,

    /// Also set the change flag when an empty field gets filled
    #[arg(long)]
    pub flag_new_fields: bool,

    /// Write address fields upper-case with umlauts transliterated
    #[arg(long)]
    pub transliterate: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,
}

fn parse_mode(value: &str) -> std::result::Result<SearchMode, String> {
    SearchMode::from_cli(value).ok_or_else(|| format!("expected all, min or exact, got '{value}'"))
}

/// Run the CLI with already parsed arguments.
pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Batch {
            excel,
            sheet,
            start,
            end,
            cooldown_secs,
            common,
        } => batch_command(&excel, sheet.as_deref(), start, end, cooldown_secs, &common),
        Commands::Single {
            keywords,
            register_number,
            plz,
            row,
            excel,
            sheet,
            external_key,
            common,
        } => {
            let mut criteria = SearchCriteria::new(keywords)?.with_mode(common.mode);
            if let Some(number) = register_number {
                criteria = criteria.with_register_number(number);
            }
            if let Some(plz) = plz {
                criteria = criteria.with_postal_code(plz);
            }
            let target = row.zip(excel);
            single_command(&criteria, target, sheet.as_deref(), external_key, &common)
        }
    }
}

fn load_mapping(path: Option<&Path>) -> Result<ColumnMapping> {
    let mapping = match path {
        Some(path) => ColumnMapping::from_yaml_file(path)?,
        None => ColumnMapping::default(),
    };
    mapping.validate()?;
    Ok(mapping)
}

/// Create the selected source. Sessions are not opened until the first search.
fn open_source(common: &CommonArgs) -> Result<Box<dyn Source>> {
    let source: Box<dyn Source> = match common.source {
        SourceKind::Ui => Box::new(HandelsregisterSource::new(HandelsregisterConfig {
            filter_postal_code: common.postal_code,
            page_dir: common.headful.then(|| common.outdir.join("pages")),
            ..HandelsregisterConfig::default()
        })?),
        SourceKind::Api => Box::new(NorthDataSource::new(NorthDataConfig::from_env()?)?),
    };
    Ok(source)
}

fn reconciler(common: &CommonArgs) -> Reconciler {
    Reconciler::default()
        .with_flag_new_fields(common.flag_new_fields)
        .with_sheet_spelling(common.transliterate)
}

fn resolver<'s>(source: &'s mut dyn Source, common: &CommonArgs) -> Result<Resolver<'s>> {
    let resolver = Resolver::new(source);
    Ok(if common.download_ad {
        resolver.with_archive(DocumentArchive::new(&common.outdir)?)
    } else {
        resolver
    })
}

/// Execute the batch command.
fn batch_command(
    excel: &Path,
    sheet: Option<&str>,
    start: u32,
    end: Option<u32>,
    cooldown_secs: u64,
    common: &CommonArgs,
) -> Result<()> {
    // Everything that can be misconfigured is checked before the source is touched
    let mapping = load_mapping(common.mapping.as_deref())?;
    let mut store = SheetStore::open(excel, sheet, &mapping)?;

    let end = match end.or_else(|| store.last_row_with_name(start)) {
        Some(end) => end,
        None => {
            println!("{} no rows with a name from row {start}", style("Nothing to do:").yellow());
            return Ok(());
        }
    };
    validate_row_range(start, end)?;
    std::fs::create_dir_all(&common.outdir)?;

    let mut source = open_source(common)?;
    let source_name = source.name();

    println!(
        "{} rows {}-{} of {} via {}",
        style("Processing").bold(),
        start,
        end,
        style(excel.display()).cyan(),
        style(source_name).green()
    );

    let options = BatchOptions {
        mode: common.mode,
        persist_every_row: common.persist_every_row,
        home_country_only: common.source == SourceKind::Ui,
        cooldown: Duration::from_secs(cooldown_secs),
        review_log: Some(common.outdir.join(REVIEW_FILE)),
    };

    let pb = ProgressBar::new(0);
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut runner = BatchRunner::new(resolver(source.as_mut(), common)?, reconciler(common), options)
        .with_progress(pb);
    let summary = runner.run(&mut store, start, end)?;

    print_summary(&summary);
    if summary.processed > summary.unique {
        println!(
            "  Rows to review: {}",
            style(common.outdir.join(REVIEW_FILE).display()).yellow()
        );
    }
    println!("{} {}", style("Saved to:").green().bold(), excel.display());
    Ok(())
}

fn print_summary(summary: &BatchSummary) {
    println!();
    println!("  Processed: {}", summary.processed);
    println!("  Unique: {}", style(summary.unique).green());
    if summary.changed > 0 {
        println!("  Changed: {}", style(summary.changed).yellow().bold());
    }
    for (label, count) in [
        ("Ambiguous", summary.ambiguous),
        ("Not found", summary.not_found),
        ("Unexpected format", summary.unexpected_format),
        ("Source errors", summary.source_errors),
        ("Skipped", summary.skipped),
    ] {
        if count > 0 {
            println!("  {label}: {}", style(count).yellow());
        }
    }
}

/// Execute the single command.
fn single_command(
    criteria: &SearchCriteria,
    target: Option<(u32, PathBuf)>,
    sheet: Option<&str>,
    external_key: Option<String>,
    common: &CommonArgs,
) -> Result<()> {
    let mapping = load_mapping(common.mapping.as_deref())?;
    let mut store = match &target {
        Some((_, excel)) => Some(SheetStore::open(excel, sheet, &mapping)?),
        None => None,
    };

    let mut source = open_source(common)?;

    println!(
        "{} {} via {}",
        style("Searching").bold(),
        style(criteria.keywords()).cyan(),
        style(source.name()).green()
    );

    let pb = ProgressBar::new_spinner();
    #[allow(clippy::expect_used)] // Static template string that is guaranteed to be valid
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    pb.set_message("Resolving...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let mut resolver = resolver(source.as_mut(), common)?;
    let row_target = match (&target, store.as_mut()) {
        (Some((row, _)), Some(store)) => Some(SingleTarget {
            store,
            row: *row,
            external_key,
        }),
        _ => None,
    };
    let single_result = run_single(&mut resolver, &reconciler(common), criteria, row_target);
    pb.finish_and_clear();

    let result = single_result?;
    print_outcome(&result.outcome);

    if let (Some((row, excel)), Some(update)) = (&target, &result.update) {
        println!(
            "{} row {} of {} ({} field(s) changed)",
            style("Updated").green().bold(),
            row,
            excel.display(),
            update.changes.len()
        );
    }
    Ok(())
}

fn print_outcome(outcome: &ResolutionOutcome) {
    match outcome {
        ResolutionOutcome::Unique {
            candidate,
            fields,
            document,
        } => {
            println!("  Match: {}", style(&candidate.name).green());
            for field in Field::ALL {
                if let Some(value) = fields.get(field) {
                    println!("  {field}: {value}");
                }
            }
            if let Some(path) = document {
                println!("  Document: {}", path.display());
            }
        }
        other => println!("  Result: {}", style(other.label()).yellow()),
    }
}
