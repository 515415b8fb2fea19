//! Binary entry point for the tdbx administrative CLI.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tdbx::admin::{
    checkpoint, dump, journal_entries, load, stats, verify, AdminOpenOptions, CheckpointReport, DumpReport,
    JournalListing, LoadReport, StatsReport, VerifyLevel, VerifyReport,
};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "tdbx",
    version,
    about = "Administrative CLI for tdbx RDF stores",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for structured responses"
    )]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(long, global = true, help = "Store term values in node table entries instead of inline ids (creation only)")]
    no_inline_values: bool,

    #[arg(
        long,
        global = true,
        value_name = "BYTES",
        help = "Checkpoint once the journal holds this many bytes"
    )]
    journal_threshold: Option<u64>,

    #[arg(
        long,
        global = true,
        value_name = "COMMITS",
        help = "Checkpoint after this many journaled commits (0 disables)"
    )]
    checkpoint_batch: Option<u64>,

    #[arg(long, global = true, help = "Skip the journal sync before each commit is enacted")]
    no_sync: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report node table, index, journal and cache statistics.
    Stats {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
    },
    /// Check that indexes agree and that stored ids resolve.
    Verify {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
        #[arg(long, value_enum, default_value_t = VerifyLevelArg::Fast)]
        level: VerifyLevelArg,
    },
    /// Write index snapshots and empty the journal.
    Checkpoint {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
    },
    /// List journal entries without opening the store.
    Journal {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
    },
    /// Load a delimited protobuf RDF stream in one transaction.
    Load {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, help = "Create the store if it does not exist")]
        create: bool,
    },
    /// Write the store as a delimited protobuf RDF stream.
    Dump {
        #[arg(value_name = "STORE")]
        db_path: PathBuf,
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum VerifyLevelArg {
    Fast,
    Full,
}

impl From<VerifyLevelArg> for VerifyLevel {
    fn from(level: VerifyLevelArg) -> Self {
        match level {
            VerifyLevelArg::Fast => VerifyLevel::Fast,
            VerifyLevelArg::Full => VerifyLevel::Full,
        }
    }
}

fn main() {
    install_tracing_subscriber();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn install_tracing_subscriber() {
    let filter = EnvFilter::try_from_env("TDBX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn build_open_options(args: &OpenArgs) -> AdminOpenOptions {
    let mut opts = AdminOpenOptions::default();
    opts.params.inline_values = !args.no_inline_values;
    if let Some(bytes) = args.journal_threshold {
        opts.params.journal_threshold_bytes = bytes;
    }
    if let Some(commits) = args.checkpoint_batch {
        opts.params.checkpoint_batch_commits = commits;
    }
    opts.params.sync_on_commit = !args.no_sync;
    opts
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let open_opts = build_open_options(&cli.open);

    match cli.command {
        Command::Stats { db_path } => {
            let report = stats(&db_path, &open_opts)?;
            emit(cli.format, &report, || print_stats_text(&report))?;
        }
        Command::Verify { db_path, level } => {
            let report = verify(&db_path, &open_opts, level.into())?;
            emit(cli.format, &report, || print_verify_text(&report))?;
            if !report.success {
                std::process::exit(2);
            }
        }
        Command::Checkpoint { db_path } => {
            let report = checkpoint(&db_path, &open_opts)?;
            emit(cli.format, &report, || print_checkpoint_text(&report))?;
        }
        Command::Journal { db_path } => {
            let listing = journal_entries(&db_path)?;
            emit(cli.format, &listing, || print_journal_text(&listing))?;
        }
        Command::Load { db_path, file, create } => {
            let mut opts = open_opts.clone();
            opts.create_if_missing = create;
            let report = load(&db_path, &opts, &file)?;
            emit(cli.format, &report, || print_load_text(&report))?;
        }
        Command::Dump { db_path, file } => {
            let report = dump(&db_path, &open_opts, &file)?;
            emit(cli.format, &report, || print_dump_text(&report))?;
        }
    }
    Ok(())
}

fn emit<T, F>(format: OutputFormat, value: &T, printer: F) -> Result<(), Box<dyn Error>>
where
    T: serde::Serialize,
    F: Fn(),
{
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{json}");
        }
        OutputFormat::Text => printer(),
    }
    Ok(())
}

fn print_stats_text(report: &StatsReport) {
    let store = &report.store;
    println!("Store: {} version={}", store.location, store.version);
    println!(
        "  nodes={} node_bytes={} inline_values={}",
        store.node_entries, store.node_bytes, store.inline_values
    );
    println!(
        "  triples={} quads={} prefixes={}",
        store.triples, store.quads, store.prefixes
    );
    println!();
    println!("Tables:");
    for table in &report.tables {
        let indexes: Vec<String> = table
            .indexes
            .iter()
            .map(|index| format!("{}={}", index.name, index.entries))
            .collect();
        println!("  {} rows={} [{}]", table.name, table.rows, indexes.join(" "));
    }
    println!();
    println!(
        "Journal: bytes={} appended={} syncs={} truncations={}",
        report.journal.bytes, report.journal.entries_appended, report.journal.syncs, report.journal.truncations
    );
    let txn = &report.transactions;
    println!(
        "Transactions: committed={} aborted={} readers={} writers={}",
        txn.committed, txn.aborted, txn.active_readers, txn.active_writers
    );
    println!(
        "Node cache: lookups={} hits={} misses={} negative_hits={} hit_rate={:.3}",
        report.node_cache.metrics.lookups,
        report.node_cache.metrics.hits,
        report.node_cache.metrics.misses,
        report.node_cache.metrics.negative_hits,
        report.node_cache.hit_rate
    );
    if let Some(files) = &report.filesystem {
        println!();
        println!("Files:");
        for file in files {
            println!("  {:<16} {}", file.name, file.size_bytes);
        }
    }
}

fn print_verify_text(report: &VerifyReport) {
    println!(
        "Verify ({:?}) => success={} tuples={} index_entries={} nodes={} ids={}",
        report.level,
        report.success,
        report.counts.tuples_checked,
        report.counts.index_entries_checked,
        report.counts.nodes_checked,
        report.counts.ids_resolved,
    );
    for finding in &report.findings {
        println!("- {:?}: {}", finding.severity, finding.message);
    }
}

fn print_checkpoint_text(report: &CheckpointReport) {
    println!(
        "Checkpoint completed in {:.2} ms at version {} ({} journal bytes, {} replayed)",
        report.duration_ms, report.version, report.journal_bytes_before, report.replayed
    );
}

fn print_journal_text(listing: &JournalListing) {
    println!("Journal: {} bytes, {} entries", listing.bytes, listing.entries.len());
    for entry in &listing.entries {
        println!(
            "  @{:<8} {:<10} {:<10} id={} len={} head={}",
            entry.position, entry.kind, entry.file_ref, entry.id, entry.payload_len, entry.payload_head
        );
    }
}

fn print_load_text(report: &LoadReport) {
    println!(
        "Loaded {} rows: {} triples, {} quads, {} prefixes (version {})",
        report.rows, report.triples_added, report.quads_added, report.prefixes, report.version
    );
}

fn print_dump_text(report: &DumpReport) {
    println!(
        "Dumped version {}: {} prefixes, {} triples, {} quads",
        report.version, report.prefixes, report.triples, report.quads
    );
}
