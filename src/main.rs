use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{error, info};
use mimalloc::MiMalloc;

use variantstore::{
    CallInfoField, GroupField, GroupedVariants, ReingestPolicy, SortOrder, StoreConfig, VariantFilter,
    VariantRecord, VariantStore,
};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser, Debug)]
#[command(version, about = "store and query per-individual annotated variant calls")]
struct Cli {
    /// Storage directory; created and provisioned on first use.
    #[arg(short, long, default_value = "variantstore")]
    storage: PathBuf,

    /// Number of ingestion worker threads.
    #[arg(short, long, default_value_t = 2)]
    threads: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a variant file (Exomiser TSV, flat CSV, or annotated VCF/BCF) for one individual.
    Add {
        id: String,
        path: PathBuf,
        /// Include the individual in aggregate queries.
        #[arg(long)]
        public: bool,
        /// Fail instead of replacing an individual that is already stored.
        #[arg(long)]
        reject_existing: bool,
    },
    /// Remove every stored variant of an individual, and its cached file.
    Remove { id: String },
    /// Ingest an individual again from the store's cached copy of its file.
    Reload {
        id: String,
        #[arg(long)]
        public: bool,
    },
    /// Delete the whole storage directory.
    Destroy,
    /// List stored individuals.
    List,
    /// Query stored variants. Without --individual only public individuals are searched.
    Query {
        #[arg(short, long)]
        individual: Option<String>,
        #[arg(long)]
        chrom: Option<String>,
        #[arg(long)]
        gene: Option<String>,
        #[arg(long)]
        effect: Option<String>,
        #[arg(long)]
        max_exac_af: Option<f64>,
        #[arg(long)]
        min_score: Option<f64>,
        /// Lua boolean expression, e.g. 'variant.qual > 30 and variant.filter == "PASS"'.
        #[arg(short, long)]
        expression: Option<String>,
        #[arg(short, long, default_value = "individual")]
        group_by: GroupField,
        /// Order each group by descending variant score instead of position.
        #[arg(long)]
        by_score: bool,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the highest scoring variants of one individual.
    Top {
        id: String,
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
}

fn write_record<W: Write>(out: &mut W, group: &str, r: &VariantRecord) -> io::Result<()> {
    let fmt_opt = |v: Option<f64>| v.map_or_else(|| ".".to_string(), |v| v.to_string());
    let call = r.call();
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        group,
        r.reference_name,
        r.start,
        r.reference_bases,
        if r.alternate_bases.is_empty() {
            ".".to_string()
        } else {
            r.alternate_bases.join(",")
        },
        call.map_or_else(|| ".".to_string(), |c| c.genotype.to_string()),
        r.gene().unwrap_or("."),
        r.gene_effect().unwrap_or("."),
        fmt_opt(r.exac_af()),
        fmt_opt(r.score(CallInfoField::ExomiserVariantScore)),
    )
}

fn write_groups(grouped: &GroupedVariants) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "#GROUP\tCHROM\tPOS\tREF\tALT\tGT\tGENE\tEFFECT\tEXAC_AF\tVARIANT_SCORE")?;
    for (group, records) in grouped {
        for r in records {
            write_record(&mut out, group, r)?;
        }
    }
    out.flush()
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = StoreConfig::new(&cli.storage).with_worker_threads(cli.threads);
    if let Command::Add {
        reject_existing: true,
        ..
    } = cli.command
    {
        config = config.with_reingest(ReingestPolicy::Reject);
    }
    let store = VariantStore::with_sqlite(config)?;
    store.init()?;

    match cli.command {
        Command::Add {
            id, path, public, ..
        } => {
            let n = store.add_individual(&id, public, &path)?.wait()?;
            info!("{} variants stored for {}", n, id);
            println!("{}\t{}", id, n);
        }
        Command::Remove { id } => {
            let n = store.remove_individual(&id)?.wait()?;
            println!("{}\t{}", id, n);
        }
        Command::Reload { id, public } => {
            let path = store
                .cached_file(&id)
                .ok_or_else(|| format!("no cached file for {}", id))?;
            let n = store.add_individual(&id, public, &path)?.wait()?;
            println!("{}\t{}", id, n);
        }
        Command::Destroy => {
            store.destroy()?;
            info!("removed {}", cli.storage.display());
            return Ok(());
        }
        Command::List => {
            for id in store.list_individuals()? {
                println!("{}", id);
            }
        }
        Command::Query {
            individual,
            chrom,
            gene,
            effect,
            max_exac_af,
            min_score,
            expression,
            group_by,
            by_score,
            limit,
        } => {
            let filter = VariantFilter {
                individual,
                chromosome: chrom,
                gene,
                gene_effect: effect,
                max_exac_af,
                min_variant_score: min_score,
                expression,
                order: if by_score {
                    SortOrder::VariantScoreDesc
                } else {
                    SortOrder::Position
                },
                limit_per_group: limit,
            };
            write_groups(&store.query(&filter, group_by)?)?;
        }
        Command::Top { id, n } => {
            let mut grouped = GroupedVariants::new();
            grouped.insert(id.clone(), store.top_harmful_variants(&id, n)?);
            write_groups(&grouped)?;
        }
    }
    store.stop()?;
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
