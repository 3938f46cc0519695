//! Generate TPM 2.0 client libraries from raw structure and command tables.
//!
//! Usage:
//!   tpmgen [--lang node,py] [--input DIR|FILE] [--output DIR] [--force-extract]
//!          [--config FILE] [--dump] [-v...]
//!
//! Raw tables are merged into `<output>/.cache/raw_tables.json`, which later runs reuse unless
//! `--force-extract` is given. Each language is written to `<output>/<lang>/`.

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn, LevelFilter};
use std::path::{Path, PathBuf};
use tpmgen::backend::{backend_for, generate};
use tpmgen::dump::dump_registry;
use tpmgen::raw::{load_tables, save_tables, RawTable};
use tpmgen::{adapt, extract, normalize, GeneratorConfig, Lang};

#[derive(Parser, Debug)]
#[command(name = "tpmgen", version, about = "Generate TPM 2.0 client libraries from table definitions")]
struct Args {
    /// Target languages (node, py).
    #[arg(short, long, value_delimiter = ',', default_values_t = [Lang::Node, Lang::Py])]
    lang: Vec<Lang>,

    /// Raw table JSON file, or directory of JSON files.
    #[arg(short, long, default_value = "tables")]
    input: PathBuf,

    /// Output directory.
    #[arg(short, long, default_value = "generated")]
    output: PathBuf,

    /// Re-read the input even when a cached table list exists.
    #[arg(long)]
    force_extract: bool,

    /// Generator configuration (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the normalized registry to `<output>/registry.txt`.
    #[arg(long)]
    dump: bool,

    /// More logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn raw_tables(args: &Args) -> anyhow::Result<Vec<RawTable>> {
    let cache = args.output.join(".cache").join("raw_tables.json");
    if cache.is_file() && !args.force_extract {
        info!("using cached tables {}", cache.display());
        return load_tables(&cache).with_context(|| format!("reading {}", cache.display()));
    }
    let tables = load_tables(&args.input).with_context(|| format!("reading {}", args.input.display()))?;
    save_tables(&cache, &tables).with_context(|| format!("writing {}", cache.display()))?;
    Ok(tables)
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GeneratorConfig> {
    match path {
        Some(p) => GeneratorConfig::from_file(p).with_context(|| format!("reading {}", p.display())),
        None => Ok(GeneratorConfig::default()),
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let backends = args
        .lang
        .iter()
        .map(|&lang| match backend_for(lang) {
            Some(b) => Ok((lang, b)),
            None => bail!("no backend for {} (available: node, py)", lang),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let config = load_config(args.config.as_deref())?;
    let tables = raw_tables(&args)?;
    info!("{} raw tables", tables.len());

    let (mut registry, report) = extract(&tables, &config).context("extraction failed")?;
    for d in &report.skipped {
        warn!("skipped '{}': {:?}", d.caption, d.reason);
    }
    normalize(&mut registry, &config).context("normalization failed")?;

    if args.dump {
        let path = args.output.join("registry.txt");
        std::fs::create_dir_all(&args.output)?;
        std::fs::write(&path, dump_registry(&registry)).with_context(|| format!("writing {}", path.display()))?;
        info!("registry written to {}", path.display());
    }

    for (lang, backend) in backends {
        let adapted = adapt(&registry, lang).with_context(|| format!("adapting for {}", lang))?;
        let files = generate(&adapted, backend.as_ref()).with_context(|| format!("generating {}", lang))?;
        let dir = args.output.join(lang.as_str());
        files.write_to(&dir).with_context(|| format!("writing {}", dir.display()))?;
        info!("{}: {} files in {}", lang, files.len(), dir.display());
    }
    Ok(())
}
