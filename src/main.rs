//! Thin CLI: load job files, apply overrides, run, report.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use ioforge::config::workload::{BsSpec, EngineKind, RwMode, VerifyMode};
use ioforge::config::{validator, Options};
use ioforge::Supervisor;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Flexible IO workload generator and benchmark harness.
#[derive(Debug, Parser)]
#[command(name = "ioforge", version, about)]
struct Cli {
    /// TOML job files; each runs in sequence.
    jobs: Vec<PathBuf>,

    /// Target file or block device (builds an ad-hoc job when no job file
    /// is given).
    #[arg(long)]
    filename: Option<PathBuf>,

    /// Workload kind: read, write, randread, randwrite, randrw, ...
    #[arg(long)]
    rw: Option<String>,

    /// Fixed block size in bytes.
    #[arg(long)]
    bs: Option<u32>,

    /// IO region size in bytes.
    #[arg(long)]
    size: Option<u64>,

    /// Runtime in seconds.
    #[arg(long)]
    runtime: Option<u64>,

    #[arg(long)]
    iodepth: Option<u32>,

    #[arg(long)]
    numjobs: Option<u32>,

    /// Engine name: sync, io_uring, mock.
    #[arg(long)]
    engine: Option<String>,

    /// Verify mode: off, crc32, pattern, meta.
    #[arg(long)]
    verify: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

fn parse_keyword<T: serde::de::DeserializeOwned>(what: &str, raw: &str) -> anyhow::Result<T> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("invalid {} '{}'", what, raw))
}

fn apply_overrides(opts: &mut Options, cli: &Cli) -> anyhow::Result<()> {
    if let Some(filename) = &cli.filename {
        opts.files.filename = Some(filename.clone());
    }
    if let Some(rw) = &cli.rw {
        opts.workload.rw = parse_keyword::<RwMode>("rw", rw)?;
    }
    if let Some(bs) = cli.bs {
        opts.workload.bs = BsSpec::Fixed(bs);
    }
    if let Some(size) = cli.size {
        opts.workload.size = size;
    }
    if let Some(runtime) = cli.runtime {
        opts.workload.runtime = runtime;
        opts.workload.time_based = true;
    }
    if let Some(iodepth) = cli.iodepth {
        opts.concurrency.iodepth = iodepth;
    }
    if let Some(numjobs) = cli.numjobs {
        opts.concurrency.numjobs = numjobs;
    }
    if let Some(engine) = &cli.engine {
        opts.workload.engine = engine
            .parse::<EngineKind>()
            .map_err(|e| anyhow::anyhow!(e))?;
    }
    if let Some(verify) = &cli.verify {
        opts.verify.verify = parse_keyword::<VerifyMode>("verify", verify)?;
    }
    Ok(())
}

fn run_job(opts: Options, cli: &Cli) -> anyhow::Result<i32> {
    let summary = Supervisor::spawn(opts.clone())
        .context("failed to spawn workers")?
        .wait();

    match cli.output {
        OutputFormat::Text => {
            print!("{}", ioforge::output::text::render(&summary, &opts));
        }
        OutputFormat::Json => {
            let value = ioforge::output::json::render(&summary, &opts);
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }
    Ok(summary.exit_code())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let mut job_list: Vec<Options> = Vec::new();
    if cli.jobs.is_empty() {
        if cli.filename.is_none() {
            eprintln!("no job file and no --filename given");
            std::process::exit(2);
        }
        let mut opts = Options::default();
        opts.name = "cmdline".into();
        job_list.push(opts);
    } else {
        for path in &cli.jobs {
            match Options::load(path) {
                Ok(opts) => job_list.push(opts),
                Err(e) => {
                    eprintln!("{}: {}", path.display(), e);
                    std::process::exit(2);
                }
            }
        }
    }

    let mut exit = 0;
    for mut opts in job_list {
        if let Err(e) = apply_overrides(&mut opts, &cli) {
            eprintln!("{:#}", e);
            std::process::exit(2);
        }
        if let Err(e) = validator::validate(&opts) {
            eprintln!("{}: {}", opts.name, e);
            std::process::exit(2);
        }
        match run_job(opts, &cli) {
            Ok(code) => exit = exit.max(code),
            Err(e) => {
                eprintln!("{:#}", e);
                exit = exit.max(1);
            }
        }
    }
    std::process::exit(exit);
}
