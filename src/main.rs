use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing::info;

use recompress::io_utils::{human_bytes, io_cli_error, recompress_cli_error, simple_cli_error};
use recompress::telemetry::{sample_self, Phase, SysinfoSampler};
use recompress::{
    container, detect, logging, reduction_pct, report, AlgorithmId, ExternalAdapter,
    Registry, RestoreConfig, RestorePipeline, RetrySupervisor, SearchConfig, SearchLoop,
};

/// Grow a container of N copies until the compressor stops paying off, and
/// restore the result.
#[derive(Parser)]
#[command(name = "recompress", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the iterative copy-count search
    Search(SearchArgs),
    /// Decompress a final artifact and unpack its container
    Restore(RestoreArgs),
    /// Print which compressor produced an artifact
    Detect {
        artifact: PathBuf,
    },
    /// Write a container holding N copies of a file
    Pack {
        input: PathBuf,
        #[arg(short = 'n', long, default_value_t = 1)]
        copies: u32,
        /// Output container path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Extract every entry of a container
    Unpack {
        container: PathBuf,
        #[arg(short, long, default_value = "unpacked")]
        out_dir: PathBuf,
    },
    /// Pack a fixed N, compress once and record CPU/memory telemetry
    Measure(MeasureArgs),
}

#[derive(Args)]
struct SearchArgs {
    /// Already-compressed input file
    input: Option<PathBuf>,
    /// JSON config; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    algorithm: Option<AlgorithmId>,
    /// Compressor executable
    #[arg(long)]
    binary: Option<PathBuf>,
    /// Minimum reduction percentage to keep going (may be negative)
    #[arg(long, allow_hyphen_values = true)]
    threshold: Option<f64>,
    #[arg(long)]
    max_iters: Option<u32>,
    #[arg(long)]
    work_dir: Option<PathBuf>,
    #[arg(long)]
    final_dir: Option<PathBuf>,
    /// Iteration log path
    #[arg(long)]
    csv: Option<PathBuf>,
    /// Floor for every compression budget, in seconds
    #[arg(long)]
    timeout_base: Option<u64>,
    /// Sample CPU and memory of each compressor run
    #[arg(long)]
    telemetry: bool,
}

#[derive(Args)]
struct RestoreArgs {
    /// Final compressed artifact
    input: Option<PathBuf>,
    /// JSON config; flags given on the command line override it
    #[arg(long)]
    config: Option<PathBuf>,
    /// Defaults to `restore_run`
    #[arg(short, long)]
    out_dir: Option<PathBuf>,
    /// Executable override, e.g. `--bin gmix=/opt/gmix`
    #[arg(long = "bin", value_parser = parse_binding)]
    binaries: Vec<(AlgorithmId, PathBuf)>,
    /// Floor for the decompression budget, in seconds (default 3600)
    #[arg(long)]
    timeout_base: Option<u64>,
}

#[derive(Args)]
struct MeasureArgs {
    input: PathBuf,
    #[arg(short, long)]
    algorithm: AlgorithmId,
    #[arg(long)]
    binary: Option<PathBuf>,
    #[arg(short = 'n', long, default_value_t = 1)]
    copies: u32,
    #[arg(short, long, default_value = "measure_run")]
    out_dir: PathBuf,
    /// Sampling interval in milliseconds
    #[arg(long, default_value_t = 50)]
    interval_ms: u64,
    /// Account through a dedicated cgroup v2 when available
    #[arg(long)]
    cgroup: bool,
    #[arg(long, default_value_t = 14_400)]
    timeout: u64,
    /// Total attempts, doubling the budget after each timeout
    #[arg(long, default_value_t = 1)]
    retries: u32,
}

fn parse_binding(s: &str) -> Result<(AlgorithmId, PathBuf), String> {
    let (algo, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ALGO=PATH, got '{s}'"))?;
    let algo = algo.parse::<AlgorithmId>().map_err(|e| e.to_string())?;
    Ok((algo, PathBuf::from(path)))
}

fn main() {
    logging::init_tracing();
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    match Cli::parse().command {
        Command::Search(args) => search(args),
        Command::Restore(args) => restore(args),
        Command::Detect { artifact } => {
            let (algo, evidence) = detect::detect_with_evidence(&artifact)
                .map_err(|e| recompress_cli_error("detection failed", e))?;
            println!("{algo}\t({evidence:?})");
            Ok(())
        }
        Command::Pack {
            input,
            copies,
            output,
        } => {
            let source =
                fs::read(&input).map_err(|e| io_cli_error("reading input file", &input, e))?;
            let written = container::pack_file(&source, copies, &base_name(&input), &output)
                .map_err(|e| recompress_cli_error("packing failed", e))?;
            println!("{copies} copies -> {} ({})", output.display(), human_bytes(written));
            Ok(())
        }
        Command::Unpack { container, out_dir } => {
            let bytes = fs::read(&container)
                .map_err(|e| io_cli_error("reading container", &container, e))?;
            if !container::sniff(&bytes) {
                return Err(simple_cli_error(&format!(
                    "'{}' does not look like a container",
                    container.display()
                ))
                .into());
            }
            let files = container::unpack(&bytes, &out_dir)
                .map_err(|e| recompress_cli_error("unpacking failed", e.at_path(&container)))?;
            for f in &files {
                println!("{}", f.display());
            }
            Ok(())
        }
        Command::Measure(args) => measure(args),
    }
}

fn spinner() -> Result<ProgressBar, Box<dyn Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(200));
    Ok(pb)
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".to_string())
}

fn search_config(args: SearchArgs) -> Result<SearchConfig, Box<dyn Error>> {
    let mut cfg = match (&args.config, &args.input, args.algorithm) {
        (Some(path), _, _) => SearchConfig::load(path)
            .map_err(|e| recompress_cli_error(&format!("loading {}", path.display()), e))?,
        (None, Some(input), Some(algo)) => SearchConfig::new(input.clone(), algo),
        _ => {
            return Err(simple_cli_error(
                "search needs INPUT and --algorithm, or --config",
            )
            .into())
        }
    };
    if let Some(input) = args.input {
        cfg.input = input;
    }
    if let Some(algo) = args.algorithm {
        cfg.algorithm = algo;
    }
    if args.binary.is_some() {
        cfg.binary = args.binary;
    }
    if let Some(t) = args.threshold {
        cfg.threshold_pct = t;
    }
    if let Some(n) = args.max_iters {
        cfg.max_iterations = n;
    }
    if let Some(dir) = args.work_dir {
        cfg.work_dir = dir;
    }
    if let Some(dir) = args.final_dir {
        cfg.final_dir = dir;
    }
    if args.csv.is_some() {
        cfg.csv_path = args.csv;
    }
    if let Some(base) = args.timeout_base {
        cfg.timeouts.base_secs = base;
    }
    cfg.telemetry |= args.telemetry;
    cfg.validate()
        .map_err(|e| recompress_cli_error("invalid configuration", e))?;
    Ok(cfg)
}

fn search(args: SearchArgs) -> Result<(), Box<dyn Error>> {
    let cfg = search_config(args)?;
    let mut adapter = ExternalAdapter::standard(cfg.algorithm, cfg.binary());
    if cfg.telemetry {
        adapter = adapter.with_observer(Arc::new(SysinfoSampler::default()));
    }
    info!(
        input = %cfg.input.display(),
        algorithm = %cfg.algorithm,
        threshold_pct = cfg.threshold_pct,
        max_iters = cfg.max_iterations,
        "starting search"
    );
    let report = SearchLoop::new(&cfg, &adapter)
        .with_progress(spinner()?)
        .run()
        .map_err(|e| recompress_cli_error("search failed", e))?;

    println!("stop reason:     {}", report.stop);
    println!("iterations:      {}", report.iterations.len());
    match &report.best {
        Some(best) => {
            println!(
                "best:            iter {} (N={}) {:.4}% in {:.2}s",
                best.iteration, best.copies, best.reduction_pct, best.elapsed_seconds
            );
            if let Some(c) = best.compressed_bytes {
                println!(
                    "sizes:           {} -> {}",
                    human_bytes(best.container_bytes),
                    human_bytes(c)
                );
            }
        }
        None => println!("best:            none met the threshold, kept iteration 1"),
    }
    println!("final container: {}", report.final_container.display());
    println!("final artifact:  {}", report.final_artifact.display());
    if let Some(m) = &report.manifest {
        println!("manifest:        {}", m.display());
    }
    println!("csv log:         {}", report.csv_path.display());
    Ok(())
}

fn restore_config(args: RestoreArgs) -> Result<RestoreConfig, Box<dyn Error>> {
    let mut cfg = match (&args.config, &args.input) {
        (Some(path), _) => RestoreConfig::load(path)
            .map_err(|e| recompress_cli_error(&format!("loading {}", path.display()), e))?,
        (None, Some(input)) => RestoreConfig::new(input.clone(), "restore_run"),
        (None, None) => {
            return Err(simple_cli_error("restore needs INPUT or --config").into())
        }
    };
    if let Some(input) = args.input {
        cfg.input = input;
    }
    if let Some(dir) = args.out_dir {
        cfg.out_dir = dir;
    }
    if let Some(base) = args.timeout_base {
        cfg.timeout_base_secs = base;
    }
    cfg.binaries.extend(args.binaries);
    cfg.validate()
        .map_err(|e| recompress_cli_error("invalid configuration", e))?;
    Ok(cfg)
}

fn restore(args: RestoreArgs) -> Result<(), Box<dyn Error>> {
    let cfg = restore_config(args)?;
    let registry = Registry::standard(&cfg.binaries);
    let report = RestorePipeline::new(&cfg, &registry)
        .with_progress(spinner()?)
        .run()
        .map_err(|e| recompress_cli_error("restore failed", e))?;

    println!("algorithm:       {}", report.algorithm);
    println!("stage 1:         {}", report.stage1_container.display());
    println!("extracted:       {} files", report.extracted.len());
    match report.verified {
        Some(true) => println!("verified:        every file matches the recorded input hash"),
        Some(false) => println!("verified:        MISMATCH against the recorded input hash"),
        None => println!("verified:        no search manifest next to the artifact"),
    }
    println!("inventory:       {}", report.inventory_path.display());
    println!("manifest:        {}", report.manifest_path.display());
    Ok(())
}

fn measure(args: MeasureArgs) -> Result<(), Box<dyn Error>> {
    let source =
        fs::read(&args.input).map_err(|e| io_cli_error("reading input file", &args.input, e))?;
    fs::create_dir_all(&args.out_dir)
        .map_err(|e| io_cli_error("creating output directory", &args.out_dir, e))?;
    let algo = args.algorithm;
    let stem = format!("container_N_{:04}", args.copies);
    let container_path = args.out_dir.join(format!("{stem}.bin"));
    let compressed_path = args.out_dir.join(format!("{stem}.{}", algo.extension()));

    let started = Instant::now();
    let mut samples = Vec::new();
    samples.extend(sample_self(Phase::Pack, 0.0, "start"));
    let container_bytes =
        container::pack_file(&source, args.copies, &base_name(&args.input), &container_path)
            .map_err(|e| recompress_cli_error("packing failed", e))?;
    let pack_s = started.elapsed().as_secs_f64();
    samples.extend(sample_self(Phase::Pack, pack_s, "end"));
    info!(container = %human_bytes(container_bytes), pack_s, "pack phase done");

    let sampler = SysinfoSampler::new(Duration::from_millis(args.interval_ms), args.cgroup);
    let adapter = ExternalAdapter::standard(algo, args.binary.unwrap_or_else(|| algo.default_binary()))
        .with_observer(Arc::new(sampler));
    let pb = spinner()?;
    pb.set_message(format!("{algo} N={} ({})", args.copies, human_bytes(container_bytes)));
    let (mut metrics, attempts) = RetrySupervisor::new(args.retries, 2)
        .compress(&adapter, &container_path, &compressed_path, Duration::from_secs(args.timeout))
        .and_then(|outcome| outcome.into_result(args.copies))
        .map_err(|e| recompress_cli_error("compression failed", e))?;
    pb.finish_and_clear();
    let compress_s = started.elapsed().as_secs_f64() - pack_s;
    samples.extend(std::mem::take(&mut metrics.samples).into_iter().map(|mut s| {
        s.t_rel_s += pack_s;
        s
    }));

    let timeseries = args.out_dir.join(format!("telemetry_{algo}_N_{:04}.csv", args.copies));
    report::write_rows(&timeseries, &samples)
        .map_err(|e| recompress_cli_error("writing telemetry", e))?;

    let final_dir = args.out_dir.join("final");
    fs::create_dir_all(&final_dir).map_err(|e| io_cli_error("creating directory", &final_dir, e))?;
    let final_container = final_dir.join(format!("final_{stem}.bin"));
    let final_artifact = final_dir.join(format!("final_{stem}.{}", algo.extension()));
    fs::copy(&container_path, &final_container)
        .map_err(|e| io_cli_error("copying container", &container_path, e))?;
    fs::copy(&compressed_path, &final_artifact)
        .map_err(|e| io_cli_error("copying artifact", &compressed_path, e))?;

    let summary = json!({
        "input": args.input,
        "algorithm": algo,
        "copies": args.copies,
        "container_bytes": container_bytes,
        "compressed_bytes": metrics.compressed_bytes,
        "reduction_pct": reduction_pct(container_bytes, metrics.compressed_bytes),
        "pack_seconds": pack_s,
        "compress_seconds": compress_s,
        "tool_reported_seconds": metrics.elapsed_seconds,
        "attempts": attempts,
        "samples": samples.len(),
        "timeseries_csv": timeseries,
        "final_container": final_container,
        "final_artifact": final_artifact,
    });
    let summary_path = args.out_dir.join("summary.json");
    report::write_json(&summary_path, &summary)
        .map_err(|e| recompress_cli_error("writing summary", e))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
