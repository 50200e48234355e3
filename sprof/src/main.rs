//! # sprof - Main Entry Point
//!
//! Profiles the built-in toy interpreter with the CPU sampler, the memory
//! sampler or both, then prints the heaviest call stacks and optionally saves
//! the profiles as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use sprof::cli::Args;
use sprof::domain::{ConfigError, SamplerKind};
use sprof::export::{heaviest, SnapshotExporter};
use sprof::host::ShadowStack;
use sprof::sampler::Snapshot;
use sprof::timer::Alarm;
use sprof::workload::{frame_names, Interpreter};
use sprof::Profiler;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Frames the interpreter's shadow stack can store
const SHADOW_STACK_FRAMES: usize = 256;

/// Reached from the SIGPROF handler, so both live in statics
static STACK: OnceLock<Arc<ShadowStack>> = OnceLock::new();
static PROFILER: OnceLock<Profiler> = OnceLock::new();
static STOP: AtomicBool = AtomicBool::new(false);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Tick hook run from the SIGPROF handler
fn on_tick() {
    if let Some(profiler) = PROFILER.get() {
        profiler.cpu().tick();
    }
}

#[cfg(unix)]
fn cpu_alarm() -> Result<Box<dyn Alarm>> {
    let alarm = sprof::timer::ItimerAlarm::install(on_tick)
        .context("Failed to install SIGPROF handler")?;
    Ok(Box::new(alarm))
}

#[cfg(not(unix))]
fn cpu_alarm() -> Result<Box<dyn Alarm>> {
    log::warn!("No interval timer on this platform, CPU samples will not be taken");
    Ok(Box::new(sprof::timer::ManualAlarm::new()))
}

fn print_hotspots(snapshot: &Snapshot, top: usize) {
    let names = frame_names();
    let unit = match snapshot.kind() {
        SamplerKind::Cpu => "ms",
        SamplerKind::Memory => "B",
    };

    println!(
        "\n{} profile: {} stacks, total {}{unit}, {} evictions, {} dropped",
        snapshot.kind(),
        snapshot.len(),
        snapshot.total_weight(),
        snapshot.evictions(),
        snapshot.dropped()
    );
    for hotspot in heaviest(snapshot, top) {
        let frames: Vec<String> = hotspot
            .frames
            .iter()
            .map(|f| match names.get(f) {
                Some(name) => name.clone(),
                None if f.is_reserved() => "[gc]".to_string(),
                None => format!("#{}", f.get()),
            })
            .collect();
        println!(
            "  {:>10}{unit} {:>5.1}%  {}",
            hotspot.weight,
            hotspot.share,
            frames.join(" <- ")
        );
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    let stack = STACK.get_or_init(|| Arc::new(ShadowStack::new(SHADOW_STACK_FRAMES)));
    let profiler = Profiler::new(&args.profiler_config(), stack.clone(), cpu_alarm()?)
        .context("Invalid profiler configuration")?;
    let profiler: &'static Profiler = PROFILER.get_or_init(move || profiler);

    if !quiet {
        println!("sprof v{}", env!("CARGO_PKG_VERSION"));
        println!("mode: {:?}", args.mode);
    }

    let kinds = args.mode.kinds();
    for kind in kinds {
        match kind {
            SamplerKind::Cpu => {
                profiler.cpu().start(args.interval).context("Failed to start CPU profiler")?;
                if !quiet {
                    println!("CPU sampling: every {}ms of CPU time", args.interval);
                }
            }
            SamplerKind::Memory => {
                profiler.memory().start().context("Failed to start memory profiler")?;
                if !quiet {
                    match args.alloc_sample_bytes {
                        0 => println!("memory sampling: every allocation"),
                        bytes => println!("memory sampling: every {bytes} bytes"),
                    }
                }
            }
        }
    }

    let interpreter = std::thread::Builder::new()
        .name("interpreter".to_string())
        .spawn(move || Interpreter::new(stack, profiler).run_until(&STOP))
        .context("Failed to spawn interpreter thread")?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let profiling_start = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let mut status_timer = Instant::now();
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if profiling_start.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        if status_timer.elapsed() > Duration::from_secs(10) {
            info!(
                "Live stacks: cpu={}, memory={}",
                profiler.cpu().live_len(),
                profiler.memory().live_len()
            );
            status_timer = Instant::now();
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(100)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    STOP.store(true, Ordering::Relaxed);
    let runs = interpreter
        .join()
        .map_err(|_| anyhow::anyhow!("Interpreter thread panicked"))?;

    profiler.cpu().stop();
    profiler.memory().stop();

    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {runs} program runs",
            profiling_start.elapsed().as_secs_f64()
        );
    }

    let snapshots: Vec<Snapshot> = kinds.iter().map(|&kind| profiler.export(kind)).collect();
    for snapshot in &snapshots {
        print_hotspots(snapshot, args.top);
    }

    if let Some(export_path) = args.export {
        let file = File::create(&export_path)
            .with_context(|| format!("Failed to create {}", export_path.display()))?;
        let writer = BufWriter::new(file);
        let exporter = SnapshotExporter::with_names(frame_names());
        let written = match snapshots.as_slice() {
            [single] => exporter.export(single, writer),
            all => exporter.export_all(all, writer),
        };
        written.context("Failed to export profile")?;

        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    Ok(())
}
