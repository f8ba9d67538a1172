//! Optional CPU and memory sampling of a running compressor.
//!
//! The runner hands a freshly spawned pid to a [`ProcessObserver`]; the
//! observer polls on its own thread and never influences timeouts. Any setup
//! failure means "no samples", never an error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tracing::{debug, warn};

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const CGROUP_PARENT: &str = "measure";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pack,
    Compress,
}

/// One telemetry point. Field names match the timeseries CSV header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time_iso: String,
    pub t_rel_s: f64,
    pub phase: Phase,
    pub cpu_pct: f64,
    pub cpu_usage_s: f64,
    pub mem_bytes: u64,
    pub note: String,
}

pub trait ProcessObserver: Send + Sync {
    /// Start watching `pid`. `None` means telemetry is unavailable.
    fn observe(&self, phase: Phase, pid: u32) -> Option<Box<dyn Observation>>;
}

pub trait Observation: Send {
    /// Stop sampling and hand back everything collected.
    fn finish(self: Box<Self>) -> Vec<Sample>;
}

fn now_iso() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f%z").to_string()
}

/// Polls a process through `sysinfo`, optionally inside a dedicated cgroup v2.
#[derive(Debug, Clone)]
pub struct SysinfoSampler {
    pub interval: Duration,
    pub use_cgroup: bool,
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(50),
            use_cgroup: false,
        }
    }
}

impl SysinfoSampler {
    pub fn new(interval: Duration, use_cgroup: bool) -> Self {
        Self {
            interval,
            use_cgroup,
        }
    }

    fn cgroup_for(&self, pid: u32) -> Option<CgroupProbe> {
        if !self.use_cgroup {
            return None;
        }
        let name = format!("recompress_{pid}");
        let probe = match CgroupProbe::create(Path::new(CGROUP_ROOT), &name) {
            Ok(probe) => probe,
            Err(e) => {
                warn!(error = %e, "cgroup v2 unavailable, falling back to process sampling");
                return None;
            }
        };
        if let Err(e) = probe.attach(pid) {
            warn!(error = %e, pid, "could not attach to cgroup, falling back to process sampling");
            return None;
        }
        Some(probe)
    }
}

impl ProcessObserver for SysinfoSampler {
    fn observe(&self, phase: Phase, pid: u32) -> Option<Box<dyn Observation>> {
        let cgroup = self.cgroup_for(pid);
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let interval = self.interval;
        let handle = thread::Builder::new()
            .name("telemetry".into())
            .spawn(move || sample_loop(phase, pid, interval, cgroup, &flag))
            .map_err(|e| warn!(error = %e, "could not start telemetry thread"))
            .ok()?;
        Some(Box::new(SamplerHandle { stop, handle }))
    }
}

struct SamplerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Vec<Sample>>,
}

impl Observation for SamplerHandle {
    fn finish(self: Box<Self>) -> Vec<Sample> {
        self.stop.store(true, Ordering::Relaxed);
        self.handle.join().unwrap_or_else(|_| {
            warn!("telemetry thread panicked; samples dropped");
            Vec::new()
        })
    }
}

fn sample_loop(
    phase: Phase,
    pid: u32,
    interval: Duration,
    cgroup: Option<CgroupProbe>,
    stop: &AtomicBool,
) -> Vec<Sample> {
    let mut sys = System::new();
    let target = Pid::from_u32(pid);
    let start = Instant::now();
    let ncpu = {
        sys.refresh_cpu();
        sys.cpus().len().max(1) as f64
    };
    let mut samples = Vec::new();
    let mut cpu_time = 0.0f64;
    let mut last_cgroup_cpu = cgroup.as_ref().and_then(CgroupProbe::cpu_usage_seconds);
    let mut last_mem = 0u64;
    let mut last_tick = start;

    loop {
        let finished = stop.load(Ordering::Relaxed);
        sys.refresh_cpu();
        let alive = sys.refresh_process(target);
        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        let (raw_cpu, proc_mem) = sys
            .process(target)
            .map(|p| (p.cpu_usage() as f64, p.memory()))
            .unwrap_or((0.0, 0));

        let (cpu_pct, usage_s) = match (&cgroup, last_cgroup_cpu) {
            (Some(probe), Some(prev)) => {
                let current = probe.cpu_usage_seconds().unwrap_or(prev);
                let pct = if dt > 0.0 {
                    (current - prev) / dt * 100.0 / ncpu
                } else {
                    0.0
                };
                last_cgroup_cpu = Some(current);
                (pct.max(0.0), current)
            }
            _ => {
                cpu_time += raw_cpu / 100.0 * dt;
                (raw_cpu / ncpu, cpu_time)
            }
        };

        let mut mem = cgroup
            .as_ref()
            .and_then(CgroupProbe::memory_current)
            .unwrap_or(proc_mem);
        // A zero reading from a live process is a sampling gap, not real.
        if mem == 0 && alive && !finished {
            mem = last_mem;
        } else {
            last_mem = mem;
        }

        let note = if samples.is_empty() {
            "start"
        } else if finished || !alive {
            "end"
        } else {
            ""
        };
        samples.push(Sample {
            time_iso: now_iso(),
            t_rel_s: start.elapsed().as_secs_f64(),
            phase,
            cpu_pct,
            cpu_usage_s: usage_s,
            mem_bytes: mem,
            note: note.to_string(),
        });

        if finished || !alive {
            break;
        }
        thread::sleep(interval);
    }
    debug!(pid, samples = samples.len(), "telemetry finished");
    samples
}

/// Snapshot of the orchestrator's own process, used around the pack phase.
pub fn sample_self(phase: Phase, t_rel_s: f64, note: &str) -> Option<Sample> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut sys = System::new();
    sys.refresh_cpu();
    if !sys.refresh_process(pid) {
        return None;
    }
    let ncpu = sys.cpus().len().max(1) as f64;
    let process = sys.process(pid)?;
    Some(Sample {
        time_iso: now_iso(),
        t_rel_s,
        phase,
        cpu_pct: process.cpu_usage() as f64 / ncpu,
        cpu_usage_s: process.run_time() as f64,
        mem_bytes: process.memory(),
        note: note.to_string(),
    })
}

/// A child cgroup under `<root>/measure/` with cpu and memory accounting.
#[derive(Debug)]
pub struct CgroupProbe {
    dir: PathBuf,
}

impl CgroupProbe {
    pub fn create(root: &Path, name: &str) -> io::Result<Self> {
        if !root.join("cgroup.controllers").exists() {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{} is not a cgroup v2 hierarchy", root.display()),
            ));
        }
        let parent = root.join(CGROUP_PARENT);
        fs::create_dir_all(&parent)?;
        enable_controllers(&parent);
        let dir = parent.join(name);
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn attach(&self, pid: u32) -> io::Result<()> {
        fs::write(self.dir.join("cgroup.procs"), pid.to_string())
    }

    pub fn cpu_usage_seconds(&self) -> Option<f64> {
        let text = fs::read_to_string(self.dir.join("cpu.stat")).ok()?;
        parse_usage_usec(&text).map(|usec| usec as f64 / 1_000_000.0)
    }

    pub fn memory_current(&self) -> Option<u64> {
        fs::read_to_string(self.dir.join("memory.current"))
            .ok()?
            .trim()
            .parse()
            .ok()
    }
}

impl Drop for CgroupProbe {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir(&self.dir) {
            debug!(error = %e, dir = %self.dir.display(), "cgroup left behind");
        }
    }
}

/// Turn on cpu and memory in the parent's subtree so children get the files.
fn enable_controllers(parent: &Path) {
    let available = fs::read_to_string(parent.join("cgroup.controllers")).unwrap_or_default();
    for controller in ["cpu", "memory"] {
        if !available.split_whitespace().any(|c| c == controller) {
            continue;
        }
        let control = parent.join("cgroup.subtree_control");
        if let Err(e) = fs::write(&control, format!("+{controller}")) {
            debug!(error = %e, controller, "could not enable cgroup controller");
        }
    }
}

fn parse_usage_usec(cpu_stat: &str) -> Option<u64> {
    cpu_stat.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("usage_usec"), Some(value)) => value.parse().ok(),
            _ => None,
        }
    })
}
