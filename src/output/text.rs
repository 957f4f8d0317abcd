//! Final textual summary.
//!
//! One block per job: per-direction throughput, IOPS, latency stats and
//! percentiles, the latency distributions, depth maps, and process
//! accounting, with per-worker error context at the end.

use super::{format_bytes, format_latency_us};
use crate::config::workload::DataDir;
use crate::config::Options;
use crate::stats::histogram::LatHistogram;
use crate::stats::{WorkerStats, DEPTH_BINS, LAT_MS_LIMITS, LAT_US_LIMITS};
use crate::supervisor::JobSummary;
use std::fmt::Write;

/// Render the whole job summary.
pub fn render(summary: &JobSummary, opts: &Options) -> String {
    let mut out = String::new();
    let stamp = chrono::Local::now().format("%a %b %e %T %Y");

    let _ = writeln!(
        out,
        "{}: (jobs={}, err={}): {}",
        summary.name,
        summary.per_worker.len(),
        summary.stats.total_err_count(),
        stamp
    );

    for dir in DataDir::ALL {
        render_direction(&mut out, &summary.stats, dir, opts);
    }

    render_latency_distribution(&mut out, &summary.stats);
    render_depths(&mut out, &summary.stats);
    render_cpu(&mut out, &summary.stats);

    for failure in &summary.failures {
        let errno = failure
            .errno
            .map(|e| format!(", errno={}", e))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  worker {}: error ({:?}{}): {}",
            failure.worker, failure.kind, errno, failure.message
        );
    }
    out
}

fn render_direction(out: &mut String, stats: &WorkerStats, dir: DataDir, opts: &Options) {
    let d = stats.dir(dir);
    if d.io_blocks == 0 {
        return;
    }
    let runt_ms = stats.runtime().as_millis().max(1);
    let _ = writeln!(
        out,
        "  {}: io={}, bw={}/s, iops={:.0}, runt={}ms",
        dir,
        format_bytes(d.io_bytes),
        format_bytes(stats.bandwidth(dir) as u64),
        stats.iops(dir),
        runt_ms
    );

    for (label, stat) in [("slat", &d.slat), ("clat", &d.clat), (" lat", &d.lat)] {
        if stat.n() == 0 {
            continue;
        }
        let _ = writeln!(
            out,
            "    {} (usec): min={}, max={}, avg={:.2}, stdev={:.2}",
            label,
            stat.min().unwrap_or(0),
            stat.max().unwrap_or(0),
            stat.mean(),
            stat.stddev()
        );
    }

    if opts.timing.clat_percentiles && !d.clat_hist.is_empty() {
        let _ = writeln!(out, "    clat percentiles (usec):");
        let pcts = d.clat_hist.percentiles(&opts.timing.percentile_list);
        for chunk in pcts.chunks(4) {
            let cells: Vec<String> = chunk
                .iter()
                .map(|(p, v)| format!("{:>6.2}th=[{:>8}]", p, v))
                .collect();
            let _ = writeln!(out, "     | {}", cells.join(", "));
        }
    }
}

fn render_latency_distribution(out: &mut String, stats: &WorkerStats) {
    let total: u64 = stats.lat_us_buckets().iter().sum::<u64>()
        + stats.lat_ms_buckets().iter().sum::<u64>();
    if total == 0 {
        return;
    }
    let pct = |n: u64| n as f64 * 100.0 / total as f64;

    let us: Vec<String> = LAT_US_LIMITS
        .iter()
        .zip(stats.lat_us_buckets())
        .filter(|(_, &n)| n > 0)
        .map(|(limit, &n)| format!("{}={:.2}%", limit, pct(n)))
        .collect();
    if !us.is_empty() {
        let _ = writeln!(out, "  lat (usec): {}", us.join(", "));
    }

    let ms: Vec<String> = LAT_MS_LIMITS
        .iter()
        .zip(stats.lat_ms_buckets())
        .filter(|(_, &n)| n > 0)
        .map(|(limit, &n)| {
            if *limit == u64::MAX {
                format!(">=2000={:.2}%", pct(n))
            } else {
                format!("{}={:.2}%", limit, pct(n))
            }
        })
        .collect();
    if !ms.is_empty() {
        let _ = writeln!(out, "  lat (msec): {}", ms.join(", "));
    }
}

fn render_depths(out: &mut String, stats: &WorkerStats) {
    const LABELS: [&str; DEPTH_BINS] = ["1", "2", "4", "8", "16", "32", ">=64"];
    for (name, map) in [
        ("IO depths ", stats.queue_depth()),
        ("submit    ", stats.submit_depth()),
        ("complete  ", stats.complete_depth()),
    ] {
        let total = map.total();
        if total == 0 {
            continue;
        }
        let cells: Vec<String> = LABELS
            .iter()
            .zip(map.bins())
            .map(|(label, &n)| format!("{}={:.1}%", label, n as f64 * 100.0 / total as f64))
            .collect();
        let _ = writeln!(out, "  {}: {}", name, cells.join(", "));
    }
}

fn render_cpu(out: &mut String, stats: &WorkerStats) {
    let Some(usage) = stats.usage_delta() else {
        return;
    };
    let runt_us = stats.runtime().as_micros().max(1) as f64;
    let _ = writeln!(
        out,
        "  cpu: usr={:.2}%, sys={:.2}%, ctx={}, majf={}, minf={}",
        usage.user_us as f64 * 100.0 / runt_us,
        usage.system_us as f64 * 100.0 / runt_us,
        usage.voluntary_ctx_switches + usage.involuntary_ctx_switches,
        usage.major_faults,
        usage.minor_faults
    );
}

/// One-line percentile rendering used by debug logging.
pub fn percentile_line(hist: &LatHistogram, list: &[f64]) -> String {
    hist.percentiles(list)
        .iter()
        .map(|(p, v)| format!("p{}={}", p, format_latency_us(*v as f64)))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::supervisor::{JobSummary, WorkerFailure};
    use std::time::Duration;

    fn summary_with_writes() -> JobSummary {
        let mut stats = WorkerStats::new();
        for i in 0..100u64 {
            stats.record_completion(DataDir::Write, 4096, Some(2), Some(100 + i), Some(102 + i));
        }
        stats.record_queue_depth(1);
        stats.set_runtime(Duration::from_secs(1));
        JobSummary {
            name: "render".into(),
            stats,
            per_worker: Vec::new(),
            failures: vec![],
            elapsed: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_render_contains_key_sections() {
        let opts = Options::default();
        let text = render(&summary_with_writes(), &opts);
        assert!(text.contains("write: io=400.0KiB"));
        assert!(text.contains("clat (usec)"));
        assert!(text.contains("clat percentiles"));
        assert!(text.contains("IO depths"));
    }

    #[test]
    fn test_render_reports_failures() {
        let mut summary = summary_with_writes();
        summary.failures.push(WorkerFailure {
            worker: 2,
            kind: ErrorKind::IoFailed,
            errno: Some(libc::EIO),
            message: "io failed: I/O error".into(),
        });
        let opts = Options::default();
        let text = render(&summary, &opts);
        assert!(text.contains("worker 2"));
        assert!(text.contains("errno=5"));
    }

    #[test]
    fn test_empty_directions_omitted() {
        let opts = Options::default();
        let text = render(&summary_with_writes(), &opts);
        assert!(!text.contains("  read:"));
        assert!(!text.contains("  trim:"));
    }
}
