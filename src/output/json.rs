//! Machine-readable summary (`--output json`).

use crate::config::workload::DataDir;
use crate::config::Options;
use crate::stats::WorkerStats;
use crate::supervisor::JobSummary;
use serde_json::{json, Value};

pub fn render(summary: &JobSummary, opts: &Options) -> Value {
    let mut dirs = serde_json::Map::new();
    for dir in DataDir::ALL {
        if summary.stats.dir(dir).io_blocks > 0 {
            dirs.insert(dir.to_string(), direction(&summary.stats, dir, opts));
        }
    }

    let failures: Vec<Value> = summary
        .failures
        .iter()
        .map(|f| {
            json!({
                "worker": f.worker,
                "kind": format!("{:?}", f.kind),
                "errno": f.errno,
                "message": f.message,
            })
        })
        .collect();

    json!({
        "job": summary.name,
        "workers": summary.per_worker.len(),
        "runtime_ms": summary.stats.runtime().as_millis() as u64,
        "total_errors": summary.stats.total_err_count(),
        "directions": Value::Object(dirs),
        "depth": {
            "queue": summary.stats.queue_depth().bins().to_vec(),
            "submit": summary.stats.submit_depth().bins().to_vec(),
            "complete": summary.stats.complete_depth().bins().to_vec(),
        },
        "failures": failures,
    })
}

fn direction(stats: &WorkerStats, dir: DataDir, opts: &Options) -> Value {
    let d = stats.dir(dir);
    let percentiles: Vec<Value> = d
        .clat_hist
        .percentiles(&opts.timing.percentile_list)
        .iter()
        .map(|(p, v)| json!({ "p": p, "usec": v }))
        .collect();

    json!({
        "ios": d.io_blocks,
        "bytes": d.io_bytes,
        "bw_bytes_per_sec": stats.bandwidth(dir) as u64,
        "iops": stats.iops(dir),
        "slat_us": stat_block(&d.slat),
        "clat_us": stat_block(&d.clat),
        "lat_us": stat_block(&d.lat),
        "clat_percentiles": percentiles,
    })
}

fn stat_block(stat: &crate::stats::RunningStat) -> Value {
    json!({
        "min": stat.min(),
        "max": stat.max(),
        "mean": stat.mean(),
        "stddev": stat.stddev(),
        "n": stat.n(),
    })
}
