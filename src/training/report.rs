//! Human-readable training summary (§4.7 step 7), written as a plain
//! markdown file since the core has no workflow-engine artifact store of
//! its own to publish one through.

use std::path::Path;

use super::HorizonFit;

pub fn write_markdown(path: &Path, results: &[HorizonFit]) -> std::io::Result<()> {
    let mut out = String::new();
    out.push_str("# Training run summary\n\n");
    out.push_str("| horizon | status | val_mae | val_rmse | val_mape | val_r2 | naive_rmse | tail_rmse | duration_s |\n");
    out.push_str("|---|---|---|---|---|---|---|---|---|\n");

    for r in results {
        let status = if r.error.is_some() { "failed" } else { "ok" };
        let fmt = |v: Option<f64>| v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} | {:.2} |\n",
            r.horizon_hours,
            status,
            fmt(r.metrics.map(|m| m.mae)),
            fmt(r.metrics.map(|m| m.rmse)),
            fmt(r.metrics.map(|m| m.mape)),
            fmt(r.metrics.map(|m| m.r2)),
            fmt(r.naive_metrics.map(|m| m.rmse)),
            fmt(r.tail_metrics.map(|m| m.rmse)),
            r.duration_seconds,
        ));
    }

    let failures: Vec<&HorizonFit> = results.iter().filter(|r| r.error.is_some()).collect();
    if !failures.is_empty() {
        out.push_str("\n## Failures\n\n");
        for f in failures {
            out.push_str(&format!(
                "- horizon {}: {}\n",
                f.horizon_hours,
                f.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    std::fs::write(path, out)
}
