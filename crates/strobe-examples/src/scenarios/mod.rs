pub mod inspector_session;
pub mod native_calls;
pub mod recursive_workload;

use std::collections::BTreeMap;

use strobe_types::Report;
use tracing::info;

pub(crate) fn print_report(report: &Report) -> Result<(), String> {
    let json = report.to_json().map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}

/// Logs the most frequently sampled innermost frames.
pub(crate) fn log_hot_leaves(report: &Report) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for trace in report.traces() {
        if let Some(leaf) = trace.labels().first() {
            *counts.entry(leaf.as_str()).or_default() += 1;
        }
    }
    let mut hot: Vec<_> = counts.into_iter().collect();
    hot.sort_by(|a, b| b.1.cmp(&a.1));
    for (label, samples) in hot.into_iter().take(5) {
        info!(label, samples, "hot leaf");
    }
}
