//! Human-readable output for the apk-evasion CLI.

use std::collections::BTreeMap;

use evasion_cache::MetricsSnapshot;
use evasion_core::{AttackRecord, Outcome};

fn format_score(score: Option<f64>) -> String {
    score.map(|s| format!("{:.4}", s)).unwrap_or_else(|| "-".to_string())
}

/// One line per record plus outcome totals.
pub fn print_summary(records: &[AttackRecord]) {
    for record in records {
        let outcome = serde_json::to_value(record.outcome)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        println!(
            "{:<18} {} -> {}  queries={}  {}",
            outcome,
            format_score(record.pre_score),
            format_score(record.final_score),
            record.queries,
            record.artifact.display()
        );
        if let Some(failure) = &record.failure {
            println!("{:<18} {}", "", failure);
        }
    }

    let mut totals: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *totals.entry(format!("{:?}", record.outcome)).or_default() += 1;
    }
    let attacked = records
        .iter()
        .filter(|r| r.outcome != Outcome::SkippedBenign)
        .count();
    let evaded = records.iter().filter(|r| r.evaded()).count();

    println!();
    println!(
        "Summary: {} artifacts, {} attacked, {} evaded",
        records.len(),
        attacked,
        evaded
    );
    for (outcome, count) in totals {
        println!("  {:<16} {}", outcome, count);
    }
}

pub fn print_cache_metrics(metrics: &MetricsSnapshot) {
    if metrics.lookups() == 0 {
        return;
    }
    println!(
        "Error-free cache: {} hits, {} misses, {} corrupt ({:.0}% hit rate)",
        metrics.hits,
        metrics.misses,
        metrics.corrupt,
        metrics.hit_rate() * 100.0
    );
}
