//! Plain-text rendering of metric and decomposition results.

use crate::decompose::{DecompositionResult, INTERACTION};
use crate::engine::MetricRecord;
use crate::registry::MetricStatus;

const WIDTH: usize = 70;
const COUNT_UNITS: &[&str] = &["customers", "orders", "items"];

/// Format a value for display by unit: rates as percentages, counts with
/// thousands separators, everything else with two decimals.
pub fn format_value(value: Option<f64>, unit: &str) -> String {
    let Some(v) = value else {
        return "NULL".to_string();
    };
    if unit == "rate" {
        format!("{:.1}%", v * 100.0)
    } else if COUNT_UNITS.contains(&unit) {
        group_thousands(v.round())
    } else {
        format!("{:.2}", v)
    }
}

fn group_thousands(v: f64) -> String {
    let digits = format!("{:.0}", v.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if v < 0.0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn status_icon(status: MetricStatus) -> &'static str {
    match status {
        MetricStatus::Ok => "✓",
        MetricStatus::Warning => "⚠️",
        _ => "❌",
    }
}

pub fn render_metric_report(executive: &[MetricRecord], diagnostic: &[MetricRecord]) -> String {
    let rule = "=".repeat(WIDTH);
    let mut lines = vec![
        rule.clone(),
        "METRIC COMPUTATION REPORT".to_string(),
        rule.clone(),
        String::new(),
        "📊 EXECUTIVE SUMMARY (P0/P1 Metrics)".to_string(),
        "-".repeat(WIDTH),
    ];
    for r in executive {
        lines.push(format!(
            "{} {}: {} [{}]",
            status_icon(r.status),
            r.display_name,
            format_value(r.value, r.unit),
            r.owner_role
        ));
    }

    if !diagnostic.is_empty() {
        lines.push(String::new());
        lines.push("🔍 DIAGNOSTIC METRICS (P2/P3)".to_string());
        lines.push("-".repeat(WIDTH));
        for r in diagnostic {
            lines.push(format!(
                "  {}: {} [{}]",
                r.display_name,
                format_value(r.value, r.unit),
                r.owner_role
            ));
        }
    }

    lines.push(String::new());
    lines.push(rule);
    lines.join("\n")
}

/// Driver attribution summary. A negligible interaction term is omitted.
pub fn render_decomposition(result: &DecompositionResult) -> String {
    let mut lines = vec![
        format!(
            "{} change {} → {}",
            result.metric_name, result.period_start, result.period_end
        ),
        format!(
            "Total Change: {:+.2} ({:+.1}%)",
            result.total_change,
            result.percent_change * 100.0
        ),
    ];
    for share in result.driver_shares() {
        if share.driver == INTERACTION && share.contribution.abs() <= 0.01 {
            continue;
        }
        lines.push(format!(
            "  {}: {:+.2} ({:.1}% of change)",
            share.driver,
            share.contribution,
            share.share * 100.0
        ));
    }
    lines.join("\n")
}
