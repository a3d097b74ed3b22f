//! Output rendering for the `probe:*` commands and the `validate` report
//! (spec.md §6: `console` framed table, `csv` two-column rows, `json` raw
//! mapping).

use crate::cli::OutputFormat;
use crate::probe::{EncryptionInfo, ExtensionRow};
use crate::runner::RunReport;

/// Renders the compliance-battery report: one line per test
/// (`description ... PASS`/`FAIL`), with a bracketed "Debug Log" transcript
/// section for any test that failed (spec.md §4.5, §7).
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    for outcome in &report.outcomes {
        let status = if outcome.passed { "PASS" } else { "FAIL" };
        out.push_str(&format!("{} ... {}\n", outcome.description, status));
        if !outcome.passed {
            if let Some(reason) = &outcome.error {
                out.push_str(&format!("  reason: {reason}\n"));
            }
            out.push_str("  [Debug Log]\n");
            if let Some(transcript) = &outcome.transcript {
                for line in transcript.lines() {
                    out.push_str("  ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
    }
    out
}

pub fn render_encryption(info: &EncryptionInfo, format: OutputFormat) -> String {
    let rows = [
        ("protocol", info.protocol.as_str()),
        ("cipher_name", info.cipher_name.as_str()),
        ("cipher_bits", info.cipher_bits.as_str()),
        ("cipher_version", info.cipher_version.as_str()),
    ];
    match format {
        OutputFormat::Console => render_console_table("Field", "Value", &rows),
        OutputFormat::Csv => render_csv("Field", "Value", &rows),
        OutputFormat::Json => serde_json::to_string_pretty(info).expect("EncryptionInfo is always serializable"),
    }
}

pub fn render_extensions(rows: &[ExtensionRow], format: OutputFormat) -> String {
    match format {
        OutputFormat::Console => {
            let pairs: Vec<(&str, String)> = rows
                .iter()
                .map(|r| (r.keyword.as_str(), r.parameters.join(" ")))
                .collect();
            let as_str: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
            render_console_table("Name", "Value", &as_str)
        }
        OutputFormat::Csv => {
            let pairs: Vec<(&str, String)> = rows
                .iter()
                .map(|r| (r.keyword.as_str(), r.parameters.join(" ")))
                .collect();
            let as_str: Vec<(&str, &str)> = pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
            render_csv("Name", "Value", &as_str)
        }
        OutputFormat::Json => serde_json::to_string_pretty(rows).expect("ExtensionRow is always serializable"),
    }
}

/// A framed two-column table, the `console` format's common shape across
/// both probe commands.
fn render_console_table(header_a: &str, header_b: &str, rows: &[(&str, &str)]) -> String {
    let width_a = rows
        .iter()
        .map(|(a, _)| a.len())
        .chain(std::iter::once(header_a.len()))
        .max()
        .unwrap_or(0);
    let width_b = rows
        .iter()
        .map(|(_, b)| b.len())
        .chain(std::iter::once(header_b.len()))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    let rule = format!("+-{}-+-{}-+\n", "-".repeat(width_a), "-".repeat(width_b));
    out.push_str(&rule);
    out.push_str(&format!("| {header_a:<width_a$} | {header_b:<width_b$} |\n"));
    out.push_str(&rule);
    for (a, b) in rows {
        out.push_str(&format!("| {a:<width_a$} | {b:<width_b$} |\n"));
    }
    out.push_str(&rule);
    out
}

fn render_csv(header_a: &str, header_b: &str, rows: &[(&str, &str)]) -> String {
    let mut out = format!("{header_a},{header_b}\n");
    for (a, b) in rows {
        out.push_str(&csv_field(a));
        out.push(',');
        out.push_str(&csv_field(b));
        out.push('\n');
    }
    out
}

/// Quotes a CSV field if it contains a comma, quote, or newline.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TestOutcome;

    #[test]
    fn report_marks_failures_with_debug_log() {
        let report = RunReport {
            outcomes: vec![
                TestOutcome {
                    description: "server advertises AUTH",
                    passed: true,
                    transcript: None,
                    error: None,
                },
                TestOutcome {
                    description: "submission requires authentication",
                    passed: false,
                    transcript: Some("~> MAIL FROM:<>\n250 ok\n".to_string()),
                    error: Some("server accepted submission without authentication".to_string()),
                },
            ],
        };
        let rendered = render_report(&report);
        assert!(rendered.contains("server advertises AUTH ... PASS"));
        assert!(rendered.contains("submission requires authentication ... FAIL"));
        assert!(rendered.contains("[Debug Log]"));
        assert!(rendered.contains("MAIL FROM"));
    }

    #[test]
    fn csv_quotes_fields_with_commas() {
        let rows = [("AUTH", "PLAIN, LOGIN")];
        let csv = render_csv("Name", "Value", &rows);
        assert!(csv.contains("\"PLAIN, LOGIN\""));
    }
}
