//! Markdown summary generation
//!
//! This module generates a human-readable markdown summary of a run:
//! totals, per-state session counts and the postal codes that failed.

use crate::output::stats::RunStatistics;
use crate::output::OutputResult;
use crate::state::CrawlState;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Generates a markdown summary from run statistics
///
/// # Arguments
///
/// * `stats` - Statistics of the run to summarize
/// * `output_path` - Path where the markdown file should be written
pub fn generate_markdown_summary(stats: &RunStatistics, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(stats);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats run statistics as markdown
pub fn format_markdown_summary(stats: &RunStatistics) -> String {
    let mut md = String::new();

    md.push_str("# Händler-Scout Run Summary\n\n");

    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Run ID**: {}\n", stats.run.id));
    md.push_str(&format!("- **Started**: {}\n", stats.run.started_at));
    if let Some(finished) = &stats.run.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished));
    }
    if let Some(duration) = stats.duration_seconds() {
        md.push_str(&format!(
            "- **Duration**: {} seconds ({:.2} minutes)\n",
            duration,
            duration as f64 / 60.0
        ));
    }
    md.push_str(&format!("- **Status**: {}\n", stats.run.status.to_db_string()));
    md.push_str(&format!("- **Config Hash**: {}\n\n", stats.run.config_hash));

    md.push_str("## Totals\n\n");
    md.push_str(&format!(
        "- **Postal Codes Processed**: {}\n",
        stats.total_sessions
    ));
    md.push_str(&format!("- **Retailers Stored**: {}\n", stats.total_records));
    md.push_str(&format!(
        "- **Dropped as Duplicates**: {}\n",
        stats.total_dropped
    ));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        stats.success_rate()
    ));

    md.push_str("## Sessions by Final State\n\n");
    md.push_str("| State | Count |\n");
    md.push_str("|-------|-------|\n");
    for state in CrawlState::all_states() {
        let count = stats.sessions_by_state.get(&state).copied().unwrap_or(0);
        md.push_str(&format!("| {} | {} |\n", state, count));
    }
    md.push('\n');

    if !stats.failed_postal_codes.is_empty() {
        md.push_str("## Failed Postal Codes\n\n");
        md.push_str("| Postal Code | Error |\n");
        md.push_str("|-------------|-------|\n");
        for (code, error) in &stats.failed_postal_codes {
            let error = error.as_deref().unwrap_or("-").replace('|', "\\|");
            md.push_str(&format!("| {} | {} |\n", code, error));
        }
        md.push('\n');
    }

    md
}
