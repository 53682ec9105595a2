//! JSON-lines export of stored retailer records

use crate::output::OutputResult;
use crate::storage::Storage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes every record of a run as one JSON object per line
///
/// Keys are camelCase and `scrapedAt` is an ISO-8601 timestamp.
///
/// # Returns
///
/// The number of lines written
pub fn export_json_lines(
    storage: &dyn Storage,
    run_id: i64,
    output_path: &Path,
) -> OutputResult<usize> {
    let records = storage.load_records(run_id)?;

    let mut writer = BufWriter::new(File::create(output_path)?);
    for record in &records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;

    tracing::info!(
        "Exported {} records of run {} to {}",
        records.len(),
        run_id,
        output_path.display()
    );
    Ok(records.len())
}
