//! Embeddings JSONL file: one [`EmbeddingRecord`] per line.
//!
//! The file is the handoff artifact between the embed and upload stages.
//! Batches append as they complete so the file always reflects every
//! successfully embedded batch.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::info;

use docvec_shared::{EmbeddingRecord, PipelineError, Result};

/// Append records to the file, creating it (and parent directories) if
/// needed. Returns the number of records written.
pub fn append_records(path: &Path, records: &[EmbeddingRecord]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PipelineError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| PipelineError::validation(format!("record serialization: {e}")))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"))
            .map_err(|e| PipelineError::io(path, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;

    Ok(records.len())
}

/// Read every record from the file. A missing file is an empty list; a
/// malformed line is an error naming the line number.
pub fn read_records(path: &Path) -> Result<Vec<EmbeddingRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| PipelineError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EmbeddingRecord = serde_json::from_str(&line).map_err(|e| {
            PipelineError::validation(format!(
                "{} line {}: {e}",
                path.display(),
                number + 1
            ))
        })?;
        records.push(record);
    }

    info!(path = %path.display(), count = records.len(), "embeddings loaded");
    Ok(records)
}

/// Delete the file if present (fresh, non-resume runs).
pub fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| PipelineError::io(path, e))?;
    }
    Ok(())
}
