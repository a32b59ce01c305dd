// src/pipeline/report.rs
//! The failure report: one CSV row per document that could not be converted.

use crate::corpus::portable_path;
use crate::error::PipelineError;
use crate::pipeline::OutcomeRecord;
use csv::{Terminator, WriterBuilder};
use log::info;
use std::fs;
use std::io;
use std::path::Path;

pub const HEADER: [&str; 2] = ["filename", "error_message"];

/// Writes the header and one row per failed outcome, in the order given, and
/// hands the sink back flushed.
pub fn write_rows<'a, W: io::Write>(
    sink: W,
    outcomes: impl IntoIterator<Item = &'a OutcomeRecord>,
) -> Result<W, PipelineError> {
    let mut writer = WriterBuilder::new().terminator(Terminator::CRLF).from_writer(sink);
    writer.write_record(HEADER)?;
    for outcome in outcomes {
        if let OutcomeRecord::Failed { relative_path, error, .. } = outcome {
            let filename = portable_path(relative_path);
            let message = error.to_string();
            writer.write_record([filename.as_str(), message.as_str()])?;
        }
    }
    writer.into_inner().map_err(|e| PipelineError::Io(e.into_error()))
}

/// The report as text.
pub fn render<'a>(outcomes: impl IntoIterator<Item = &'a OutcomeRecord>) -> Result<String, PipelineError> {
    let bytes = write_rows(Vec::new(), outcomes)?;
    String::from_utf8(bytes).map_err(|e| PipelineError::Internal(format!("report is not UTF-8: {}", e)))
}

/// Writes the report, replacing any earlier one.
pub fn write(path: &Path, outcomes: &[OutcomeRecord]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    write_rows(fs::File::create(path)?, outcomes)?;
    info!("[BATCH] Wrote failure report '{}'.", path.display());
    Ok(())
}

/// Deletes a report left over from an earlier run so a clean run leaves none.
pub fn remove_stale(path: &Path) -> Result<(), PipelineError> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!("[BATCH] Removed stale failure report '{}'.", path.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn failed(path: &str, error: ItemError) -> OutcomeRecord {
        OutcomeRecord::Failed {
            relative_path: PathBuf::from(path),
            input_path: PathBuf::from("/in").join(path),
            error,
        }
    }

    #[test]
    fn test_render_lists_only_failures() {
        let outcomes = vec![
            OutcomeRecord::Succeeded {
                relative_path: PathBuf::from("a/1.xml"),
                output_path: PathBuf::from("/out/a/1.xml"),
            },
            failed("b/2.xml", ItemError::Parse("unexpected end of stream at 1:9".into())),
            failed("c/3.xml", ItemError::Transform("bad, very bad".into())),
            failed("d/4.xml", ItemError::Transform("say \"hi\"\nthen stop".into())),
        ];
        let report = render(&outcomes).unwrap();
        assert_eq!(
            report,
            "filename,error_message\r\n\
             b/2.xml,unexpected end of stream at 1:9\r\n\
             c/3.xml,\"bad, very bad\"\r\n\
             d/4.xml,\"say \"\"hi\"\"\nthen stop\"\r\n"
        );
    }

    #[test]
    fn test_write_and_remove_stale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/error_log.csv");
        write(&path, &[failed("x.xml", ItemError::Io("denied".into()))]).unwrap();
        assert!(path.exists());
        remove_stale(&path).unwrap();
        assert!(!path.exists());
        // Removing a report that is not there is fine.
        remove_stale(&path).unwrap();
    }
}
