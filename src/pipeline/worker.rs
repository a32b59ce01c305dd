// src/pipeline/worker.rs

use crate::error::ItemError;
use crate::pipeline::{OutcomeRecord, WorkItem};
use cei2tei_xpath1::parse_document;
use cei2tei_xslt::{Stylesheet, serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Transforms one document and writes the result into the mirrored tree.
///
/// Every failure is folded into the returned record; nothing here aborts the
/// batch.
pub fn apply(item: &WorkItem, stylesheet: &Stylesheet) -> OutcomeRecord {
    match transform_file(item, stylesheet) {
        Ok(output_path) => OutcomeRecord::Succeeded {
            relative_path: item.relative_path.clone(),
            output_path,
        },
        Err(error) => OutcomeRecord::Failed {
            relative_path: item.relative_path.clone(),
            input_path: item.input_path.clone(),
            error,
        },
    }
}

fn transform_file(item: &WorkItem, stylesheet: &Stylesheet) -> Result<PathBuf, ItemError> {
    let bytes = fs::read(&item.input_path)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| ItemError::Parse(format!("input is not valid UTF-8: {}", e)))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let output = {
        let doc = parse_document(text).map_err(|e| ItemError::Parse(e.to_string()))?;
        let result = stylesheet
            .transform(&doc)
            .map_err(|e| ItemError::Transform(e.to_string()))?;
        serialize(&result).map_err(|e| ItemError::Transform(e.to_string()))?
    };

    let file_name = item
        .input_path
        .file_name()
        .ok_or_else(|| ItemError::Io(format!("'{}' has no file name", item.input_path.display())))?;
    // Concurrent creation of the same directory is not an error.
    fs::create_dir_all(&item.output_dir)?;
    let output_path = item.output_dir.join(file_name);

    let mut builder = tempfile::Builder::new();
    builder.prefix(".cei2tei-").suffix(".tmp");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(fs::Permissions::from_mode(0o644));
    }
    let mut temp = builder.tempfile_in(&item.output_dir)?;
    temp.write_all(&output)?;
    temp.flush()?;
    temp.persist(&output_path).map_err(|e| ItemError::Io(e.error.to_string()))?;
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    const IDENTITY: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
        <xsl:template match="@*|node()"><xsl:copy><xsl:apply-templates select="@*|node()"/></xsl:copy></xsl:template>
    </xsl:stylesheet>"#;

    fn item(input_root: &Path, output_root: &Path, relative: &str) -> WorkItem {
        let relative_path = PathBuf::from(relative);
        WorkItem {
            index: 0,
            input_path: input_root.join(&relative_path),
            output_dir: output_root.join(relative_path.parent().unwrap_or(Path::new(""))),
            relative_path,
        }
    }

    #[test]
    fn test_success_writes_into_mirrored_directory() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::create_dir_all(input.path().join("a")).unwrap();
        fs::write(input.path().join("a/1.xml"), "<charter><p>text</p></charter>").unwrap();
        let stylesheet = Stylesheet::from_source(IDENTITY).unwrap();

        let work = item(input.path(), output.path(), "a/1.xml");
        match apply(&work, &stylesheet) {
            OutcomeRecord::Succeeded { output_path, .. } => {
                assert_eq!(output_path, output.path().join("a/1.xml"));
                let written = fs::read_to_string(output_path).unwrap();
                assert!(written.starts_with(r#"<?xml version="1.0" encoding="UTF-8"?>"#));
                assert!(written.contains("<p>text</p>"));
            }
            other => panic!("unexpected {:?}", other),
        }

        // A rerun overwrites with identical bytes and leaves no temp files.
        let first = fs::read(output.path().join("a/1.xml")).unwrap();
        assert!(apply(&work, &stylesheet).is_success());
        assert_eq!(fs::read(output.path().join("a/1.xml")).unwrap(), first);
        assert_eq!(fs::read_dir(output.path().join("a")).unwrap().count(), 1);
    }

    #[test]
    fn test_malformed_input_is_a_parse_failure() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(input.path().join("2.xml"), "<charter><p>unclosed</charter>").unwrap();
        let stylesheet = Stylesheet::from_source(IDENTITY).unwrap();

        match apply(&item(input.path(), output.path(), "2.xml"), &stylesheet) {
            OutcomeRecord::Failed { error: ItemError::Parse(message), .. } => {
                assert!(!message.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!output.path().join("2.xml").exists());
    }

    #[test]
    fn test_runtime_failure_is_a_transform_failure() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        fs::write(input.path().join("3.xml"), "<charter/>").unwrap();
        let stylesheet = Stylesheet::from_source(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
                 <xsl:template match="/"><xsl:message terminate="yes">no tenor</xsl:message></xsl:template>
               </xsl:stylesheet>"#,
        )
        .unwrap();

        match apply(&item(input.path(), output.path(), "3.xml"), &stylesheet) {
            OutcomeRecord::Failed { error: ItemError::Transform(message), .. } => {
                assert!(message.contains("no tenor"), "{}", message);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_input_is_an_io_failure() {
        let input = tempdir().unwrap();
        let output = tempdir().unwrap();
        let stylesheet = Stylesheet::from_source(IDENTITY).unwrap();
        let outcome = apply(&item(input.path(), output.path(), "gone.xml"), &stylesheet);
        assert!(matches!(outcome, OutcomeRecord::Failed { error: ItemError::Io(_), .. }));
    }
}
