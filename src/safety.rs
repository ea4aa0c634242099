//! Safety checks before outputs are written.
//!
//! Output files are created or replaced unconditionally, so a mistyped path
//! could clobber the curated metadata table or an OCR text file. Every output
//! path is checked against those inputs first.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Absolute, symlink-resolved form of a path. For a file that does not exist
/// yet, its parent directory is resolved instead.
fn resolved(path: &Path) -> PathBuf {
    if let Ok(p) = path.canonicalize() {
        return p;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() { Path::new(".") } else { parent };
            parent
                .canonicalize()
                .map(|p| p.join(name))
                .unwrap_or_else(|_| path.to_path_buf())
        }
        _ => path.to_path_buf(),
    }
}

/// Validates that an output path is safe to overwrite.
///
/// Fails when the output is one of `protected` (metadata table, book texts),
/// or when it carries the book text extension inside the input directory.
pub fn validate_output_path(
    output: &Path,
    protected: &[&Path],
    input_dir: &Path,
    text_extension: &str,
) -> Result<()> {
    let output_resolved = resolved(output);

    for source in protected {
        if output_resolved == resolved(source) {
            bail!(
                "Safety check failed: output '{}' cannot be the same as input '{}'",
                output.display(),
                source.display()
            );
        }
    }

    let in_input_dir = output_resolved.parent() == Some(resolved(input_dir).as_path());
    let has_text_extension = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(text_extension));
    if in_input_dir && has_text_extension {
        bail!(
            "Safety check failed: output '{}' looks like a book text file in the input directory",
            output.display()
        );
    }

    Ok(())
}

/// Check every output of a run; stops at the first unsafe one.
pub fn validate_outputs(
    outputs: &[&Path],
    protected: &[&Path],
    input_dir: &Path,
    text_extension: &str,
) -> Result<()> {
    for output in outputs {
        validate_output_path(output, protected, input_dir, text_extension)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("texts");
        std::fs::create_dir(&input).unwrap();
        let metadata = dir.path().join("songs.csv");
        std::fs::write(&metadata, "x").unwrap();

        let output = dir.path().join("out").join("songs_with_lyrics.csv");
        assert!(validate_output_path(&output, &[&metadata], &input, "txt").is_ok());
    }

    #[test]
    fn test_output_equals_metadata_table() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("songs_with_lyrics.csv");
        std::fs::write(&metadata, "x").unwrap();

        let result = validate_output_path(&metadata, &[&metadata], dir.path(), "txt");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("cannot be the same as input"));
    }

    #[test]
    fn test_output_equal_via_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let metadata = dir.path().join("songs.csv");
        std::fs::write(&metadata, "x").unwrap();

        let output = dir.path().join("sub").join("..").join("songs.csv");
        assert!(validate_output_path(&output, &[&metadata], &dir.path().join("sub"), "txt").is_err());
    }

    #[test]
    fn test_text_file_in_input_dir_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("Weihnachtslieder.TXT");
        let result = validate_output_path(&output, &[], dir.path(), "txt");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_outputs_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("meta.csv");
        std::fs::write(&metadata, "x").unwrap();
        let good = dir.path().join("out.json");
        assert!(validate_outputs(&[&good, &metadata], &[&metadata], dir.path(), "txt").is_err());
        assert!(validate_outputs(&[&good], &[&metadata], dir.path(), "txt").is_ok());
    }
}
