//! Utility functions for the tensorfuzz CLI

use anyhow::{Context, Result, bail};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

/// Create a standard progress bar style
pub fn create_progress_style() -> Result<ProgressStyle> {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
        .map_err(|e| anyhow::anyhow!("Failed to create progress style: {}", e))
        .map(|s| s.progress_chars("#>-"))
}

/// Create a new progress bar with standard styling
pub fn create_progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(create_progress_style()?);
    Ok(pb)
}

/// Expand files and directories into a sorted list of input files.
///
/// Directories are read one level deep and hidden entries are skipped.
pub fn collect_inputs(paths: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for raw in paths {
        let path = Path::new(raw);
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in fs::read_dir(path).with_context(|| format!("Failed to read directory '{}'", raw))? {
                let entry = entry?;
                let entry_path = entry.path();
                let hidden = entry.file_name().to_string_lossy().starts_with('.');
                if entry_path.is_file() && !hidden {
                    entries.push(entry_path);
                }
            }
            entries.sort();
            files.extend(entries);
        } else if path.is_file() {
            files.push(path.to_path_buf());
        } else {
            bail!("Input '{}' does not exist", raw);
        }
    }
    Ok(files)
}

/// Render a shape the way the tables print it
pub fn format_shape(shape: &[i64]) -> String {
    if shape.is_empty() {
        "(scalar)".to_string()
    } else {
        format!(
            "[{}]",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_shape() {
        assert_eq!(format_shape(&[]), "(scalar)");
        assert_eq!(format_shape(&[2, 0, 3]), "[2, 0, 3]");
    }

    #[test]
    fn test_collect_inputs_expands_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.bin"), [1u8]).unwrap();
        fs::write(dir.path().join("a.bin"), [2u8]).unwrap();
        fs::write(dir.path().join(".hidden"), [3u8]).unwrap();
        let single = dir.path().join("a.bin").display().to_string();

        let files = collect_inputs(&[dir.path().display().to_string(), single]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.bin", "b.bin", "a.bin"]);
    }

    #[test]
    fn test_collect_inputs_missing_path() {
        assert!(collect_inputs(&["/definitely/not/here".to_string()]).is_err());
    }
}
