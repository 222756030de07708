//! Run outputs as `key=value` lines, on stdout and in `$GITHUB_OUTPUT`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

/// One `key=value` line per output, in key order.
pub fn format_outputs(outputs: &BTreeMap<&'static str, String>) -> String {
    outputs
        .iter()
        .map(|(key, value)| format!("{key}={value}\n"))
        .collect()
}

/// Append outputs to the step-output file a workflow runner reads back.
pub fn append_outputs(path: &Path, outputs: &BTreeMap<&'static str, String>) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open output file {}", path.display()))?;
    file.write_all(format_outputs(outputs).as_bytes())
        .with_context(|| format!("Failed to write output file {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("artifact-name-binary", "aleph-node-production".to_string()),
            ("aleph-runtime-artifact-name", "aleph-production-runtime".to_string()),
        ])
    }

    #[test]
    fn test_format_sorted_lines() {
        assert_eq!(
            format_outputs(&outputs()),
            "aleph-runtime-artifact-name=aleph-production-runtime\n\
             artifact-name-binary=aleph-node-production\n"
        );
    }

    #[test]
    fn test_append_keeps_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("github_output");
        std::fs::write(&path, "earlier=step\n").unwrap();

        append_outputs(&path, &outputs()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("earlier=step\n"));
        assert!(contents.contains("artifact-name-binary=aleph-node-production\n"));
    }
}
