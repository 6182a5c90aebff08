//! Input discovery.

use anyhow::{Result, anyhow};
use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use tracing::instrument;

/// Expands the command line inputs into the workflow files to scan.
///
/// Files are taken as-is. Directories are walked for workflows under
/// `.github/workflows`, honoring `.gitignore` files but not skipping
/// hidden entries.
pub(crate) fn collect_inputs(inputs: &[Utf8PathBuf]) -> Result<Vec<Utf8PathBuf>> {
    let cwd = [Utf8PathBuf::from(".")];
    let inputs = if inputs.is_empty() { &cwd[..] } else { inputs };

    let mut paths = vec![];
    for input in inputs {
        if input.is_file() {
            paths.push(input.clone());
        } else if input.is_dir() {
            collect_from_dir(input, &mut paths)?;
        } else {
            return Err(anyhow!("invalid input: {input}"));
        }
    }

    Ok(paths)
}

#[instrument(skip(paths))]
fn collect_from_dir(input_path: &Utf8Path, paths: &mut Vec<Utf8PathBuf>) -> Result<()> {
    let mut walker = WalkBuilder::new(input_path);
    walker
        .standard_filters(false)
        .require_git(false)
        .git_ignore(true)
        .git_global(true)
        .git_exclude(true)
        .filter_entry(|entry| entry.file_name() != ".git")
        .sort_by_file_name(|a, b| a.cmp(b));

    let before = paths.len();
    for entry in walker.build() {
        let entry = entry?;
        let entry = <&Utf8Path>::try_from(entry.path())?;

        if entry.is_file()
            && matches!(entry.extension(), Some("yml" | "yaml"))
            && entry
                .parent()
                .is_some_and(|dir| dir.ends_with(".github/workflows"))
        {
            paths.push(entry.to_path_buf());
        }
    }

    tracing::debug!(
        "collected {n} workflows from {input_path}",
        n = paths.len() - before
    );
    Ok(())
}
