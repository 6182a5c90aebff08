//! Per-project knowledge shared by every workflow of a project.
//!
//! A project is the directory tree a workflow's `./path` actions are
//! resolved against: the enclosing Git checkout, or failing that the
//! directory holding `.github/`.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use ignore::WalkBuilder;
use serde::Deserialize;

/// The parts of an `action.yml` we care about.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub(crate) struct LocalAction {
    pub(crate) name: Option<String>,
    #[serde(default)]
    runs: Option<Runs>,
    /// Flattened from `runs.using`.
    #[serde(skip)]
    pub(crate) using: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
struct Runs {
    using: Option<String>,
}

impl LocalAction {
    fn from_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        let mut action: Self = serde_yaml::from_str(contents)?;
        action.using = action.runs.take().and_then(|runs| runs.using);
        Ok(action)
    }
}

/// The local actions of a single project, keyed by their directory
/// relative to the project root.
#[derive(Debug, Default)]
pub(crate) struct ProjectCache {
    root: Utf8PathBuf,
    actions: HashMap<String, LocalAction>,
}

impl ProjectCache {
    /// Indexes every `action.yml` or `action.yaml` under `root`.
    ///
    /// Unreadable or malformed action definitions are skipped.
    pub(crate) fn index(root: &Utf8Path) -> Self {
        let mut walker = WalkBuilder::new(root);
        walker
            .standard_filters(false)
            .require_git(false)
            .git_ignore(true)
            .git_exclude(true)
            .filter_entry(|entry| entry.file_name() != ".git");

        let mut actions = HashMap::new();
        for entry in walker.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!("skipping unwalkable entry under {root}: {e}");
                    continue;
                }
            };

            let Ok(path) = <&Utf8Path>::try_from(entry.path()) else {
                continue;
            };

            if !path.is_file() || !matches!(path.file_name(), Some("action.yml" | "action.yaml")) {
                continue;
            }

            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::warn!("couldn't read local action {path}: {e}");
                    continue;
                }
            };

            let action = match LocalAction::from_str(&contents) {
                Ok(action) => action,
                Err(e) => {
                    tracing::warn!("couldn't parse local action {path}: {e}");
                    continue;
                }
            };

            let key = path
                .parent()
                .and_then(|dir| dir.strip_prefix(root).ok())
                .map(|dir| dir.as_str().to_string())
                .unwrap_or_default();

            // `action.yml` wins over `action.yaml`, like on GitHub.
            if path.file_name() == Some("action.yml") || !actions.contains_key(&key) {
                actions.insert(key, action);
            }
        }

        tracing::debug!("indexed {n} local actions under {root}", n = actions.len());

        Self {
            root: root.to_path_buf(),
            actions,
        }
    }

    pub(crate) fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolves a `./path` action reference.
    pub(crate) fn lookup(&self, spec: &str) -> Option<&LocalAction> {
        let key = spec.strip_prefix("./")?.trim_end_matches('/');
        self.actions.get(key)
    }
}

/// Finds the root of the project `file` belongs to.
///
/// This is the nearest ancestor holding `.git` (a directory, or a file for
/// worktrees and downloaded mirrors), or else the directory above the
/// nearest `.github`, or else `file`'s own directory.
pub(crate) fn project_root(file: &Utf8Path) -> Utf8PathBuf {
    let dir = non_empty(file.parent().unwrap_or(Utf8Path::new(".")));

    // A relative path's last ancestor is "", which is the current directory.
    if let Some(repo) = dir
        .ancestors()
        .map(non_empty)
        .find(|a| a.join(".git").exists())
    {
        return repo.to_path_buf();
    }

    dir.ancestors()
        .find(|a| a.file_name() == Some(".github"))
        .and_then(Utf8Path::parent)
        .map(non_empty)
        .unwrap_or(dir)
        .to_path_buf()
}

fn non_empty(path: &Utf8Path) -> &Utf8Path {
    if path.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use camino::{Utf8Path, Utf8PathBuf};
    use pretty_assertions::assert_eq;

    use super::{LocalAction, ProjectCache, project_root};

    fn tempdir() -> (tempfile::TempDir, Utf8PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, path)
    }

    #[test]
    fn test_parse_action() {
        let action =
            LocalAction::from_str("name: Build\nruns:\n  using: node20\n  main: index.js\n")
                .unwrap();
        assert_eq!(action.name.as_deref(), Some("Build"));
        assert_eq!(action.using.as_deref(), Some("node20"));

        let action = LocalAction::from_str("description: nothing else\n").unwrap();
        assert_eq!(action, LocalAction::default());
    }

    #[test]
    fn test_index_and_lookup() {
        let (_guard, root) = tempdir();
        fs::create_dir_all(root.join(".github/actions/setup")).unwrap();
        fs::write(
            root.join(".github/actions/setup/action.yml"),
            "name: Setup\nruns:\n  using: composite\n",
        )
        .unwrap();
        fs::create_dir_all(root.join("tools/lint")).unwrap();
        fs::write(
            root.join("tools/lint/action.yaml"),
            "name: Lint\nruns:\n  using: docker\n",
        )
        .unwrap();
        fs::create_dir_all(root.join("broken")).unwrap();
        fs::write(root.join("broken/action.yml"), "name: [unclosed\n").unwrap();

        let cache = ProjectCache::index(&root);
        assert_eq!(cache.root(), root);

        let setup = cache.lookup("./.github/actions/setup").unwrap();
        assert_eq!(setup.name.as_deref(), Some("Setup"));
        assert_eq!(setup.using.as_deref(), Some("composite"));

        assert_eq!(
            cache.lookup("./tools/lint/").unwrap().using.as_deref(),
            Some("docker")
        );
        assert!(cache.lookup("./broken").is_none());
        assert!(cache.lookup("./missing").is_none());
        assert!(cache.lookup("tools/lint").is_none());
    }

    #[test]
    fn test_project_root() {
        let (_guard, root) = tempdir();
        let repo = root.join("repo");
        fs::create_dir_all(repo.join(".github/workflows")).unwrap();
        fs::write(repo.join(".git"), "").unwrap();
        assert_eq!(
            project_root(&repo.join(".github/workflows/ci.yml")),
            repo
        );

        let plain = root.join("plain");
        fs::create_dir_all(plain.join(".github/workflows")).unwrap();
        assert_eq!(
            project_root(&plain.join(".github/workflows/ci.yml")),
            plain
        );

        let loose = root.join("loose");
        fs::create_dir_all(&loose).unwrap();
        assert_eq!(project_root(&loose.join("ci.yml")), loose);

        assert_eq!(project_root(Utf8Path::new("ci.yml")), Utf8Path::new("."));
    }

    #[test]
    fn test_relative_project_root_is_never_empty() {
        // Relative to the crate root under `cargo test`, whichever ancestor
        // ends up holding `.git`.
        for file in ["ci.yml", "src/project.rs", ".github/workflows/ci.yml"] {
            let root = project_root(Utf8Path::new(file));
            assert!(!root.as_str().is_empty(), "{file} -> {root}");
            assert!(root.is_dir(), "{file} -> {root}");
        }
    }
}
