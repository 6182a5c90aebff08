//! The map of attacker-controllable context properties.
//!
//! Paths are stored as a trie of labels. Besides literal property names,
//! two wildcard labels exist: `*` matches any array element (or a
//! non-literal index), and `**` matches any object property.

use indexmap::IndexMap;

/// Matches any array element.
pub(crate) const ANY_ELEMENT: &str = "*";
/// Matches any object property.
pub(crate) const ANY_PROPERTY: &str = "**";

const BUILTIN: &[&str] = &[
    "github.event.issue.title",
    "github.event.issue.body",
    "github.event.pull_request.title",
    "github.event.pull_request.body",
    "github.event.pull_request.head.ref",
    "github.event.pull_request.head.label",
    "github.event.pull_request.head.repo.default_branch",
    "github.event.comment.body",
    "github.event.review.body",
    "github.event.review_comment.body",
    "github.event.pages.*.page_name",
    "github.event.commits.*.message",
    "github.event.commits.*.author.email",
    "github.event.commits.*.author.name",
    "github.event.head_commit.message",
    "github.event.head_commit.author.email",
    "github.event.head_commit.author.name",
    "github.event.workflow_run.head_branch",
    "github.event.workflow_run.head_commit.message",
    "github.event.workflow_run.head_commit.author.email",
    "github.event.workflow_run.head_commit.author.name",
    "github.event.workflow_run.pull_requests.*.head.ref",
    "github.event.discussion.title",
    "github.event.discussion.body",
    "github.head_ref",
    "needs.**.outputs.**",
    "steps.**.outputs.**",
];

/// A node in the untrusted-input trie.
#[derive(Debug, Default)]
pub(crate) struct TrieNode {
    children: IndexMap<String, TrieNode>,
}

impl TrieNode {
    /// A node with no children terminates a declared path.
    pub(crate) fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Looks up a literal child. Context properties are case-insensitive.
    pub(crate) fn child(&self, label: &str) -> Option<&TrieNode> {
        self.children
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(label))
            .map(|(_, node)| node)
    }

    /// Returns the non-wildcard children, in insertion order.
    pub(crate) fn named_children(&self) -> impl Iterator<Item = (&str, &TrieNode)> {
        self.children
            .iter()
            .filter(|(name, _)| *name != ANY_ELEMENT && *name != ANY_PROPERTY)
            .map(|(name, node)| (name.as_str(), node))
    }

    fn insert(&mut self, labels: &[&str]) {
        if let Some((head, rest)) = labels.split_first() {
            self.children
                .entry(head.to_ascii_lowercase())
                .or_default()
                .insert(rest);
        }
    }
}

/// The trie of untrusted context paths, rooted at context names such as
/// `github`.
#[derive(Debug)]
pub(crate) struct UntrustedInputMap {
    root: TrieNode,
}

impl UntrustedInputMap {
    pub(crate) fn builder() -> UntrustedInputMapBuilder {
        UntrustedInputMapBuilder {
            root: TrieNode::default(),
        }
    }

    /// The map of known attacker-controlled properties.
    pub(crate) fn builtin() -> Self {
        BUILTIN
            .iter()
            .fold(Self::builder(), |builder, path| builder.path(path))
            .build()
    }

    /// Returns the trie node for a context root, e.g. `github`.
    pub(crate) fn root(&self, context: &str) -> Option<&TrieNode> {
        self.root.child(context)
    }
}

pub(crate) struct UntrustedInputMapBuilder {
    root: TrieNode,
}

impl UntrustedInputMapBuilder {
    /// Adds a dotted path, e.g. `github.event.commits.*.message`.
    pub(crate) fn path(mut self, path: &str) -> Self {
        let labels = path.split('.').collect::<Vec<_>>();
        self.root.insert(&labels);
        self
    }

    pub(crate) fn build(self) -> UntrustedInputMap {
        UntrustedInputMap { root: self.root }
    }
}
