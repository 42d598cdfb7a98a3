use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{InvalidTimestampError, MigrateError, SinkError};
use crate::revision::Revision;
use crate::sink::VcsSink;
use crate::source::{NS_MAIN, NS_USER};
use crate::timestamp::{iso8601_to_unix, to_iso8601};

pub const DEFAULT_EXTENSION: &str = "md";
pub const DEFAULT_FRONT_MATTER_LAYOUT: &str = "default";
pub const DEFAULT_USER_FOLDER: &str = "User";

/// Where pages land in the output tree and how their front matter looks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub extension: String,
    pub front_matter_layout: String,
    /// Folder holding user-namespace pages, so `User:Home` cannot collide with `Home`.
    pub user_folder: String,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            extension: DEFAULT_EXTENSION.to_string(),
            front_matter_layout: DEFAULT_FRONT_MATTER_LAYOUT.to_string(),
            user_folder: DEFAULT_USER_FOLDER.to_string(),
        }
    }
}

impl OutputLayout {
    /// Every namespace other than the main one gets its own folder, so equal
    /// titles in different namespaces never share a file.
    pub fn page_path(&self, namespace: i32, page_name: &str) -> String {
        let file = format!("{}.{}", file_stem(page_name), self.extension);
        match self.namespace_folder(namespace) {
            Some(folder) => format!("{folder}/{file}"),
            None => file,
        }
    }

    fn namespace_folder(&self, namespace: i32) -> Option<String> {
        match namespace {
            NS_MAIN => None,
            NS_USER if !self.user_folder.is_empty() => Some(self.user_folder.clone()),
            NS_USER => Some(DEFAULT_USER_FOLDER.to_string()),
            other => Some(namespace_label(other)),
        }
    }
}

/// `Namespace4` for namespace 4; used for folders and commit messages.
pub fn namespace_label(namespace: i32) -> String {
    format!("Namespace{namespace}")
}

pub fn file_stem(page_name: &str) -> String {
    page_name.trim().replace(' ', "_")
}

pub fn display_title(page_name: &str) -> String {
    page_name.trim().replace('_', " ")
}

#[derive(Serialize)]
struct FrontMatter<'a> {
    layout: &'a str,
    title: &'a str,
}

/// Front matter block, a blank line, then the body with one `\n` per line.
pub fn render_document(layout: &str, title: &str, body: &[String]) -> String {
    let front_matter = serde_yaml::to_string(&FrontMatter { layout, title })
        .unwrap_or_else(|_| format!("layout: {layout}\ntitle: {title}\n"));
    let body_len = body.iter().map(|line| line.len() + 1).sum::<usize>();
    let mut out = String::with_capacity(front_matter.len() + body_len + 9);
    out.push_str("---\n");
    out.push_str(&front_matter);
    out.push_str("---\n\n");
    for line in body {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitAction {
    Write { path: String, content: String },
    Remove { path: String },
}

impl CommitAction {
    pub fn path(&self) -> &str {
        match self {
            Self::Write { path, .. } | Self::Remove { path } => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMeta {
    pub author_name: String,
    pub author_email: String,
    /// `YYYY-MM-DDTHH:MM:SS`, UTC.
    pub timestamp: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommit {
    pub action: CommitAction,
    pub meta: CommitMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Present,
    Deleted,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub commits: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub noop_removals: usize,
    /// Pages whose text was committed unconverted, one entry per revision.
    pub conversion_failures: Vec<String>,
    pub last_commit: Option<String>,
}

/// Replays revisions into a sink, one commit per revision, in the order given.
pub struct HistoryReplayer<'s, S: VcsSink + ?Sized> {
    sink: &'s mut S,
    layout: OutputLayout,
    pages: HashMap<i64, PageState>,
    report: ReplayReport,
}

impl<'s, S: VcsSink + ?Sized> HistoryReplayer<'s, S> {
    pub fn new(sink: &'s mut S, layout: OutputLayout) -> Self {
        Self {
            sink,
            layout,
            pages: HashMap::new(),
            report: ReplayReport::default(),
        }
    }

    pub fn page_state(&self, page_id: i64) -> Option<PageState> {
        self.pages.get(&page_id).copied()
    }

    pub fn report(&self) -> &ReplayReport {
        &self.report
    }

    pub fn into_report(self) -> ReplayReport {
        self.report
    }

    /// Derive the file action and commit metadata for `revision` without touching the sink.
    pub fn plan(&self, revision: &Revision) -> Result<PlannedCommit, InvalidTimestampError> {
        let timestamp = to_iso8601(&revision.timestamp)?;
        if iso8601_to_unix(&timestamp).is_none() {
            return Err(InvalidTimestampError(revision.timestamp.clone()));
        }
        let path = self.layout.page_path(revision.namespace, &revision.page_name);
        let state = self.page_state(revision.page_id);

        let (action, verb) = if revision.deleted {
            (CommitAction::Remove { path }, "Delete")
        } else {
            let content = render_document(
                &self.layout.front_matter_layout,
                &display_title(&revision.page_name),
                &revision.converted_text,
            );
            let verb = if state == Some(PageState::Present) {
                "Update"
            } else {
                "Create"
            };
            (CommitAction::Write { path, content }, verb)
        };

        Ok(PlannedCommit {
            action,
            meta: CommitMeta {
                author_name: revision.author_name.clone(),
                author_email: revision.author_email.clone(),
                timestamp,
                message: format!("{verb} {}", qualified_name(revision)),
            },
        })
    }

    /// Apply one revision and commit it. `index` is the revision's position in
    /// the run, used in error reports.
    pub fn replay(&mut self, index: usize, revision: &Revision) -> Result<String, MigrateError> {
        let planned = self
            .plan(revision)
            .map_err(|source| MigrateError::InvalidTimestamp {
                index,
                page: revision.page_name.clone(),
                source,
            })?;
        let sink_error = |source: SinkError| MigrateError::Sink {
            index,
            page: revision.page_name.clone(),
            source,
        };

        let meta = &planned.meta;
        self.sink
            .check_commit(&meta.author_name, &meta.author_email, &meta.timestamp)
            .map_err(sink_error)?;

        let removed = match &planned.action {
            CommitAction::Write { path, content } => {
                self.sink.write(path, content).map_err(sink_error)?;
                self.sink.stage(path).map_err(sink_error)?;
                None
            }
            CommitAction::Remove { path } => {
                Some(self.sink.remove(path).map_err(sink_error)?)
            }
        };

        let commit = self
            .sink
            .commit(
                &meta.author_name,
                &meta.author_email,
                &meta.timestamp,
                &meta.message,
            )
            .map_err(sink_error)?;
        debug!(commit = %commit, path = planned.action.path(), message = %meta.message, "replayed revision");

        let previous = self.pages.get(&revision.page_id).copied();
        match removed {
            None => {
                if previous == Some(PageState::Present) {
                    self.report.updated += 1;
                } else {
                    self.report.created += 1;
                }
                self.pages.insert(revision.page_id, PageState::Present);
            }
            Some(true) => {
                self.report.deleted += 1;
                self.pages.insert(revision.page_id, PageState::Deleted);
            }
            Some(false) => {
                warn!(
                    page = %revision.page_name,
                    path = planned.action.path(),
                    "deletion of a page that is not in the tree; committing without changes"
                );
                self.report.noop_removals += 1;
                self.pages.insert(revision.page_id, PageState::Deleted);
            }
        }
        if revision.conversion_failure.is_some() {
            self.report
                .conversion_failures
                .push(revision.page_name.clone());
        }
        self.report.commits += 1;
        self.report.last_commit = Some(commit.clone());
        Ok(commit)
    }
}

fn qualified_name(revision: &Revision) -> String {
    match revision.namespace {
        NS_MAIN => revision.page_name.clone(),
        NS_USER => format!("User:{}", revision.page_name),
        other => format!("{}:{}", namespace_label(other), revision.page_name),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{BTreeMap, BTreeSet};

    use crate::error::SinkError;
    use crate::sink::VcsSink;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedCommit {
        pub author_name: String,
        pub author_email: String,
        pub timestamp: String,
        pub message: String,
        pub files: BTreeMap<String, String>,
    }

    /// In-memory sink that snapshots the tracked files at every commit.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub worktree: BTreeMap<String, String>,
        pub staged: BTreeMap<String, String>,
        pub tracked: BTreeSet<String>,
        pub commits: Vec<RecordedCommit>,
        /// Reject the commit with this message.
        pub fail_on_message: Option<String>,
    }

    impl VcsSink for RecordingSink {
        fn write(&mut self, path: &str, content: &str) -> Result<(), SinkError> {
            self.worktree.insert(path.to_string(), content.to_string());
            Ok(())
        }

        fn remove(&mut self, path: &str) -> Result<bool, SinkError> {
            if !self.tracked.remove(path) {
                return Ok(false);
            }
            self.worktree.remove(path);
            self.staged.remove(path);
            Ok(true)
        }

        fn stage(&mut self, path: &str) -> Result<(), SinkError> {
            let content = self
                .worktree
                .get(path)
                .cloned()
                .ok_or_else(|| SinkError::PathOutsideTree(path.to_string()))?;
            self.staged.insert(path.to_string(), content);
            self.tracked.insert(path.to_string());
            Ok(())
        }

        fn commit(
            &mut self,
            author_name: &str,
            author_email: &str,
            timestamp: &str,
            message: &str,
        ) -> Result<String, SinkError> {
            if self.fail_on_message.as_deref() == Some(message) {
                return Err(SinkError::InvalidDate(timestamp.to_string()));
            }
            self.commits.push(RecordedCommit {
                author_name: author_name.to_string(),
                author_email: author_email.to_string(),
                timestamp: timestamp.to_string(),
                message: message.to_string(),
                files: self.staged.clone(),
            });
            Ok(format!("commit-{}", self.commits.len()))
        }
    }
}
