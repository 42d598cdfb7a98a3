use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::convert::ContentConverter;
use crate::error::MigrateError;
use crate::replay::{HistoryReplayer, OutputLayout, ReplayReport};
use crate::revision::{AuthorFallback, Normalizer, RawRevisionRow, parse_rows};
use crate::runtime::ensure_output_absent;
use crate::sink::{GitSink, VcsSink};
use crate::source::{DataSource, FetchOptions, RevisionFetcher};

const PROGRESS_INTERVAL: usize = 500;

#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    pub fetch: FetchOptions,
    pub layout: OutputLayout,
    pub authors: AuthorFallback,
}

/// Report returned after a completed migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub fetched_rows: usize,
    #[serde(flatten)]
    pub replay: ReplayReport,
}

/// Fetch every revision row and parse the whole batch.
///
/// Nothing has been written anywhere when this fails.
pub fn load_revisions<D>(
    source: &mut D,
    options: &FetchOptions,
) -> Result<Vec<RawRevisionRow>, MigrateError>
where
    D: DataSource + ?Sized,
{
    let lines = RevisionFetcher::new(options.clone()).fetch(source)?;
    let rows = parse_rows(&lines)?;
    info!(revisions = rows.len(), "parsed revision rows");
    Ok(rows)
}

/// Convert and commit revisions one at a time, in order.
///
/// Stops at the first fatal error; every commit made before it stays in place.
pub fn replay_revisions<C, S>(
    rows: Vec<RawRevisionRow>,
    converter: &C,
    sink: &mut S,
    options: &MigrationOptions,
) -> Result<ReplayReport, MigrateError>
where
    C: ContentConverter + ?Sized,
    S: VcsSink + ?Sized,
{
    let total = rows.len();
    let normalizer = Normalizer::new(converter, options.authors.clone());
    let mut replayer = HistoryReplayer::new(sink, options.layout.clone());

    for (index, row) in rows.into_iter().enumerate() {
        let revision = normalizer.normalize(row);
        replayer.replay(index, &revision)?;
        let done = index + 1;
        if done % PROGRESS_INTERVAL == 0 {
            info!(done, total, "replay progress");
        }
    }

    let report = replayer.into_report();
    info!(
        commits = report.commits,
        conversion_failures = report.conversion_failures.len(),
        "replay finished"
    );
    Ok(report)
}

pub fn run_migration<D, C, S>(
    source: &mut D,
    converter: &C,
    sink: &mut S,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrateError>
where
    D: DataSource + ?Sized,
    C: ContentConverter + ?Sized,
    S: VcsSink + ?Sized,
{
    let rows = load_revisions(source, &options.fetch)?;
    let fetched_rows = rows.len();
    let replay = replay_revisions(rows, converter, sink, options)?;
    Ok(MigrationReport {
        fetched_rows,
        replay,
    })
}

/// Migrate into a new git repository at `output`, which must not exist yet.
///
/// The repository is only created once every row has been fetched and parsed.
pub fn migrate_into_git<D, C>(
    output: &Path,
    source: &mut D,
    converter: &C,
    options: &MigrationOptions,
) -> Result<MigrationReport, MigrateError>
where
    D: DataSource + ?Sized,
    C: ContentConverter + ?Sized,
{
    ensure_output_absent(output)?;
    let rows = load_revisions(source, &options.fetch)?;
    let fetched_rows = rows.len();

    let mut sink = GitSink::init(output).map_err(|source| MigrateError::OutputInit {
        path: output.to_path_buf(),
        source,
    })?;
    info!(output = %output.display(), "initialized git repository");

    let replay = replay_revisions(rows, converter, &mut sink, options)?;
    Ok(MigrationReport {
        fetched_rows,
        replay,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::path::Path;

    use git2::{Repository, Sort};
    use tempfile::tempdir;

    use super::*;
    use crate::convert::PassthroughConverter;
    use crate::error::{ConversionError, DataSourceError};
    use crate::replay::testing::RecordingSink;
    use crate::source::testing::FixtureWiki;
    use crate::source::{NS_MAIN, NS_USER, SqliteSource};

    struct ScriptedSource {
        responses: VecDeque<Result<Vec<String>, DataSourceError>>,
    }

    impl ScriptedSource {
        fn rows(rows: &[&str]) -> Self {
            Self {
                responses: VecDeque::from([Ok(rows.iter().map(|row| (*row).to_string()).collect())]),
            }
        }
    }

    impl DataSource for ScriptedSource {
        fn query(&mut self, _query: &str) -> Result<Vec<String>, DataSourceError> {
            self.responses
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    /// Wraps each line in emphasis, refusing pages named `Broken`.
    struct Emphasis;

    impl ContentConverter for Emphasis {
        fn convert(&self, page: &str, lines: &[String]) -> Result<Vec<String>, ConversionError> {
            if page == "Broken" {
                return Err(ConversionError {
                    page: page.to_string(),
                    diagnostic: "unbalanced markup".to_string(),
                });
            }
            Ok(lines.iter().map(|line| format!("*{line}*")).collect())
        }
    }

    fn history(repo_dir: &Path) -> Vec<(String, String, String, i64)> {
        let repo = Repository::open(repo_dir).expect("open repo");
        let mut walk = repo.revwalk().expect("revwalk");
        walk.push_head().expect("push head");
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)
            .expect("sorting");
        walk.map(|oid| {
            let commit = repo.find_commit(oid.expect("oid")).expect("commit");
            let author = commit.author();
            (
                commit.message().unwrap_or_default().to_string(),
                author.name().unwrap_or_default().to_string(),
                author.email().unwrap_or_default().to_string(),
                author.when().seconds(),
            )
        })
        .collect()
    }

    #[test]
    fn create_then_delete_yields_two_commits_and_no_file() {
        let mut source = ScriptedSource::rows(&[
            "20100101000000\t1\t0\t0\tHome\tAlice\talice@example.org\tHello",
            "20100102000000\t1\t1\t0\tHome\tAlice\talice@example.org\tHello",
        ]);
        let mut sink = RecordingSink::default();
        let report = run_migration(
            &mut source,
            &Emphasis,
            &mut sink,
            &MigrationOptions::default(),
        )
        .expect("migrate");

        assert_eq!(report.fetched_rows, 2);
        assert_eq!(report.replay.commits, 2);
        assert_eq!(sink.commits[0].message, "Create Home");
        assert_eq!(
            sink.commits[0].files.get("Home.md").map(String::as_str),
            Some("---\nlayout: default\ntitle: Home\n---\n\n*Hello*\n")
        );
        assert_eq!(sink.commits[1].message, "Delete Home");
        assert!(sink.commits[1].files.is_empty());
        assert!(!sink.worktree.contains_key("Home.md"));
    }

    #[test]
    fn conversion_failure_does_not_block_later_revisions() {
        let mut source = ScriptedSource::rows(&[
            "20100101000000\t1\t0\t0\tBroken\tAlice\ta@x\t'''bold",
            "20100102000000\t1\t0\t0\tBroken\tAlice\ta@x\tstill '''bold",
            "20100103000000\t2\t0\t0\tFine\tBob\tb@x\tok",
        ]);
        let mut sink = RecordingSink::default();
        let report = run_migration(
            &mut source,
            &Emphasis,
            &mut sink,
            &MigrationOptions::default(),
        )
        .expect("migrate");

        assert_eq!(report.replay.commits, 3);
        assert_eq!(
            report.replay.conversion_failures,
            vec!["Broken".to_string(), "Broken".to_string()]
        );
        assert!(sink.commits[0].files["Broken.md"].ends_with("\n'''bold\n"));
        assert!(sink.commits[2].files["Fine.md"].ends_with("\n*ok*\n"));
    }

    #[test]
    fn report_serializes_as_flat_json() {
        let mut source = ScriptedSource::rows(&[
            "20100101000000\t1\t0\t0\tHome\tAlice\ta@x\tHello",
        ]);
        let mut sink = RecordingSink::default();
        let report = run_migration(
            &mut source,
            &PassthroughConverter,
            &mut sink,
            &MigrationOptions::default(),
        )
        .expect("migrate");

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["fetched_rows"], 1);
        assert_eq!(json["commits"], 1);
        assert_eq!(json["created"], 1);
        assert_eq!(json["last_commit"], "commit-1");
        assert_eq!(json["conversion_failures"], serde_json::json!([]));
    }

    #[test]
    fn malformed_row_aborts_before_any_commit() {
        let mut source = ScriptedSource::rows(&[
            "20100101000000\t1\t0\t0\tHome\tAlice\ta@x\tHello",
            "20100102000000\tnot-a-row",
        ]);
        let mut sink = RecordingSink::default();
        let error = run_migration(
            &mut source,
            &Emphasis,
            &mut sink,
            &MigrationOptions::default(),
        )
        .expect_err("must fail");

        assert!(matches!(error, MigrateError::MalformedRow(_)));
        assert!(sink.commits.is_empty());
    }

    #[test]
    fn data_source_failure_leaves_no_output_directory() {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("pages");
        let mut source = ScriptedSource {
            responses: VecDeque::from([Err(DataSourceError::new(1, "ERROR 2002: can't connect"))]),
        };
        let error = migrate_into_git(
            &output,
            &mut source,
            &PassthroughConverter,
            &MigrationOptions::default(),
        )
        .expect_err("must fail");

        assert!(matches!(error, MigrateError::DataSource(_)));
        assert!(error.to_string().contains("can't connect"));
        assert!(!output.exists());
    }

    #[test]
    fn existing_output_directory_is_rejected_up_front() {
        let temp = tempdir().expect("tempdir");
        let output = temp.path().join("pages");
        fs::create_dir_all(&output).expect("create output");
        let mut source = ScriptedSource::rows(&["20100101000000\t1\t0\t0\tHome\tAlice\ta@x\tHello"]);
        let error = migrate_into_git(
            &output,
            &mut source,
            &PassthroughConverter,
            &MigrationOptions::default(),
        )
        .expect_err("must fail");

        assert!(matches!(error, MigrateError::OutputPathExists(_)));
        assert_eq!(source.responses.len(), 1, "data source must not be queried");
    }

    #[test]
    fn sqlite_wiki_migrates_into_git_history() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wiki.sqlite");
        let mut wiki = FixtureWiki::create(&db_path);
        wiki.user(1, "MediaWiki default", "wiki@example.org");
        wiki.user(5, "Alice", "alice@example.org");
        wiki.page(10, NS_MAIN, "Home");
        wiki.page(11, NS_USER, "Alice");
        wiki.page(12, NS_MAIN, "Old_Page");
        wiki.revision(10, "20100101000000", 5, 0, "Hello");
        wiki.revision(12, "20100101000000", 0, 1, "");
        wiki.revision(11, "20100102000000", 5, 0, "About me\nSecond line");
        wiki.revision(10, "20100103000000", 0, 0, "Hello again");
        wiki.revision(10, "20100104000000", 5, 1, "Hello again");

        let output = temp.path().join("pages");
        let mut source = SqliteSource::new(&db_path);
        let report = migrate_into_git(
            &output,
            &mut source,
            &PassthroughConverter,
            &MigrationOptions::default(),
        )
        .expect("migrate");

        assert_eq!(report.fetched_rows, 5);
        assert_eq!(report.replay.commits, 5);
        assert_eq!(report.replay.noop_removals, 1);
        assert_eq!(report.replay.deleted, 1);

        let commits = history(&output);
        let summary = commits
            .iter()
            .map(|(message, name, email, seconds)| {
                (message.as_str(), name.as_str(), email.as_str(), *seconds)
            })
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                ("Create Home", "Alice", "alice@example.org", 1_262_304_000),
                ("Delete Old_Page", "MediaWiki default", "wiki@example.org", 1_262_304_000),
                ("Create User:Alice", "Alice", "alice@example.org", 1_262_390_400),
                ("Update Home", "MediaWiki default", "wiki@example.org", 1_262_476_800),
                ("Delete Home", "Alice", "alice@example.org", 1_262_563_200),
            ]
        );

        assert!(!output.join("Home.md").exists());
        assert_eq!(
            fs::read_to_string(output.join("User").join("Alice.md")).expect("user page"),
            "---\nlayout: default\ntitle: Alice\n---\n\nAbout me\nSecond line\n"
        );
    }
}
