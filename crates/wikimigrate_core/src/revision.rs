use tracing::warn;

use crate::convert::ContentConverter;
use crate::error::MalformedRowError;
use crate::source::NULL_FIELD;

/// Columns produced by the revision query.
pub const ROW_FIELDS: usize = 8;

pub const DEFAULT_FALLBACK_AUTHOR: &str = "MediaWiki default";
pub const DEFAULT_EMAIL_DOMAIN: &str = "localhost";

/// One fetched row, split but not yet converted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRevisionRow {
    pub timestamp: String,
    pub page_id: i64,
    pub deletion_marker: i64,
    pub namespace: i32,
    pub page_title: String,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    /// Still batch-escaped.
    pub content: String,
}

impl RawRevisionRow {
    pub fn parse(row: usize, line: &str) -> Result<Self, MalformedRowError> {
        let fields = line.splitn(ROW_FIELDS, '\t').collect::<Vec<_>>();
        if fields.len() != ROW_FIELDS {
            return Err(MalformedRowError {
                row,
                reason: format!("expected {ROW_FIELDS} fields, found {}", fields.len()),
            });
        }

        Ok(Self {
            timestamp: fields[0].trim().to_string(),
            page_id: parse_number(row, "page id", fields[1])?,
            deletion_marker: parse_number(row, "deletion marker", fields[2])?,
            namespace: parse_number(row, "namespace", fields[3])?,
            page_title: unescape_field(fields[4]),
            author_name: nullable_field(fields[5]),
            author_email: nullable_field(fields[6]),
            content: fields[7].to_string(),
        })
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_marker != 0
    }
}

/// Parse every fetched row, then order them by timestamp.
///
/// One bad row rejects the whole batch. The sort is stable, so revisions
/// sharing a timestamp keep the order the data source returned them in.
pub fn parse_rows<S: AsRef<str>>(lines: &[S]) -> Result<Vec<RawRevisionRow>, MalformedRowError> {
    let mut rows = lines
        .iter()
        .enumerate()
        .map(|(index, line)| RawRevisionRow::parse(index, line.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|left, right| left.timestamp.cmp(&right.timestamp));
    Ok(rows)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// `yyyymmddhhmmss`, UTC.
    pub timestamp: String,
    pub page_id: i64,
    pub namespace: i32,
    pub page_name: String,
    pub deleted: bool,
    pub author_name: String,
    pub author_email: String,
    pub source_text: Vec<String>,
    /// Empty for deletions. Equal to `source_text` when conversion failed.
    pub converted_text: Vec<String>,
    pub conversion_failure: Option<String>,
}

/// Identity used when a revision has no resolvable author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorFallback {
    pub name: String,
    pub email_domain: String,
}

impl Default for AuthorFallback {
    fn default() -> Self {
        Self {
            name: DEFAULT_FALLBACK_AUTHOR.to_string(),
            email_domain: DEFAULT_EMAIL_DOMAIN.to_string(),
        }
    }
}

impl AuthorFallback {
    fn resolve(&self, name: Option<&str>, email: Option<&str>) -> (String, String) {
        let name = name
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(self.name.as_str())
            .to_string();
        let email = match email.map(str::trim).filter(|value| !value.is_empty()) {
            Some(email) => email.to_string(),
            None => format!("{}@{}", email_local_part(&name), self.email_domain),
        };
        (name, email)
    }
}

pub struct Normalizer<'a, C: ContentConverter + ?Sized> {
    converter: &'a C,
    authors: AuthorFallback,
}

impl<'a, C: ContentConverter + ?Sized> Normalizer<'a, C> {
    pub fn new(converter: &'a C, authors: AuthorFallback) -> Self {
        Self { converter, authors }
    }

    /// Build the revision record. Conversion failures are logged and fall back
    /// to the source text; they never fail the revision.
    pub fn normalize(&self, row: RawRevisionRow) -> Revision {
        let deleted = row.is_deleted();
        let (author_name, author_email) = self
            .authors
            .resolve(row.author_name.as_deref(), row.author_email.as_deref());
        let source_text = unescape_lines(&row.content);

        // A deleted revision's text is never used.
        let (converted_text, conversion_failure) = if deleted {
            (Vec::new(), None)
        } else {
            match self.converter.convert(&row.page_title, &source_text) {
                Ok(lines) => (lines, None),
                Err(error) => {
                    warn!(
                        page = %row.page_title,
                        timestamp = %row.timestamp,
                        "conversion failed, keeping original markup: {}",
                        error.diagnostic
                    );
                    (source_text.clone(), Some(error.diagnostic))
                }
            }
        };

        Revision {
            timestamp: row.timestamp,
            page_id: row.page_id,
            namespace: row.namespace,
            page_name: row.page_title,
            deleted,
            author_name,
            author_email,
            source_text,
            converted_text,
            conversion_failure,
        }
    }
}

/// Undo batch escaping and split at the escaped line separator.
pub fn unescape_lines(field: &str) -> Vec<String> {
    unescape_field(field)
        .split('\n')
        .map(str::to_string)
        .collect()
}

pub fn unescape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

fn nullable_field(field: &str) -> Option<String> {
    if field == NULL_FIELD {
        None
    } else {
        Some(unescape_field(field))
    }
}

fn parse_number<T: std::str::FromStr>(
    row: usize,
    label: &str,
    value: &str,
) -> Result<T, MalformedRowError> {
    value.trim().parse().map_err(|_| MalformedRowError {
        row,
        reason: format!("{label} is not a number: `{value}`"),
    })
}

fn email_local_part(name: &str) -> String {
    name.split_whitespace()
        .map(|part| part.replace(['<', '>', '@'], ""))
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
}
