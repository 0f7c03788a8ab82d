use snafu::{Location, ResultExt, Snafu};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

/// Layout of a single query file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
pub enum QueryFileFormat {
    /// Queries preceded by a `Q<n>` header line.
    #[default]
    #[strum(serialize = "original")]
    Original,
    /// Queries separated by `;`, named `query<index>`.
    #[strum(serialize = "semicolon-delimited")]
    SemicolonDelimited,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub sql: String,
}

impl Query {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sql: sql.into(),
        }
    }
}

#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum QueryLoadError {
    #[snafu(display("Failed to read queries from {}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Invalid query directory pattern {pattern}"))]
    Pattern {
        pattern: String,
        source: glob::PatternError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("Failed to walk the query directory"))]
    Walk {
        source: glob::GlobError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("No queries found in {}", path.display()))]
    NoQueries {
        path: PathBuf,
        #[snafu(implicit)]
        location: Location,
    },
}

fn sql_files(dir: &Path) -> Result<Vec<PathBuf>, QueryLoadError> {
    let escaped = PathBuf::from(glob::Pattern::escape(&dir.to_string_lossy()));
    let pattern = escaped.join("*.sql").to_string_lossy().into_owned();
    let mut files = glob::glob(&pattern)
        .context(PatternSnafu { pattern })?
        .collect::<Result<Vec<_>, _>>()
        .context(WalkSnafu)?;
    files.retain(|path| path.is_file());
    files.sort();
    Ok(files)
}

/// Number of `*.sql` files directly under `dir`.
pub fn count_sql_files(dir: &Path) -> Result<usize, QueryLoadError> {
    Ok(sql_files(dir)?.len())
}

/// One query per `*.sql` file, named after the file stem, in file name order.
pub fn load_query_dir(dir: &Path) -> Result<Vec<Query>, QueryLoadError> {
    let mut queries = Vec::new();
    for path in sql_files(dir)? {
        let sql = std::fs::read_to_string(&path).context(ReadSnafu { path: path.clone() })?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        queries.push(Query::new(id, sql.trim()));
    }
    if queries.is_empty() {
        return NoQueriesSnafu { path: dir }.fail();
    }
    Ok(queries)
}

/// Reads a single query file. `filter_comment_lines` drops `--` lines from
/// semicolon-delimited files; headered files keep their text as is.
pub fn load_query_file(
    path: &Path,
    format: QueryFileFormat,
    filter_comment_lines: bool,
) -> Result<Vec<Query>, QueryLoadError> {
    let content = std::fs::read_to_string(path).context(ReadSnafu { path })?;
    let queries = match format {
        QueryFileFormat::Original => parse_headered(&content),
        QueryFileFormat::SemicolonDelimited => {
            parse_semicolon_delimited(&content, filter_comment_lines)
        }
    };
    if queries.is_empty() {
        return NoQueriesSnafu { path }.fail();
    }
    Ok(queries)
}

fn is_header(line: &str) -> bool {
    let line = line.trim();
    line.len() > 1
        && line.starts_with('Q')
        && line[1..].chars().all(|c| c.is_ascii_digit())
}

/// Splits on `Q<n>` header lines. Text before the first header is ignored.
pub fn parse_headered(content: &str) -> Vec<Query> {
    let mut queries = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in content.lines() {
        if is_header(line) {
            if let Some((id, body)) = current.take() {
                queries.push(Query::new(id, body.join("\n").trim()));
            }
            current = Some((line.trim().to_string(), Vec::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    if let Some((id, body)) = current {
        queries.push(Query::new(id, body.join("\n").trim()));
    }
    queries
}

/// Splits on `;`. Blank lines are dropped, and `--` comment lines too when
/// `strip_comments` is set. The id keeps the statement's position in the
/// file, so empty statements leave gaps.
pub fn parse_semicolon_delimited(content: &str, strip_comments: bool) -> Vec<Query> {
    content
        .split(';')
        .enumerate()
        .filter_map(|(idx, statement)| {
            let lines: Vec<&str> = statement
                .trim()
                .lines()
                .filter(|l| !l.trim().is_empty())
                .filter(|l| !(strip_comments && l.starts_with("--")))
                .collect();
            if lines.is_empty() {
                None
            } else {
                Some(Query::new(format!("query{idx}"), lines.join("\n")))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn should_parse_format_names() {
        assert_eq!(QueryFileFormat::from_str("original").unwrap(), QueryFileFormat::Original);
        assert_eq!(
            QueryFileFormat::from_str("semicolon-delimited").unwrap(),
            QueryFileFormat::SemicolonDelimited
        );
        assert!(QueryFileFormat::from_str("csv").is_err());
    }

    #[test]
    fn should_split_on_headers() {
        let content = "-- preamble\nQ1\n\nselect 1\nfrom a\n\nQ02\nselect 2\n";

        let queries = parse_headered(content);

        assert_eq!(
            queries,
            vec![
                Query::new("Q1", "select 1\nfrom a"),
                Query::new("Q02", "select 2"),
            ]
        );
    }

    #[test]
    fn should_not_treat_identifiers_as_headers() {
        let queries = parse_headered("Q1\nselect Q2 from t\nQ3x\n");

        assert_eq!(queries, vec![Query::new("Q1", "select Q2 from t\nQ3x")]);
    }

    #[test]
    fn should_split_on_semicolons_keeping_positions() {
        let content = "select 1;\n\n;\n-- second\nselect\n\n 2;\n";

        let queries = parse_semicolon_delimited(content, false);
        let stripped = parse_semicolon_delimited(content, true);

        assert_eq!(
            queries,
            vec![
                Query::new("query0", "select 1"),
                Query::new("query2", "-- second\nselect\n 2"),
            ]
        );
        assert_eq!(stripped[1], Query::new("query2", "select\n 2"));
    }

    #[test]
    fn should_load_directory_sorted_by_file_name() {
        // Given
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("q10.sql"), "select 10\n").unwrap();
        std::fs::write(dir.path().join("q01.sql"), "select 1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        // When
        let queries = load_query_dir(dir.path()).unwrap();

        // Then
        assert_eq!(count_sql_files(dir.path()).unwrap(), 2);
        assert_eq!(
            queries,
            vec![Query::new("q01", "select 1"), Query::new("q10", "select 10")]
        );
    }

    #[test]
    fn should_load_directory_with_glob_characters_in_its_path() {
        // Given a query directory whose name reads as a glob pattern
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("queries[v2]*?");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("q01.sql"), "select 1").unwrap();

        // When
        let queries = load_query_dir(&dir).unwrap();

        // Then the name is matched literally
        assert_eq!(count_sql_files(&dir).unwrap(), 1);
        assert_eq!(queries, vec![Query::new("q01", "select 1")]);
    }

    #[test]
    fn should_drop_comment_lines_from_file_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("queries.sql");
        std::fs::write(&file, "-- warm\nselect 1;\nselect 2;\n").unwrap();

        let kept = load_query_file(&file, QueryFileFormat::SemicolonDelimited, false).unwrap();
        let filtered = load_query_file(&file, QueryFileFormat::SemicolonDelimited, true).unwrap();

        assert_eq!(kept[0].sql, "-- warm\nselect 1");
        assert_eq!(filtered[0].sql, "select 1");
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn should_fail_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();

        let result = load_query_dir(dir.path());

        assert!(matches!(result, Err(QueryLoadError::NoQueries { .. })));
    }
}
