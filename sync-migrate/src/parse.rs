//! Migration file parsing.
//!
//! Files are named `NNN_description.sql` and contain an `-- Up` section
//! followed by an optional `-- Down` section:
//!
//! ```sql
//! -- depends: 001_create_projects
//! -- Up
//! CREATE TABLE tasks (id TEXT PRIMARY KEY, project_id TEXT REFERENCES projects(id));
//! -- Down
//! DROP TABLE tasks;
//! ```
//!
//! Files without sections go through [`legacy::parse_legacy`].

pub mod legacy;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{MigrationError, MigrationResult};

/// One versioned schema change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationUnit {
    /// File stem, e.g. `003_add_tags`.
    pub name: String,
    /// Numeric prefix.
    pub version: u32,
    /// Forward SQL.
    pub up_sql: String,
    /// Reverse SQL, if any.
    pub down_sql: Option<String>,
    /// Hex SHA-256 of the file contents.
    pub checksum: String,
    /// Migrations that must run first (names or versions).
    pub dependencies: Vec<String>,
    /// Parsed with the sectionless fallback.
    pub legacy: bool,
}

impl MigrationUnit {
    /// Whether the unit can be rolled back.
    pub fn is_reversible(&self) -> bool {
        self.down_sql.as_deref().map_or(false, has_sql)
    }

    /// Whether the Up section contains any SQL.
    pub fn has_up(&self) -> bool {
        has_sql(&self.up_sql)
    }
}

/// Split a file name into `(version, stem)`.
///
/// Accepts `NNN_description.sql` or the bare stem. Descriptions may use
/// letters, digits, `_` and `-`.
pub fn parse_file_name(file_name: &str) -> Option<(u32, String)> {
    let stem = file_name.strip_suffix(".sql").unwrap_or(file_name);
    let (digits, description) = stem.split_once('_')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if description.is_empty()
        || !description
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    let version = digits.parse().ok()?;
    Some((version, stem.to_string()))
}

/// Hex SHA-256 of a migration file.
pub fn checksum(contents: &str) -> String {
    hex::encode(Sha256::digest(contents.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Up,
    Down,
}

fn marker(line: &str) -> Option<Marker> {
    let text = line.trim().strip_prefix("--")?.trim().trim_end_matches(':');
    if text.eq_ignore_ascii_case("up") {
        Some(Marker::Up)
    } else if text.eq_ignore_ascii_case("down") {
        Some(Marker::Down)
    } else {
        None
    }
}

fn depends(line: &str) -> Option<Vec<String>> {
    let text = line.trim().strip_prefix("--")?.trim();
    let (key, list) = text.split_once(':')?;
    if !key.trim().eq_ignore_ascii_case("depends") {
        return None;
    }
    Some(
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    )
}

/// Whether `sql` has anything besides whitespace and `--` comments.
pub(crate) fn has_sql(sql: &str) -> bool {
    sql.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with("--")
    })
}

/// Parse a migration file.
///
/// `name` is the file name or stem and must follow the naming pattern.
/// The strict `-- Up` / `-- Down` layout is preferred; files without an
/// `-- Up` marker are parsed as legacy files.
pub fn parse_migration_file(name: &str, contents: &str) -> MigrationResult<MigrationUnit> {
    let (version, stem) =
        parse_file_name(name).ok_or_else(|| MigrationError::InvalidFileName(name.to_string()))?;
    let parse_error = |reason: &str| MigrationError::Parse {
        name: stem.clone(),
        reason: reason.to_string(),
    };

    let dependencies: Vec<String> = contents.lines().filter_map(depends).flatten().collect();
    let checksum = checksum(contents);

    if !contents.lines().any(|l| marker(l) == Some(Marker::Up)) {
        let (up_sql, down_sql) = legacy::parse_legacy(contents);
        return Ok(MigrationUnit {
            name: stem,
            version,
            up_sql,
            down_sql,
            checksum,
            dependencies,
            legacy: true,
        });
    }

    let mut section: Option<Marker> = None;
    let mut up = Vec::new();
    let mut down = Vec::new();

    for line in contents.lines() {
        match (marker(line), section) {
            (Some(Marker::Up), None) => section = Some(Marker::Up),
            (Some(Marker::Up), Some(_)) => return Err(parse_error("more than one -- Up section")),
            (Some(Marker::Down), Some(Marker::Up)) => section = Some(Marker::Down),
            (Some(Marker::Down), None) => return Err(parse_error("-- Down appears before -- Up")),
            (Some(Marker::Down), Some(Marker::Down)) => {
                return Err(parse_error("more than one -- Down section"))
            }
            (None, None) => {
                if has_sql(line) {
                    return Err(parse_error("SQL before the -- Up section"));
                }
            }
            (None, Some(Marker::Up)) => up.push(line),
            (None, Some(Marker::Down)) => down.push(line),
        }
    }

    let down_sql = join_lines(&down);
    Ok(MigrationUnit {
        name: stem,
        version,
        up_sql: join_lines(&up),
        down_sql: has_sql(&down_sql).then_some(down_sql),
        checksum,
        dependencies,
        legacy: false,
    })
}

fn join_lines(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}
