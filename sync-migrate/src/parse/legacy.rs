//! Fallback for migration files without `-- Up` / `-- Down` sections.
//!
//! The whole file is the Up SQL. Down is a best-effort reverse: one
//! `DROP TABLE IF EXISTS` per `CREATE TABLE`, last created first. Only
//! tables are undone; anything else such a file does stays in place.

/// Split a sectionless file into `(up_sql, down_sql)`. Down is `None` when
/// the file creates no tables.
pub fn parse_legacy(contents: &str) -> (String, Option<String>) {
    let up = contents.trim().to_string();
    let tables = created_tables(&up);
    if tables.is_empty() {
        return (up, None);
    }
    let down = tables
        .iter()
        .rev()
        .map(|t| format!("DROP TABLE IF EXISTS {t};"))
        .collect::<Vec<_>>()
        .join("\n");
    (up, Some(down))
}

/// Table names from `CREATE [TEMP|TEMPORARY] TABLE [IF NOT EXISTS] name`,
/// in file order. Quoting is kept so the generated DROP matches.
fn created_tables(sql: &str) -> Vec<String> {
    let code: String = sql
        .lines()
        .map(|line| line.split("--").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join("\n")
        .replace('(', " ( ")
        .replace(';', " ; ");
    let tokens: Vec<&str> = code.split_whitespace().collect();

    let mut tables = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if !tokens[i].eq_ignore_ascii_case("create") {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        if tokens
            .get(j)
            .map_or(false, |t| t.eq_ignore_ascii_case("temp") || t.eq_ignore_ascii_case("temporary"))
        {
            j += 1;
        }
        if !tokens.get(j).map_or(false, |t| t.eq_ignore_ascii_case("table")) {
            i += 1;
            continue;
        }
        j += 1;
        let if_not_exists = ["if", "not", "exists"];
        if tokens
            .get(j..j + 3)
            .map_or(false, |w| w.iter().zip(if_not_exists).all(|(t, k)| t.eq_ignore_ascii_case(k)))
        {
            j += 3;
        }
        if let Some(name) = tokens.get(j).filter(|t| **t != "(" && **t != ";") {
            tables.push(name.to_string());
        }
        i = j + 1;
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_tables_in_reverse_order() {
        let (up, down) = parse_legacy(
            "CREATE TABLE projects (id TEXT PRIMARY KEY);\n\
             create table if not exists tasks(id TEXT);\n\
             CREATE INDEX idx ON tasks(id);\n",
        );
        assert!(up.starts_with("CREATE TABLE projects"));
        assert_eq!(
            down.as_deref(),
            Some("DROP TABLE IF EXISTS tasks;\nDROP TABLE IF EXISTS projects;")
        );
    }

    #[test]
    fn keeps_quoted_names() {
        let (_, down) = parse_legacy("CREATE TEMP TABLE \"order\" (id INT);");
        assert_eq!(down.as_deref(), Some("DROP TABLE IF EXISTS \"order\";"));
    }

    #[test]
    fn ignores_commented_out_tables() {
        let (_, down) = parse_legacy("-- CREATE TABLE old (id INT);\nCREATE TABLE new (id INT);");
        assert_eq!(down.as_deref(), Some("DROP TABLE IF EXISTS new;"));
    }

    #[test]
    fn no_tables_means_no_down() {
        let (up, down) = parse_legacy("INSERT INTO t VALUES (1);");
        assert_eq!(up, "INSERT INTO t VALUES (1);");
        assert_eq!(down, None);
    }
}
