//! Migration discovery and ordering.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, MigrationResult};
use crate::parse::{parse_file_name, parse_migration_file, MigrationUnit};

/// A migration file found on disk, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MigrationFile {
    pub version: u32,
    pub name: String,
    pub path: PathBuf,
}

/// List the `NNN_description.sql` files in `dir`, sorted by version.
///
/// Other files are ignored. A missing directory holds no migrations.
pub(crate) async fn migration_files(dir: &Path) -> MigrationResult<Vec<MigrationFile>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("migrations directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(MigrationError::io(dir, e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| MigrationError::io(dir, e))?
    {
        let path = entry.path();
        let parsed = path
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| n.ends_with(".sql"))
            .and_then(parse_file_name);
        match parsed {
            Some((version, name)) => files.push(MigrationFile {
                version,
                name,
                path,
            }),
            None => tracing::debug!("ignoring {}", path.display()),
        }
    }

    files.sort_by(|a, b| (a.version, &a.name).cmp(&(b.version, &b.name)));
    Ok(files)
}

/// Load and parse every migration in `dir`, in execution order.
pub async fn discover(dir: &Path) -> MigrationResult<Vec<MigrationUnit>> {
    let mut units = Vec::new();
    for file in migration_files(dir).await? {
        let contents = tokio::fs::read_to_string(&file.path)
            .await
            .map_err(|e| MigrationError::io(&file.path, e))?;
        units.push(parse_migration_file(&file.name, &contents)?);
    }
    order(units)
}

/// Whether a declared dependency names the migration `(version, name)`.
/// Dependencies may be given by name or by version number.
pub(crate) fn dependency_matches(dependency: &str, version: u32, name: &str) -> bool {
    dependency == name || dependency.parse::<u32>().map_or(false, |v| v == version)
}

fn resolve_dependency<'a>(
    dependency: &str,
    units: &'a [MigrationUnit],
) -> Option<&'a MigrationUnit> {
    units
        .iter()
        .find(|u| u.name == dependency)
        .or_else(|| {
            units
                .iter()
                .find(|u| dependency_matches(dependency, u.version, &u.name))
        })
}

/// Sort units so every unit follows its dependencies. Independent units run
/// in version order.
pub fn order(units: Vec<MigrationUnit>) -> MigrationResult<Vec<MigrationUnit>> {
    // name -> names it waits on
    let mut waiting: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for unit in &units {
        let mut deps = BTreeSet::new();
        for dependency in &unit.dependencies {
            let found = resolve_dependency(dependency, &units).ok_or_else(|| {
                MigrationError::UnknownDependency {
                    migration: unit.name.clone(),
                    dependency: dependency.clone(),
                }
            })?;
            if found.name != unit.name {
                deps.insert(found.name.clone());
            }
        }
        waiting.insert(unit.name.clone(), deps);
    }

    let mut by_name: BTreeMap<String, MigrationUnit> =
        units.into_iter().map(|u| (u.name.clone(), u)).collect();
    let mut ready: BTreeSet<(u32, String)> = waiting
        .iter()
        .filter(|(_, deps)| deps.is_empty())
        .filter_map(|(name, _)| by_name.get(name).map(|u| (u.version, name.clone())))
        .collect();
    let mut ordered = Vec::with_capacity(by_name.len());

    while let Some(next) = ready.pop_first() {
        let (_, name) = next;
        waiting.remove(&name);
        for (other, deps) in waiting.iter_mut() {
            if deps.remove(&name) && deps.is_empty() {
                if let Some(unit) = by_name.get(other) {
                    ready.insert((unit.version, other.clone()));
                }
            }
        }
        if let Some(unit) = by_name.remove(&name) {
            ordered.push(unit);
        }
    }

    if !waiting.is_empty() {
        return Err(MigrationError::DependencyCycle(waiting.into_keys().collect()));
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str, deps: &[&str]) -> MigrationUnit {
        let header: String = deps.iter().map(|d| format!("-- depends: {d}\n")).collect();
        parse_migration_file(name, &format!("{header}-- Up\nSELECT 1;\n")).unwrap()
    }

    fn names(units: &[MigrationUnit]) -> Vec<&str> {
        units.iter().map(|u| u.name.as_str()).collect()
    }

    #[test]
    fn independent_units_run_by_version() {
        let ordered = order(vec![unit("010_c", &[]), unit("002_b", &[]), unit("001_a", &[])]).unwrap();
        assert_eq!(names(&ordered), vec!["001_a", "002_b", "010_c"]);
    }

    #[test]
    fn dependencies_come_first() {
        let ordered = order(vec![
            unit("001_tasks", &["002_projects"]),
            unit("002_projects", &[]),
            unit("003_tags", &["1"]),
        ])
        .unwrap();
        assert_eq!(names(&ordered), vec!["002_projects", "001_tasks", "003_tags"]);
    }

    #[test]
    fn unknown_dependency_is_an_error() {
        let err = order(vec![unit("001_a", &["000_missing"])]).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::UnknownDependency { ref dependency, .. } if dependency == "000_missing"
        ));
    }

    #[test]
    fn cycles_are_reported() {
        let err = order(vec![
            unit("001_a", &["002_b"]),
            unit("002_b", &["001_a"]),
            unit("003_c", &[]),
        ])
        .unwrap_err();
        match err {
            MigrationError::DependencyCycle(members) => {
                assert_eq!(members, vec!["001_a".to_string(), "002_b".to_string()])
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn discover_skips_unrelated_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("002_b.sql"), "-- Up\nSELECT 2;\n").unwrap();
        std::fs::write(dir.path().join("001_a.sql"), "-- Up\nSELECT 1;\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("draft.sql"), "SELECT 3;").unwrap();

        let units = discover(dir.path()).await.unwrap();
        assert_eq!(names(&units), vec!["001_a", "002_b"]);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let units = discover(&dir.path().join("nope")).await.unwrap();
        assert!(units.is_empty());
    }
}
