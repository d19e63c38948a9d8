//! Migration catalog - the set of known migrations for one run
//!
//! A catalog maps version strings to named SQL payloads. It can be built in
//! code or loaded from a directory of `<version>_<name>.sql` files. Ordering is
//! never stored here; [`MigrationSet::validate`] derives it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{MigrateError, MigrateResult};
use crate::version::{self, Version};

/// A named SQL payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPayload {
    pub name: String,
    pub sql: String,
}

/// Version string to payload mapping supplied for one run
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    entries: BTreeMap<String, MigrationPayload>,
}

impl MigrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a migration, rejecting a version string that is already present
    pub fn insert(
        &mut self,
        version: impl Into<String>,
        name: impl Into<String>,
        sql: impl Into<String>,
    ) -> MigrateResult<()> {
        let version = version.into();
        let name = name.into();
        if let Some(existing) = self.entries.get(&version) {
            return Err(MigrateError::AmbiguousVersion {
                first: format!("{} ({})", version, existing.name),
                second: format!("{} ({})", version, name),
            });
        }
        self.entries.insert(
            version,
            MigrationPayload {
                name,
                sql: sql.into(),
            },
        );
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, version: &str, name: &str, sql: &str) -> MigrateResult<Self> {
        self.insert(version, name, sql)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, version: &str) -> Option<&MigrationPayload> {
        self.entries.get(version)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MigrationPayload)> {
        self.entries.iter().map(|(v, p)| (v.as_str(), p))
    }

    /// Parse every key and return the migrations in ascending version order
    ///
    /// Fails with `InvalidVersionFormat` on the first malformed key and with
    /// `AmbiguousVersion` when two differently spelled keys compare equal.
    pub fn validate(&self) -> MigrateResult<Vec<(Version, &MigrationPayload)>> {
        let mut parsed = self
            .entries
            .iter()
            .map(|(key, payload)| Ok((Version::parse(key)?, payload)))
            .collect::<MigrateResult<Vec<_>>>()?;

        let versions: Vec<Version> = parsed.iter().map(|(v, _)| v.clone()).collect();
        if let Some((first, second)) = version::find_ambiguous(&versions) {
            return Err(MigrateError::AmbiguousVersion {
                first: first.to_string(),
                second: second.to_string(),
            });
        }

        parsed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(parsed)
    }

    /// Load every `*.sql` file in `dir`
    ///
    /// File stems are split at the first `__` (or, failing that, the first
    /// `_`) into version and name. A missing directory yields an empty set.
    pub fn from_dir(dir: impl AsRef<Path>) -> MigrateResult<Self> {
        let dir = dir.as_ref();
        let mut set = Self::new();
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "migrations directory does not exist");
            return Ok(set);
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && path.extension().map_or(false, |ext| ext == "sql") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| MigrateError::Catalog(format!("invalid file name: {}", path.display())))?;
            let (version, name) = split_stem(stem);
            let sql = fs::read_to_string(&path)?;
            set.insert(version, name, sql)?;
        }

        tracing::debug!(dir = %dir.display(), count = set.len(), "loaded migration catalog");
        Ok(set)
    }
}

fn split_stem(stem: &str) -> (&str, &str) {
    let split = stem
        .split_once("__")
        .or_else(|| stem.split_once('_'))
        .filter(|(_, name)| !name.is_empty());
    match split {
        Some((version, name)) => (version, name),
        None => (stem, stem),
    }
}

/// Write an empty migration file for `version` into `dir`
pub fn new_migration_file(dir: impl AsRef<Path>, version: &str, name: &str) -> MigrateResult<PathBuf> {
    let version = Version::parse(version)?;
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if slug.is_empty() {
        return Err(MigrateError::Catalog("migration name cannot be empty".to_string()));
    }

    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(format!("{}__{}.sql", version, slug));
    if path.exists() {
        return Err(MigrateError::Catalog(format!("{} already exists", path.display())));
    }

    let template = format!(
        "-- Migration: {}\n-- Version: {}\n-- Created: {}\n\n",
        name.trim(),
        version,
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );
    fs::write(&path, template)?;
    Ok(path)
}
