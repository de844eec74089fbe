//! Alpine `lib/apk/db/installed` reader.
//!
//! The database is a sequence of blank-line separated records of `K:value`
//! lines. Only the package-level keys are kept; file listings are skipped.

use super::PackageRecord;

pub const DB_PATH: &str = "lib/apk/db/installed";

pub fn parse_installed(db: &str) -> Vec<PackageRecord> {
    let mut records = Vec::new();
    let mut current = PackageRecord::default();

    for line in db.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if !current.name.is_empty() {
                records.push(std::mem::take(&mut current));
            } else {
                current = PackageRecord::default();
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "P" => current.name = value.to_string(),
            "V" => current.version = value.to_string(),
            "A" => current.architecture = Some(value.to_string()),
            "L" if !value.is_empty() => current.licenses = vec![value.to_string()],
            "o" => current.origin = Some(value.to_string()),
            "m" => current.maintainer = Some(value.to_string()),
            "T" => current.description = Some(value.to_string()),
            "U" => current.url = Some(value.to_string()),
            "D" => current.depends = value.split_whitespace().filter_map(dependency_name).collect(),
            "p" => current.provides = value.split_whitespace().map(provided_name).collect(),
            _ => {}
        }
    }

    records
}

/// `musl>=1.2` → `musl`; conflicts (`!name`) are dropped.
fn dependency_name(token: &str) -> Option<String> {
    if token.starts_with('!') {
        return None;
    }
    let end = token.find(['<', '>', '=', '~']).unwrap_or(token.len());
    let name = &token[..end];
    (!name.is_empty()).then(|| name.to_string())
}

/// `so:libcrypto.so.3=3` → `so:libcrypto.so.3`
fn provided_name(token: &str) -> String {
    token.split('=').next().unwrap_or(token).to_string()
}
