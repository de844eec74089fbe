//! Debian `var/lib/dpkg/status` (and distroless `status.d/*`) reader.

use super::PackageRecord;
use std::path::Path;

pub const STATUS_PATH: &str = "var/lib/dpkg/status";
pub const STATUS_DIR: &str = "var/lib/dpkg/status.d";

/// Whether a layer path is a dpkg status database.
pub fn is_status_file(path: &Path) -> bool {
    if path == Path::new(STATUS_PATH) {
        return true;
    }
    path.parent() == Some(Path::new(STATUS_DIR))
        && path
            .extension()
            .map(|ext| ext != "md5sums")
            .unwrap_or(true)
}

pub fn parse_status(status: &str) -> Vec<PackageRecord> {
    let mut records = Vec::new();
    let mut fields: Vec<(String, String)> = Vec::new();

    for line in status.lines().chain(std::iter::once("")) {
        if line.trim().is_empty() {
            if let Some(record) = to_record(&fields) {
                records.push(record);
            }
            fields.clear();
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = fields.last_mut() {
                value.push('\n');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            fields.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    records
}

fn to_record(fields: &[(String, String)]) -> Option<PackageRecord> {
    let get = |key: &str| {
        fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    };

    let name = get("Package")?;
    if let Some(status) = get("Status") {
        if status.split_whitespace().last() != Some("installed") {
            return None;
        }
    }

    let mut depends = Vec::new();
    for key in ["Pre-Depends", "Depends"] {
        if let Some(value) = get(key) {
            depends.extend(relation_names(value));
        }
    }

    Some(PackageRecord {
        name: name.to_string(),
        version: get("Version").unwrap_or_default().to_string(),
        architecture: get("Architecture").map(str::to_string),
        licenses: Vec::new(),
        origin: get("Source").map(|s| relation_name(s).to_string()),
        maintainer: get("Maintainer").map(str::to_string),
        description: get("Description").and_then(|d| d.lines().next()).map(str::to_string),
        url: get("Homepage").map(str::to_string),
        depends,
        provides: get("Provides").map(relation_names).unwrap_or_default(),
    })
}

/// `libc6 (>= 2.34), libgcc-s1 | libgcc1` → every alternative's name.
fn relation_names(value: &str) -> Vec<String> {
    value
        .split([',', '|'])
        .map(relation_name)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn relation_name(relation: &str) -> &str {
    let relation = relation.trim();
    let end = relation
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(relation.len());
    let name = &relation[..end];
    name.split(':').next().unwrap_or(name)
}
