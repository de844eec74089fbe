use serde::{Deserialize, Serialize};

/// Distribution identity read from `os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxRelease {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_codename: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_like: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub home_url: Option<String>,
}

impl LinuxRelease {
    /// `<id>-<version_id>`, used as the purl `distro` qualifier.
    pub fn distro_qualifier(&self) -> String {
        match &self.version_id {
            Some(version) => format!("{}-{}", self.id, version),
            None => self.id.clone(),
        }
    }
}

/// Parses `KEY=value` lines. Returns `None` when no `ID` is present.
pub fn parse(content: &str) -> Option<LinuxRelease> {
    let mut release = LinuxRelease::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, raw)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(raw.trim());
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            "ID" => release.id = value,
            "VERSION_ID" => release.version_id = Some(value),
            "NAME" => release.name = Some(value),
            "PRETTY_NAME" => release.pretty_name = Some(value),
            "VERSION_CODENAME" => release.version_codename = Some(value),
            "ID_LIKE" => {
                release.id_like = value.split_whitespace().map(str::to_string).collect()
            }
            "HOME_URL" => release.home_url = Some(value),
            _ => {}
        }
    }

    if release.id.is_empty() {
        None
    } else {
        Some(release)
    }
}

fn unquote(value: &str) -> String {
    let stripped = ['"', '\'']
        .iter()
        .find_map(|q| {
            value
                .strip_prefix(*q)
                .and_then(|v| v.strip_suffix(*q))
        })
        .unwrap_or(value);
    stripped.replace("\\\"", "\"").replace("\\\\", "\\")
}
