use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// A `repository:tag` image reference.
///
/// Exactly one `:` is allowed, so registry ports and `@digest` pins are
/// rejected. The tag doubles as the SBOM output key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference {
    repository: String,
    tag: String,
}

impl ImageReference {
    pub fn parse(reference: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        let separators = reference.matches(':').count();
        if separators != 1 {
            return Err(invalid(&format!(
                "expected exactly one ':' tag separator, found {}",
                separators
            )));
        }
        let (repository, tag) = reference
            .split_once(':')
            .ok_or_else(|| invalid("missing tag"))?;
        if repository.is_empty() {
            return Err(invalid("empty repository"));
        }
        if tag.is_empty() {
            return Err(invalid("empty tag"));
        }
        if reference.contains('@') || reference.chars().any(char::is_whitespace) {
            return Err(invalid("digest pins and whitespace are not supported"));
        }
        if tag.contains('/') {
            return Err(invalid("tag must not contain '/'"));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Parses every reference up front so malformed input fails before any pull.
pub fn parse_all<S: AsRef<str>>(references: &[S]) -> Result<Vec<ImageReference>> {
    references
        .iter()
        .map(|r| ImageReference::parse(r.as_ref()))
        .collect()
}

/// Picks a unique SBOM file key for each reference: the bare tag, or
/// `<repository>-<tag>` when several references share the same tag.
///
/// A key that still clashes after that (a bare tag equal to a rewritten key,
/// or two repositories that sanitize alike) gets a `-2`, `-3`, ... suffix in
/// input order, never reusing any other candidate key.
pub fn sbom_keys(references: &[ImageReference]) -> Vec<String> {
    let mut tag_counts: HashMap<&str, usize> = HashMap::new();
    for reference in references {
        *tag_counts.entry(reference.tag()).or_default() += 1;
    }

    let candidates: Vec<String> = references
        .iter()
        .map(|reference| {
            if tag_counts[reference.tag()] > 1 {
                format!(
                    "{}-{}",
                    sanitize_file_stem(reference.repository()),
                    reference.tag()
                )
            } else {
                reference.tag().to_string()
            }
        })
        .collect();

    let mut taken: HashSet<String> = candidates.iter().cloned().collect();
    let mut assigned: HashSet<String> = HashSet::new();
    candidates
        .into_iter()
        .map(|key| {
            if assigned.insert(key.clone()) {
                return key;
            }
            let mut n = 2;
            loop {
                let suffixed = format!("{}-{}", key, n);
                if taken.insert(suffixed.clone()) {
                    assigned.insert(suffixed.clone());
                    return suffixed;
                }
                n += 1;
            }
        })
        .collect()
}

/// Replaces path separators and other awkward characters with `-`.
fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}
