//! CycloneDX 1.5 JSON rendering.
//!
//! Packages become `library` components keyed by `bom-ref` = package id; the
//! scanned image is `metadata.component`. Relationships are inverted into
//! CycloneDX's `dependsOn` lists.

use super::Sbom;
use crate::catalog::RelationshipKind;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub const SPEC_VERSION: &str = "1.5";

pub(super) fn to_value(sbom: &Sbom) -> serde_json::Result<Value> {
    let components: Vec<Value> = sbom
        .artifacts
        .packages
        .iter()
        .map(|package| {
            let mut component = json!({
                "bom-ref": package.id,
                "type": "library",
                "name": package.name,
                "version": package.version,
                "purl": package.purl,
            });
            if !package.licenses.is_empty() {
                component["licenses"] = Value::Array(
                    package
                        .licenses
                        .iter()
                        .map(|license| json!({ "expression": license }))
                        .collect(),
                );
            }
            if let Some(description) = &package.description {
                component["description"] = json!(description);
            }
            if let Some(maintainer) = &package.maintainer {
                component["publisher"] = json!(maintainer);
            }
            component["properties"] = Value::Array(
                package
                    .locations
                    .iter()
                    .enumerate()
                    .map(|(i, location)| {
                        json!({
                            "name": format!("layerbom:location:{}:layerID", i),
                            "value": location.layer_digest,
                        })
                    })
                    .chain(std::iter::once(json!({
                        "name": "layerbom:package:type",
                        "value": package.kind.to_string(),
                    })))
                    .collect(),
            );
            component
        })
        .collect();

    let mut depends_on: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for package in &sbom.artifacts.packages {
        depends_on.entry(package.id.as_str()).or_default();
    }
    for relationship in &sbom.relationships {
        match relationship.kind {
            RelationshipKind::DependencyOf => depends_on
                .entry(relationship.child.as_str())
                .or_default()
                .push(relationship.parent.as_str()),
        }
    }
    let dependencies: Vec<Value> = depends_on
        .into_iter()
        .map(|(reference, deps)| json!({ "ref": reference, "dependsOn": deps }))
        .collect();

    let mut metadata_component = json!({
        "bom-ref": "image",
        "type": "container",
        "name": sbom.source.name,
    });
    if let Some(digest) = sbom.source.manifest_digests.first() {
        metadata_component["version"] = json!(digest);
    }

    let mut document = json!({
        "$schema": "http://cyclonedx.org/schema/bom-1.5.schema.json",
        "bomFormat": "CycloneDX",
        "specVersion": SPEC_VERSION,
        "serialNumber": format!("urn:uuid:{}", uuid::Uuid::new_v4()),
        "version": 1,
        "metadata": {
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            "tools": {
                "components": [{
                    "type": "application",
                    "name": sbom.descriptor.name,
                    "version": sbom.descriptor.version,
                }]
            },
            "component": metadata_component,
        },
        "components": components,
        "dependencies": dependencies,
    });

    if let Some(distro) = &sbom.artifacts.linux_distribution {
        document["metadata"]["properties"] = json!([
            { "name": "layerbom:distro:id", "value": distro.id },
            { "name": "layerbom:distro:versionID", "value": distro.version_id.clone().unwrap_or_default() },
        ]);
    }

    Ok(document)
}
