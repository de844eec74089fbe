use super::Sbom;
use serde_json::{json, Value};

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Native document: the aggregate as-is plus a schema marker.
pub(super) fn to_value(sbom: &Sbom) -> serde_json::Result<Value> {
    let mut value = serde_json::to_value(sbom)?;
    if let Some(object) = value.as_object_mut() {
        object.insert(
            "schema".to_string(),
            json!({ "name": "layerbom-json", "version": SCHEMA_VERSION }),
        );
    }
    Ok(value)
}
