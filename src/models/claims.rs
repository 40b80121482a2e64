use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Attributes about an authenticated subject, as issued by the identity
/// provider's `/userinfo` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims {
    inner: JsonValue,
}

impl Claims {
    pub fn new(inner: JsonValue) -> Self {
        Self { inner }
    }

    /// Gets a top-level claim by key. JSON `null` counts as absent.
    pub fn get_claim(&self, key: &str) -> Option<&JsonValue> {
        self.inner.get(key).filter(|v| !v.is_null())
    }

    /// Gets a non-empty string claim.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_claim(key)
            .and_then(JsonValue::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Gets a custom claim published under `namespace`, e.g.
    /// `https://nextera.com/role`.
    pub fn namespaced(&self, namespace: &str, field: &str) -> Option<&JsonValue> {
        self.get_claim(&format!("{}{}", namespace, field))
    }

    /// Gets a field from the generic `app_metadata` bag.
    pub fn metadata(&self, field: &str) -> Option<&JsonValue> {
        self.get_claim("app_metadata")
            .and_then(|m| m.get(field))
            .filter(|v| !v.is_null())
    }

    /// First present of the namespaced claim and the metadata field.
    pub fn custom(&self, namespace: &str, field: &str) -> Option<&JsonValue> {
        self.namespaced(namespace, field)
            .or_else(|| self.metadata(field))
    }

    pub fn as_json(&self) -> &JsonValue {
        &self.inner
    }
}

impl From<JsonValue> for Claims {
    fn from(inner: JsonValue) -> Self {
        Self::new(inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn namespaced_claim_wins_over_metadata() {
        let claims = Claims::new(json!({
            "https://nextera.com/department": "Ops",
            "app_metadata": {"department": "Sales"}
        }));
        assert_eq!(
            claims.custom("https://nextera.com/", "department"),
            Some(&json!("Ops"))
        );
    }

    #[test]
    fn null_claims_are_absent() {
        let claims = Claims::new(json!({
            "https://nextera.com/role": null,
            "app_metadata": {"role": "manager"}
        }));
        assert_eq!(claims.custom("https://nextera.com/", "role"), Some(&json!("manager")));
        assert!(claims.get_claim("https://nextera.com/role").is_none());
    }
}
