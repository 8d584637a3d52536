//! Typed access to tool call arguments.

use crate::error::DasiError;

/// Wrapper around tool call arguments providing typed extraction.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str, DasiError> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| DasiError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get a string argument that must contain something besides whitespace.
    pub fn get_non_empty_str(&self, key: &str) -> Result<&str, DasiError> {
        let value = self.get_str(key)?.trim();
        if value.is_empty() {
            return Err(DasiError::InvalidArgument(format!("Argument must not be empty: {key}")));
        }
        Ok(value)
    }

    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Optional positive integer; numeric strings are accepted.
    pub fn get_u64_opt(&self, key: &str) -> Option<u64> {
        let value = self.value.get(key)?;
        value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T, DasiError> {
        serde_json::from_value(self.value.clone())
            .map_err(|e| DasiError::InvalidArgument(format!("Invalid tool arguments: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_rejects_whitespace() {
        let args = ToolArguments::new(serde_json::json!({"query": "   "}));
        assert!(args.get_str("query").is_ok());
        assert!(args.get_non_empty_str("query").is_err());
        assert!(args.get_str_opt("query").is_none());
    }

    #[test]
    fn u64_accepts_numbers_and_numeric_strings() {
        let args = ToolArguments::new(serde_json::json!({"a": 5, "b": "12", "c": 2.0, "d": "x"}));
        assert_eq!(args.get_u64_opt("a"), Some(5));
        assert_eq!(args.get_u64_opt("b"), Some(12));
        assert_eq!(args.get_u64_opt("c"), Some(2));
        assert_eq!(args.get_u64_opt("d"), None);
        assert_eq!(args.get_u64_opt("missing"), None);
    }

    #[test]
    fn deserialize_into_struct() {
        #[derive(serde::Deserialize)]
        struct Query {
            query: String,
        }
        let args = ToolArguments::new(serde_json::json!({"query": "rust"}));
        let parsed: Query = args.deserialize().unwrap();
        assert_eq!(parsed.query, "rust");
    }
}
