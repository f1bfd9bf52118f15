//! Explicit environment context.
//!
//! Every request key other than `value` is a side parameter. Instead of
//! mutating the process environment, the dispatcher installs side parameters
//! into an [`Environment`] it owns and hands that to the handler. Keys are
//! namespaced as `<prefix><UPPERCASED_KEY>`, so `hf_token` becomes
//! `__OW_HF_TOKEN` with the default prefix.

use serde_json::Value;
use std::collections::BTreeMap;

/// Default namespace prefix for side parameters.
pub const DEFAULT_ENV_PREFIX: &str = "__OW_";

/// Key/value context visible to handlers.
///
/// Values persist across requests; a later request overwrites a key an
/// earlier request set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    prefix: String,
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            vars: BTreeMap::new(),
        }
    }

    /// Seeds the context from process variables that already carry the prefix.
    pub fn from_process(prefix: impl Into<String>) -> Self {
        let mut env = Self::new(prefix);
        let seeded: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with(&env.prefix))
            .collect();
        env.vars.extend(seeded);
        env
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Namespaced variable name for a request key.
    pub fn namespaced_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_uppercase())
    }

    /// Installs a request side parameter.
    ///
    /// Strings are stored verbatim; any other JSON value is stored as its
    /// compact JSON text. Returns the variable name that was written.
    pub fn install(&mut self, key: &str, value: &Value) -> String {
        let name = self.namespaced_key(key);
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.vars.insert(name.clone(), text);
        name
    }

    /// Looks up a fully qualified variable (`__OW_HF_TOKEN`).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    /// Looks up a side parameter by its request key (`hf_token`).
    pub fn param(&self, key: &str) -> Option<&str> {
        self.get(&self.namespaced_key(key))
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(DEFAULT_ENV_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_install_uppercases_and_prefixes() {
        let mut env = Environment::default();
        let name = env.install("hf_token", &json!("abc"));

        assert_eq!(name, "__OW_HF_TOKEN");
        assert_eq!(env.get("__OW_HF_TOKEN"), Some("abc"));
        assert_eq!(env.param("hf_token"), Some("abc"));
    }

    #[test]
    fn test_non_string_values_stored_as_json_text() {
        let mut env = Environment::new("APP_");
        env.install("retries", &json!(3));
        env.install("flags", &json!({"a": true}));

        assert_eq!(env.get("APP_RETRIES"), Some("3"));
        assert_eq!(env.get("APP_FLAGS"), Some(r#"{"a":true}"#));
    }

    #[test]
    fn test_later_install_overwrites() {
        let mut env = Environment::default();
        env.install("api_host", &json!("first"));
        env.install("api_host", &json!("second"));

        assert_eq!(env.len(), 1);
        assert_eq!(env.param("api_host"), Some("second"));
    }
}
