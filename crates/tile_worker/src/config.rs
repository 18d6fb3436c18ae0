//! Service configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tile3d::FetchOptions;

/// Read-only service configuration, shared by every decode task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Per-source options, keyed by root index so several tile sources can
    /// decode through one service.
    #[serde(default)]
    pub sources: HashMap<usize, SourceOptions>,
    /// How many tiles may decode concurrently.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self { sources: HashMap::new(), max_concurrent: default_max_concurrent() }
    }
}

fn default_max_concurrent() -> usize {
    4
}

impl ServiceConfig {
    /// Options for one source; unknown indices fall back to defaults.
    pub fn source(&self, root_index: usize) -> SourceOptions {
        self.sources.get(&root_index).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceOptions {
    /// Largest texture edge the model parser should decode for this source.
    #[serde(default)]
    pub max_texture_size: Option<u32>,
    #[serde(default)]
    pub fetch: FetchOptions,
    /// Extra query parameters appended to every request URL of this source.
    #[serde(default)]
    pub url_params: Vec<(String, String)>,
}

/// Append query parameters to a URL, respecting an existing query string.
pub fn append_query(url: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }
    let mut out = String::with_capacity(url.len() + params.len() * 16);
    out.push_str(url);
    let mut separator = if url.contains('?') { '&' } else { '?' };
    for (key, value) in params {
        out.push(separator);
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        separator = '&';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_query_parameters() {
        let params = vec![("token".to_string(), "abc".to_string()), ("v".to_string(), "2".to_string())];
        assert_eq!(append_query("http://host/t.b3dm", &params), "http://host/t.b3dm?token=abc&v=2");
        assert_eq!(append_query("http://host/t.b3dm?x=1", &params), "http://host/t.b3dm?x=1&token=abc&v=2");
        assert_eq!(append_query("u", &[]), "u");
    }

    #[test]
    fn config_round_trips_through_json() {
        let json = r#"{
            "sources": {
                "0": { "max_texture_size": 2048, "url_params": [["key", "k0"]] },
                "3": { "fetch": { "headers": [["accept", "application/octet-stream"]] } }
            },
            "max_concurrent": 8
        }"#;
        let config: ServiceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_concurrent, 8);
        assert_eq!(config.source(0).max_texture_size, Some(2048));
        assert_eq!(config.source(3).fetch.headers.len(), 1);
        // Unknown sources fall back to defaults.
        assert_eq!(config.source(7).max_texture_size, None);
    }
}
