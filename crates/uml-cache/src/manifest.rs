//! Per-entry manifest.
//!
//! A manifest is written next to the artifact files of an entry once all of
//! them are in place. It records which extensions belong to the entry, so a
//! reader can tell a complete entry from a half-written or foreign one.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct Manifest {
    pub key: String,
    pub extensions: Vec<String>,
    /// Seconds since the Unix epoch.
    pub created: u64,
}

impl Manifest {
    pub fn new(key: &str, extensions: Vec<String>) -> Self {
        let created = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        Self {
            key: key.to_owned(),
            extensions,
            created,
        }
    }

    pub fn created_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.created)
    }

    /// Whether this manifest describes exactly `extensions`, in order.
    pub fn matches(&self, key: &str, extensions: &[&str]) -> bool {
        self.key == key
            && self.extensions.len() == extensions.len()
            && self
                .extensions
                .iter()
                .zip(extensions)
                .all(|(stored, wanted)| stored == wanted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_requires_same_order() {
        let manifest = Manifest::new("k", vec!["svg".to_owned(), "png".to_owned()]);

        assert!(manifest.matches("k", &["svg", "png"]));
        assert!(!manifest.matches("k", &["png", "svg"]));
        assert!(!manifest.matches("k", &["svg"]));
        assert!(!manifest.matches("other", &["svg", "png"]));
    }

    #[test]
    fn test_json_shape() {
        let manifest = Manifest {
            key: "abc".to_owned(),
            extensions: vec!["png".to_owned()],
            created: 42,
        };
        let json = serde_json::to_string(&manifest).unwrap();

        assert_eq!(json, r#"{"key":"abc","extensions":["png"],"created":42}"#);
        let back: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, manifest);
    }
}
