use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A generated project as handed over by the generation layer: a file map
/// keyed by relative path plus the stack label the generator chose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub stack_label: String,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Lowercase, dash-separated form of the name, usable in hostnames.
    pub fn slug(&self) -> String {
        let slug: String = self
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        let slug = slug
            .split('-')
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("-");
        if slug.is_empty() {
            format!("project-{}", self.id)
        } else {
            slug
        }
    }
}
