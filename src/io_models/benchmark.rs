use serde_derive::{Deserialize, Serialize};

fn default_namespace() -> String {
    "default".to_string()
}

/// One benchmark job of a campaign: a raw Kubernetes manifest, the namespace
/// it goes to, and an optional display name. The manifest text is what gets
/// placeholder substitution applied right before submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BenchmarkSpec {
    pub manifest_text: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl BenchmarkSpec {
    pub fn display_name(&self, index: usize) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("benchmark-job-{}", index + 1),
        }
    }
}
