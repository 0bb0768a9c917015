use serde::Deserialize;

#[derive(Default, Debug, Clone, PartialEq, Deserialize)]
pub struct HelmListItem {
    pub name: String,
    pub namespace: String,
    pub revision: String,
    pub updated: String,
    pub status: String,
    pub chart: String,
    pub app_version: String,
}

/// Subset of `helm status -o json` we rely on.
#[derive(Debug, Clone, Deserialize)]
pub struct HelmStatusJson {
    pub name: String,
    pub namespace: String,
    pub info: HelmStatusInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HelmStatusInfo {
    pub status: String,
    #[serde(default)]
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helm_status_json_deserializes() {
        let payload = r#"
        {
          "name": "engine-m-toy-0a1b2c3d-cpu-0",
          "namespace": "engines",
          "info": {
            "first_deployed": "2025-01-01T00:00:00Z",
            "status": "deployed",
            "description": "Install complete"
          },
          "version": 1
        }"#;

        let status: HelmStatusJson = serde_json::from_str(payload).unwrap();
        assert_eq!(status.info.status, "deployed");
        assert_eq!(status.namespace, "engines");
    }

    #[test]
    fn helm_list_item_deserializes() {
        let payload = r#"
        [{
          "name": "engine-m-toy-0a1b2c3d-cpu-0",
          "namespace": "engines",
          "revision": "1",
          "updated": "2025-01-01 00:00:00.000000000 +0000 UTC",
          "status": "deployed",
          "chart": "engine-0.1.0",
          "app_version": "0.9.1"
        }]"#;

        let items: Vec<HelmListItem> = serde_json::from_str(payload).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, "deployed");
    }
}
