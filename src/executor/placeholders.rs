pub const ENGINE_RELEASE_TOKEN: &str = "<ENGINE_RELEASE>";
pub const ENGINE_SERVICE_TOKEN: &str = "<ENGINE_SERVICE>";
pub const ENGINE_POD_TOKEN: &str = "<ENGINE_POD>";

/// Names a benchmark manifest can address an engine by. The service and pod
/// names follow the chart conventions: `<release>-service` and the first
/// ordinal pod `<release>-0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEndpoints {
    pub release_name: String,
    pub service_name: String,
    pub pod_name: String,
}

impl EngineEndpoints {
    pub fn for_release(release_name: &str) -> EngineEndpoints {
        EngineEndpoints {
            release_name: release_name.to_string(),
            service_name: format!("{release_name}-service"),
            pod_name: format!("{release_name}-0"),
        }
    }
}

/// One textual pass over the manifest, token by token in a fixed order,
/// literal strings, no escaping. With no endpoints resolved (skip-engine and
/// nothing running) the tokens stay literal for the user to handle.
pub fn substitute_placeholders(manifest_text: &str, endpoints: Option<&EngineEndpoints>) -> String {
    let Some(endpoints) = endpoints else {
        return manifest_text.to_string();
    };

    manifest_text
        .replace(ENGINE_RELEASE_TOKEN, &endpoints.release_name)
        .replace(ENGINE_SERVICE_TOKEN, &endpoints.service_name)
        .replace(ENGINE_POD_TOKEN, &endpoints.pod_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "\
kind: Job
metadata:
  name: bench
spec:
  env:
    - name: TARGET_URL
      value: http://<ENGINE_SERVICE>:8000
    - name: RELEASE
      value: <ENGINE_RELEASE>
    - name: POD
      value: <ENGINE_POD>
";

    #[test]
    fn tokens_are_replaced_with_endpoint_names() {
        let endpoints = EngineEndpoints::for_release("engine-m-toy-0a1b2c3d-cpu-0");
        let out = substitute_placeholders(MANIFEST, Some(&endpoints));
        assert!(out.contains("http://engine-m-toy-0a1b2c3d-cpu-0-service:8000"));
        assert!(out.contains("value: engine-m-toy-0a1b2c3d-cpu-0\n"));
        assert!(out.contains("value: engine-m-toy-0a1b2c3d-cpu-0-0"));
        assert!(!out.contains("<ENGINE_"));
    }

    #[test]
    fn without_endpoints_tokens_stay_literal() {
        assert_eq!(substitute_placeholders(MANIFEST, None), MANIFEST);
    }

    #[test]
    fn endpoint_names_follow_chart_conventions() {
        let endpoints = EngineEndpoints::for_release("engine-x");
        assert_eq!(endpoints.service_name, "engine-x-service");
        assert_eq!(endpoints.pod_name, "engine-x-0");
    }

    #[test]
    fn every_occurrence_is_replaced_in_one_pass() {
        let endpoints = EngineEndpoints::for_release("engine-x");
        let out = substitute_placeholders("<ENGINE_SERVICE> <ENGINE_SERVICE>", Some(&endpoints));
        assert_eq!(out, "engine-x-service engine-x-service");
    }
}
