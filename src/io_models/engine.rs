use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

fn default_accel_class() -> String {
    "cpu".to_string()
}

fn default_dtype() -> String {
    "float32".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_memory_utilization() -> f64 {
    0.0
}

fn default_parallelism() -> u32 {
    1
}

fn default_max_seqs() -> u32 {
    2
}

fn default_block_size() -> u32 {
    16
}

/// Serving configuration of an inference engine. The recognized option set is
/// closed; anything else travels verbatim through `additional_args`. When
/// `values_text` is present it is authoritative and the structured fields only
/// feed naming and conflict comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineSpec {
    pub model_identifier: String,
    #[serde(default = "default_accel_class")]
    pub accel_class: String,
    #[serde(default)]
    pub accel_count: u32,
    #[serde(default = "default_parallelism")]
    pub parallel_tensor: u32,
    #[serde(default = "default_parallelism")]
    pub parallel_pipeline: u32,
    #[serde(default = "default_max_seqs")]
    pub max_seqs: u32,
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    #[serde(default)]
    pub max_model_len: Option<u32>,
    #[serde(default = "default_memory_utilization")]
    pub memory_utilization: f64,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default)]
    pub quantization: Option<String>,
    #[serde(default)]
    pub trust_remote_code: bool,
    #[serde(default)]
    pub served_alias: Option<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub additional_args: BTreeMap<String, Value>,
    /// Opaque values document handed to the templating engine; when present
    /// it fully determines the rendered installation and keys reuse.
    #[serde(default)]
    pub values_text: Option<String>,
}

impl EngineSpec {
    pub fn served_alias_or_model(&self) -> &str {
        self.served_alias.as_deref().unwrap_or(&self.model_identifier)
    }

    /// The part of the config that identifies an installation when no values
    /// document is supplied; feeds the fallback release-name hash.
    pub fn core_config_string(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.model_identifier,
            self.accel_class,
            self.accel_count,
            self.served_alias_or_model()
        )
    }

    /// Rendered values for the engine chart when the campaign does not carry
    /// its own values document.
    pub fn to_values_yaml(&self, release_name: &str) -> String {
        let mut args: Vec<Value> = vec![
            "--model".into(),
            self.model_identifier.clone().into(),
            "--served-model-name".into(),
            self.served_alias_or_model().into(),
            "--host".into(),
            self.host.clone().into(),
            "--port".into(),
            self.port.to_string().into(),
        ];
        if let Some(quantization) = &self.quantization {
            args.push("--quantization".into());
            args.push(quantization.clone().into());
        }
        for (key, value) in &self.additional_args {
            match value {
                Value::Bool(true) => args.push(format!("--{key}").into()),
                Value::Bool(false) => {}
                other => {
                    args.push(format!("--{key}").into());
                    args.push(value_to_flag_string(other).into());
                }
            }
        }

        let resources = if self.accel_class != "cpu" && self.accel_count > 0 {
            let mut accel = serde_json::Map::new();
            accel.insert(self.accel_class.clone(), self.accel_count.into());
            serde_json::json!({
                "limits": accel.clone(),
                "requests": accel,
            })
        } else {
            serde_json::json!({
                "limits": { "cpu": "2", "memory": "4Gi" },
                "requests": { "cpu": "1", "memory": "2Gi" },
            })
        };

        let values = serde_json::json!({
            "replicaCount": 1,
            "fullnameOverride": release_name,
            "service": {
                "type": "ClusterIP",
                "port": self.port,
                "targetPort": self.port,
            },
            "engine": {
                "model": self.model_identifier,
                "host": self.host,
                "port": self.port,
                "maxModelLen": self.max_model_len.unwrap_or(4096),
                "memoryUtilization": self.memory_utilization,
                "dtype": self.dtype,
                "trustRemoteCode": self.trust_remote_code,
                "tensorParallelSize": self.parallel_tensor,
                "pipelineParallelSize": self.parallel_pipeline,
                "maxNumSeqs": self.max_seqs,
                "blockSize": self.block_size,
            },
            "args": args,
            "resources": resources,
        });

        // json is valid yaml
        serde_yaml::to_string(&values).unwrap_or_default()
    }
}

fn value_to_flag_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Primary model identifier recorded in a live release's values, for conflict
/// comparison. Looks at `engine.model`, then a bare `model`, then scans the
/// `args` array for `--model`.
pub fn primary_model_from_values(values: &Value) -> Option<String> {
    if let Some(model) = values.pointer("/engine/model").and_then(Value::as_str) {
        return Some(model.to_string());
    }
    if let Some(model) = values.get("model").and_then(Value::as_str) {
        return Some(model.to_string());
    }

    let args = values.get("args")?.as_array()?;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.as_str() == Some("--model") {
            return iter.next().and_then(Value::as_str).map(|s| s.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(model: &str) -> EngineSpec {
        serde_json::from_value(serde_json::json!({ "model_identifier": model })).unwrap()
    }

    #[test]
    fn defaults_match_a_cpu_serving_profile() {
        let spec = spec("M/toy");
        assert_eq!(spec.accel_class, "cpu");
        assert_eq!(spec.accel_count, 0);
        assert_eq!(spec.port, 8000);
        assert_eq!(spec.dtype, "float32");
        assert!(!spec.trust_remote_code);
        assert_eq!(spec.served_alias_or_model(), "M/toy");
    }

    #[test]
    fn unknown_keys_are_preserved_in_additional_args() {
        let spec: EngineSpec = serde_json::from_value(serde_json::json!({
            "model_identifier": "M/toy",
            "additional_args": { "enforce-eager": true, "swap-space": 4 }
        }))
        .unwrap();

        let values = spec.to_values_yaml("engine-m-toy-aaaa-cpu-0");
        assert!(values.contains("--enforce-eager"));
        assert!(values.contains("--swap-space"));
    }

    #[test]
    fn values_yaml_carries_model_and_override() {
        let values = spec("M/toy").to_values_yaml("engine-m-toy-aaaa-cpu-0");
        assert!(values.contains("fullnameOverride: engine-m-toy-aaaa-cpu-0"));
        assert!(values.contains("model: M/toy"));
    }

    #[test]
    fn primary_model_is_read_from_engine_section() {
        let values = serde_json::json!({ "engine": { "model": "M/toy" } });
        assert_eq!(primary_model_from_values(&values), Some("M/toy".to_string()));
    }

    #[test]
    fn primary_model_falls_back_to_args_scan() {
        let values = serde_json::json!({ "args": ["--port", "8000", "--model", "M/other"] });
        assert_eq!(primary_model_from_values(&values), Some("M/other".to_string()));

        let no_model = serde_json::json!({ "args": ["--port", "8000"] });
        assert_eq!(primary_model_from_values(&no_model), None);
    }
}
