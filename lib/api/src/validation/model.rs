// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use super::{FieldErrors, validate_name};
use crate::constants::{MODEL_SCOPE, labels};
use crate::model::OpenModel;
use crate::uri::{self, Protocol};

/// Stamp the family-name label and the default hub name
pub fn default_model(model: &mut OpenModel) {
    model
        .metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(
            labels::MODEL_FAMILY_NAME.to_string(),
            model.spec.family_name.clone(),
        );
    if let Some(hub) = model.spec.source.model_hub.as_mut() {
        hub.name
            .get_or_insert_with(|| crate::constants::HUGGING_FACE.to_string());
    }
}

pub fn validate_model_create(model: &OpenModel) -> FieldErrors {
    let mut errs = validate_model_update(model);
    validate_name(model.metadata.name.as_deref(), &mut errs);
    errs
}

pub fn validate_model_update(model: &OpenModel) -> FieldErrors {
    let mut errs = FieldErrors::default();
    let source = &model.spec.source;

    if source.model_hub.is_none() && source.uri.is_none() {
        errs.push("spec.source", "Source can't be all null");
    }

    if let Some(raw) = &source.uri {
        let path = "spec.source.uri";
        match uri::parse_uri(raw) {
            Err(_) => errs.push(path, format!("{raw:?}: URI with wrong format")),
            Ok((protocol, address)) => match protocol.parse::<Protocol>() {
                Err(_) => errs.push(path, format!("{raw:?}: URI with unsupported protocol")),
                Ok(Protocol::Oss) if uri::parse_oss(address).is_err() => {
                    errs.push(path, format!("{raw:?}: URI with wrong address"))
                }
                Ok(Protocol::S3 | Protocol::Gcs) if uri::parse_s3(address).is_err() => {
                    errs.push(path, format!("{raw:?}: URI with wrong address"))
                }
                Ok(_) => {}
            },
        }
    }

    if let Some((hub, filename)) = source
        .model_hub
        .as_ref()
        .and_then(|hub| hub.filename.as_ref().map(|f| (hub, f)))
    {
        if hub.name.as_deref() == Some(MODEL_SCOPE) {
            errs.push(
                "spec.source.modelHub.filename",
                format!("{filename:?}: Filename can only set once modeHub is Huggingface"),
            );
        }
        if hub.allow_patterns.is_some() {
            errs.push(
                "spec.source.modelHub.allowPatterns",
                "Once Filename is set, allowPatterns should be nil",
            );
        }
        if hub.ignore_patterns.is_some() {
            errs.push(
                "spec.source.modelHub.ignorePatterns",
                "Once Filename is set, ignorePatterns should be nil",
            );
        }
    }

    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelHub, ModelSourceSpec, ModelSpec};
    use rstest::rstest;

    fn uri_model(uri: &str) -> OpenModel {
        OpenModel::new(
            "llama3",
            ModelSpec {
                family_name: "llama3".to_string(),
                source: ModelSourceSpec {
                    model_hub: None,
                    uri: Some(uri.to_string()),
                },
                ..Default::default()
            },
        )
    }

    fn hub_model(hub: ModelHub) -> OpenModel {
        OpenModel::new(
            "opt-125m",
            ModelSpec {
                family_name: "opt".to_string(),
                source: ModelSourceSpec {
                    model_hub: Some(hub),
                    uri: None,
                },
                ..Default::default()
            },
        )
    }

    #[rstest]
    #[case("oss://bucket.endpoint/models/qwen", 0)]
    #[case("s3://bucket/models/qwen", 0)]
    #[case("gcs://bucket/models/qwen", 0)]
    #[case("host:///mnt/models/qwen", 0)]
    #[case("ollama://llama3.2", 0)]
    #[case("oss://endpoint/models/qwen", 1)]
    #[case("s3://bucket", 1)]
    #[case("http://huggingface.co/qwen", 1)]
    #[case("bucket/models/qwen", 1)]
    fn test_validate_uri(#[case] uri: &str, #[case] n_errs: usize) {
        assert_eq!(validate_model_create(&uri_model(uri)).len(), n_errs, "{uri}");
    }

    #[test]
    fn test_empty_source_rejected() {
        let mut model = uri_model("s3://bucket/m");
        model.spec.source.uri = None;
        let errs = validate_model_update(&model);
        assert_eq!(errs.iter().next().unwrap().path, "spec.source");
    }

    #[test]
    fn test_filename_rules() {
        let hub = ModelHub {
            name: Some(MODEL_SCOPE.to_string()),
            model_id: "Qwen/Qwen2-0.5B-Instruct-GGUF".to_string(),
            filename: Some("qwen2-0_5b-instruct-q5_k_m.gguf".to_string()),
            allow_patterns: Some(vec!["*.gguf".to_string()]),
            ignore_patterns: Some(vec!["*.bin".to_string()]),
            ..Default::default()
        };
        let paths: Vec<_> = validate_model_update(&hub_model(hub))
            .iter()
            .map(|e| e.path.clone())
            .collect();
        assert_eq!(
            paths,
            [
                "spec.source.modelHub.filename",
                "spec.source.modelHub.allowPatterns",
                "spec.source.modelHub.ignorePatterns"
            ]
        );
    }

    #[test]
    fn test_name_checked_on_create_only() {
        let mut model = hub_model(ModelHub {
            model_id: "facebook/opt-125m".to_string(),
            ..Default::default()
        });
        model.metadata.name = Some("Opt_125m".to_string());
        assert!(validate_model_update(&model).is_empty());
        assert!(!validate_model_create(&model).is_empty());
    }

    #[test]
    fn test_default_model() {
        let mut model = hub_model(ModelHub {
            model_id: "facebook/opt-125m".to_string(),
            ..Default::default()
        });
        default_model(&mut model);
        assert_eq!(
            model.metadata.labels.as_ref().unwrap()[labels::MODEL_FAMILY_NAME],
            "opt"
        );
        assert_eq!(
            model.spec.source.model_hub.unwrap().name.as_deref(),
            Some("Huggingface")
        );
    }
}
