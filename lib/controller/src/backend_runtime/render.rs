// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Substitution of `{{ .Key }}` placeholders in recommended-config arguments.
//!
//! A placeholder is `{{`, optional whitespace, a `.`, a key of ASCII letters, digits and `_`,
//! optional whitespace and `}}`. Anything else, `{{ ModelPath }}` included, is copied verbatim.

use std::collections::BTreeMap;

pub type TemplateValues = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("missing flag or the flag has format error: {flag}")]
    MissingKey { flag: String, key: String },
}

pub fn render_flags(flags: &[String], values: &TemplateValues) -> Result<Vec<String>, RenderError> {
    flags.iter().map(|flag| render_flag(flag, values)).collect()
}

pub fn render_flag(flag: &str, values: &TemplateValues) -> Result<String, RenderError> {
    let mut out = String::with_capacity(flag.len());
    let mut rest = flag;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match placeholder(candidate) {
            Some((key, len)) => {
                let value = values
                    .get(key)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| RenderError::MissingKey {
                        flag: flag.to_string(),
                        key: key.to_string(),
                    })?;
                out.push_str(value);
                rest = &candidate[len..];
            }
            None => {
                // a later `{` may still open a placeholder, as in `{{{ .Key }}`
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// The key and byte length of a placeholder at the start of `s`
fn placeholder(s: &str) -> Option<(&str, usize)> {
    let inner = s.strip_prefix("{{")?.trim_start();
    let after_dot = inner.strip_prefix('.')?;
    let key_len = after_dot
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(after_dot.len());
    if key_len == 0 {
        return None;
    }
    let tail = after_dot[key_len..].trim_start().strip_prefix("}}")?;
    Some((&after_dot[..key_len], s.len() - tail.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rstest::rstest;

    fn values(pairs: &[(&str, &str)]) -> TemplateValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn flags(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_default_args() {
        let info = values(&[
            ("ModelPath", "/workspace/models/models--meta-llama--Meta-Llama-3-8B"),
            ("ModelName", "llama3-8b"),
        ]);
        let rendered = render_flags(
            &flags(&[
                "-m",
                "{{ .ModelPath }}",
                "--served-model-name",
                "{{ .ModelName }}",
                "--host",
                "0.0.0.0",
            ]),
            &info,
        )
        .unwrap();
        assert_eq!(
            rendered,
            [
                "-m",
                "/workspace/models/models--meta-llama--Meta-Llama-3-8B",
                "--served-model-name",
                "llama3-8b",
                "--host",
                "0.0.0.0",
            ]
        );
    }

    #[test]
    fn test_missing_key() {
        let info = values(&[("ModelPath", "/workspace/models/x")]);
        let err = render_flags(
            &flags(&["-m", "{{ .ModelPath }}", "--served-model-name", "{{ .ModelName }}"]),
            &info,
        )
        .unwrap_err();
        assert_matches!(&err, RenderError::MissingKey { key, .. } if key == "ModelName");
        assert_eq!(
            err.to_string(),
            "missing flag or the flag has format error: {{ .ModelName }}"
        );
    }

    #[test]
    fn test_empty_value_is_missing() {
        let info = values(&[("ModelName", "")]);
        assert!(render_flag("{{ .ModelName }}", &info).is_err());
    }

    #[rstest]
    #[case("{{.ModelName}}", "qwen")]
    #[case("{{   .ModelName\t}}", "qwen")]
    #[case("--model={{ .ModelName }}:{{ .ModelName }}", "--model=qwen:qwen")]
    #[case("{{ ModelName }}", "{{ ModelName }}")]
    #[case("{{ . }}", "{{ . }}")]
    #[case("{{ .ModelName", "{{ .ModelName")]
    #[case("{{{ .ModelName }}}", "{qwen}")]
    #[case("plain", "plain")]
    fn test_token_shapes(#[case] flag: &str, #[case] expected: &str) {
        let info = values(&[("ModelName", "qwen")]);
        assert_eq!(render_flag(flag, &info).unwrap(), expected);
    }

    fn fragment() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z=/ -]{0,8}",
            Just("{{ .ModelPath }}".to_string()),
            Just("{{.ModelName}}".to_string()),
            Just("{{ ModelName }}".to_string()),
            Just("{".to_string()),
        ]
    }

    proptest! {
        #[test]
        fn prop_render_is_idempotent(parts in prop::collection::vec(fragment(), 0..6)) {
            let info = values(&[("ModelPath", "/workspace/models/m"), ("ModelName", "m")]);
            let flag = parts.concat();
            let once = render_flag(&flag, &info).unwrap();
            let twice = render_flag(&once, &info).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_flags_without_braces_pass_through(flag in "[^{]{0,32}") {
            prop_assert_eq!(render_flag(&flag, &TemplateValues::new()).unwrap(), flag);
        }
    }
}
