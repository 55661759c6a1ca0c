// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decoder for the Prometheus text exposition format, reduced to what replica scoring needs:
//! family kinds, sample labels and values. Exemplars and native histograms are not handled.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Families keyed by name, iterated in sorted order
pub type MetricFamilies = BTreeMap<String, MetricFamily>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
    Summary,
    #[default]
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
            MetricKind::Untyped => "untyped",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            "histogram" => Ok(MetricKind::Histogram),
            "summary" => Ok(MetricKind::Summary),
            "untyped" => Ok(MetricKind::Untyped),
            other => Err(DecodeError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Full sample name, including any `_bucket`/`_sum`/`_count` suffix
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    fn new(name: &str, kind: MetricKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            samples: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("unknown metric type {0:?}")]
    UnknownKind(String),
}

/// Failure to read a single unlabeled value out of decoded families
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric {0} not found")]
    NotFound(String),

    #[error("metric {0} has no value")]
    NoValue(String),

    #[error("metric {0} has multiple values")]
    MultipleValues(String),

    #[error("metric {name} has unsupported type {kind}")]
    UnsupportedKind { name: String, kind: MetricKind },
}

/// Decode a text exposition body. `# TYPE` lines declare kinds; samples whose name only
/// matches a histogram or summary after stripping `_bucket`, `_sum` or `_count` are grouped
/// into that family. Samples of undeclared families land in an untyped family of their own.
pub fn decode(text: &str) -> Result<MetricFamilies, DecodeError> {
    let mut families = MetricFamilies::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.split_whitespace();
            if parts.next() != Some("TYPE") {
                continue;
            }
            let (Some(name), Some(kind)) = (parts.next(), parts.next()) else {
                return Err(DecodeError::Malformed {
                    line: line_no,
                    reason: "TYPE line needs a name and a type".to_string(),
                });
            };
            let kind: MetricKind = kind.parse()?;
            families
                .entry(name.to_string())
                .and_modify(|f| f.kind = kind)
                .or_insert_with(|| MetricFamily::new(name, kind));
            continue;
        }

        let sample = parse_sample(line).map_err(|reason| DecodeError::Malformed {
            line: line_no,
            reason,
        })?;
        let family = family_name(&families, &sample.name).to_string();
        families
            .entry(family.clone())
            .or_insert_with(|| MetricFamily::new(&family, MetricKind::Untyped))
            .samples
            .push(sample);
    }

    Ok(families)
}

fn family_name<'a>(families: &MetricFamilies, sample: &'a str) -> &'a str {
    if families.contains_key(sample) {
        return sample;
    }
    for suffix in ["_bucket", "_sum", "_count"] {
        let Some(base) = sample.strip_suffix(suffix) else {
            continue;
        };
        let grouped = families
            .get(base)
            .is_some_and(|f| matches!(f.kind, MetricKind::Histogram | MetricKind::Summary));
        if grouped {
            return base;
        }
    }
    sample
}

fn parse_sample(line: &str) -> Result<Sample, String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "sample has no value".to_string())?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("sample has no name".to_string());
    }

    let mut rest = &line[name_end..];
    let mut labels = BTreeMap::new();
    if let Some(body) = rest.strip_prefix('{') {
        let consumed = parse_labels(body, &mut labels)?;
        rest = &body[consumed..];
    }

    let mut fields = rest.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| format!("sample {name} has no value"))?;
    let value: f64 = value
        .parse()
        .map_err(|_| format!("sample {name} has invalid value {value:?}"))?;
    // an optional timestamp may follow; it is not used

    Ok(Sample {
        name: name.to_string(),
        labels,
        value,
    })
}

/// Parses `k="v",...}` and returns the bytes consumed including the closing brace
fn parse_labels(body: &str, labels: &mut BTreeMap<String, String>) -> Result<usize, String> {
    let bytes = body.as_bytes();
    let mut pos = 0;
    loop {
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos].is_ascii_whitespace()) {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err("unterminated label set".to_string());
        }
        if bytes[pos] == b'}' {
            return Ok(pos + 1);
        }

        let key_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' {
            pos += 1;
        }
        if pos >= bytes.len() {
            return Err("label without value".to_string());
        }
        let key = body[key_start..pos].trim().to_string();
        pos += 1;
        if bytes.get(pos) != Some(&b'"') {
            return Err(format!("label {key} value must be quoted"));
        }
        pos += 1;

        let mut value = String::new();
        loop {
            let Some(&b) = bytes.get(pos) else {
                return Err(format!("unterminated value for label {key}"));
            };
            match b {
                b'"' => {
                    pos += 1;
                    break;
                }
                b'\\' => {
                    match bytes.get(pos + 1) {
                        Some(b'n') => value.push('\n'),
                        Some(b'"') => value.push('"'),
                        Some(b'\\') => value.push('\\'),
                        _ => return Err(format!("bad escape in label {key}")),
                    }
                    pos += 2;
                }
                _ => {
                    // copy one UTF-8 char; label values are not restricted to ASCII
                    let ch = body[pos..].chars().next().unwrap_or_default();
                    value.push(ch);
                    pos += ch.len_utf8().max(1);
                }
            }
        }
        labels.insert(key, value);
    }
}

/// The single value of an unlabeled counter or gauge
pub fn parse_metric_with_no_label(
    families: &MetricFamilies,
    name: &str,
) -> Result<f64, MetricError> {
    let family = families
        .get(name)
        .ok_or_else(|| MetricError::NotFound(name.to_string()))?;
    let sample = match family.samples.as_slice() {
        [] => return Err(MetricError::NoValue(name.to_string())),
        [sample] => sample,
        _ => return Err(MetricError::MultipleValues(name.to_string())),
    };
    match family.kind {
        MetricKind::Counter | MetricKind::Gauge => Ok(sample.value),
        kind => Err(MetricError::UnsupportedKind {
            name: name.to_string(),
            kind,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const LLAMACPP: &str = r#"
# HELP llamacpp:kv_cache_usage_ratio KV-cache usage. 1 means 100 percent usage.
# TYPE llamacpp:kv_cache_usage_ratio gauge
llamacpp:kv_cache_usage_ratio 0.25
# HELP llamacpp:requests_processing Number of request processing.
# TYPE llamacpp:requests_processing gauge
llamacpp:requests_processing 3
# TYPE llamacpp:requests_deferred gauge
llamacpp:requests_deferred 1 1712000000000
# TYPE llamacpp:prompt_tokens_total counter
llamacpp:prompt_tokens_total 1234
"#;

    #[test]
    fn test_decode_gauges_and_counters() {
        let families = decode(LLAMACPP).unwrap();
        assert_eq!(families.len(), 4);

        let kv = &families["llamacpp:kv_cache_usage_ratio"];
        assert_eq!(kv.kind, MetricKind::Gauge);
        assert_eq!(kv.samples[0].value, 0.25);

        assert_eq!(
            parse_metric_with_no_label(&families, "llamacpp:requests_deferred").unwrap(),
            1.0
        );
        assert_eq!(
            parse_metric_with_no_label(&families, "llamacpp:prompt_tokens_total").unwrap(),
            1234.0
        );
    }

    #[test]
    fn test_decode_infinite_value() {
        let families = decode("# TYPE max_wait gauge\nmax_wait +Inf\n").unwrap();
        let value = parse_metric_with_no_label(&families, "max_wait").unwrap();
        assert!(value.is_infinite() && value.is_sign_positive());
    }

    #[test]
    fn test_decode_histogram_groups_suffixes() {
        let text = r#"
# TYPE request_latency_seconds histogram
request_latency_seconds_bucket{le="0.5"} 3
request_latency_seconds_bucket{le="+Inf"} 4
request_latency_seconds_sum 1.7
request_latency_seconds_count 4
# TYPE other_count gauge
other_count 2
"#;
        let families = decode(text).unwrap();
        assert_eq!(families.len(), 2);
        let histogram = &families["request_latency_seconds"];
        assert_eq!(histogram.kind, MetricKind::Histogram);
        assert_eq!(histogram.samples.len(), 4);
        assert_eq!(histogram.samples[1].labels["le"], "+Inf");
        assert_eq!(histogram.samples[1].value, 4.0);

        // a declared family wins over suffix grouping
        assert_eq!(families["other_count"].samples.len(), 1);

        assert_matches!(
            parse_metric_with_no_label(&families, "request_latency_seconds"),
            Err(MetricError::MultipleValues(_))
        );
    }

    #[test]
    fn test_decode_labels_with_escapes() {
        let text = r#"http_requests_total{method="post",path="/v1/a\"b",note="x\ny"} 7"#;
        let families = decode(text).unwrap();
        let family = &families["http_requests_total"];
        assert_eq!(family.kind, MetricKind::Untyped);
        let labels = &family.samples[0].labels;
        assert_eq!(labels["method"], "post");
        assert_eq!(labels["path"], "/v1/a\"b");
        assert_eq!(labels["note"], "x\ny");
        assert_eq!(family.samples[0].value, 7.0);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_matches!(decode("no_value"), Err(DecodeError::Malformed { line: 1, .. }));
        assert_matches!(decode("m{a=\"1\" 2"), Err(DecodeError::Malformed { .. }));
        assert_matches!(decode("m abc"), Err(DecodeError::Malformed { .. }));
        assert_matches!(
            decode("# TYPE m gaugeish"),
            Err(DecodeError::UnknownKind(k)) if k == "gaugeish"
        );
    }

    #[test]
    fn test_parse_metric_errors() {
        let text = "# TYPE empty gauge\n# TYPE free untyped\nfree 1\n";
        let families = decode(text).unwrap();
        assert_matches!(
            parse_metric_with_no_label(&families, "missing"),
            Err(MetricError::NotFound(n)) if n == "missing"
        );
        assert_matches!(
            parse_metric_with_no_label(&families, "empty"),
            Err(MetricError::NoValue(_))
        );
        assert_matches!(
            parse_metric_with_no_label(&families, "free"),
            Err(MetricError::UnsupportedKind { kind: MetricKind::Untyped, .. })
        );
    }
}
