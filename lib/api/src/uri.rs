// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Model URIs of the form `<protocol>://<address>`.
//!
//! | protocol | address |
//! |---|---|
//! | `oss` | `<bucket>.<endpoint>/<path>` |
//! | `s3`, `gcs` | `<bucket>/<path>` |
//! | `host` | absolute path on the node |
//! | `ollama` | ollama model name |

use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum UriError {
    #[error("uri format error: {0}")]
    Format(String),

    #[error("unsupported protocol {0}")]
    UnsupportedProtocol(String),

    #[error("address not right {0}")]
    Address(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Oss,
    S3,
    Gcs,
    Ollama,
    Host,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Oss => "OSS",
            Protocol::S3 => "S3",
            Protocol::Gcs => "GCS",
            Protocol::Ollama => "OLLAMA",
            Protocol::Host => "HOST",
        }
    }

    /// Object stores download through the model-loader init container
    pub fn is_object_store(&self) -> bool {
        matches!(self, Protocol::Oss | Protocol::S3 | Protocol::Gcs)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OSS" => Ok(Protocol::Oss),
            "S3" => Ok(Protocol::S3),
            "GCS" => Ok(Protocol::Gcs),
            "OLLAMA" => Ok(Protocol::Ollama),
            "HOST" => Ok(Protocol::Host),
            other => Err(UriError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Split `uri` into its upper-cased protocol and the address
pub fn parse_uri(uri: &str) -> Result<(String, &str), UriError> {
    let mut parts = uri.split("://");
    match (parts.next(), parts.next(), parts.next()) {
        (Some(protocol), Some(address), None) => Ok((protocol.to_ascii_uppercase(), address)),
        _ => Err(UriError::Format(uri.to_string())),
    }
}

/// `<bucket>.<endpoint>/<path>` into `(endpoint, bucket, path)`
pub fn parse_oss(address: &str) -> Result<(&str, &str, &str), UriError> {
    let (bucket, rest) = address
        .split_once('.')
        .ok_or_else(|| UriError::Address(address.to_string()))?;
    let (endpoint, path) = rest
        .split_once('/')
        .ok_or_else(|| UriError::Address(address.to_string()))?;
    Ok((endpoint, bucket, path))
}

/// `<bucket>/<path>` into `(bucket, path)`
pub fn parse_s3(address: &str) -> Result<(&str, &str), UriError> {
    address
        .split_once('/')
        .ok_or_else(|| UriError::Address(address.to_string()))
}

/// A fully decoded model URI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelUri {
    pub protocol: Protocol,
    pub raw: String,
    pub bucket: Option<String>,
    pub endpoint: Option<String>,
    /// Object key for object stores, the node path for `host`, the model name for `ollama`
    pub path: String,
}

impl FromStr for ModelUri {
    type Err = UriError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (protocol, address) = parse_uri(raw)?;
        let protocol: Protocol = protocol.parse()?;
        let mut uri = ModelUri {
            protocol,
            raw: raw.to_string(),
            bucket: None,
            endpoint: None,
            path: String::new(),
        };
        match protocol {
            Protocol::Oss => {
                let (endpoint, bucket, path) = parse_oss(address)?;
                uri.endpoint = Some(endpoint.to_string());
                uri.bucket = Some(bucket.to_string());
                uri.path = path.to_string();
            }
            Protocol::S3 | Protocol::Gcs => {
                let (bucket, path) = parse_s3(address)?;
                uri.bucket = Some(bucket.to_string());
                uri.path = path.to_string();
            }
            Protocol::Host | Protocol::Ollama => uri.path = address.to_string(),
        }
        Ok(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case("bucket.endpoint/model/to/path", Some(("endpoint", "bucket", "model/to/path")))]
    #[case("endpoint/model/to/path", None)]
    #[case("bucket.endpoint", None)]
    fn test_parse_oss(#[case] address: &str, #[case] expected: Option<(&str, &str, &str)>) {
        assert_eq!(parse_oss(address).ok(), expected);
    }

    #[rstest]
    #[case("bucket/model/path", Some(("bucket", "model/path")))]
    #[case("bucket", None)]
    fn test_parse_s3(#[case] address: &str, #[case] expected: Option<(&str, &str)>) {
        assert_eq!(parse_s3(address).ok(), expected);
    }

    #[test]
    fn test_parse_uri_uppercases_protocol() {
        assert_eq!(
            parse_uri("oss://bucket.endpoint/m").unwrap(),
            ("OSS".to_string(), "bucket.endpoint/m")
        );
        assert_matches!(parse_uri("no-protocol"), Err(UriError::Format(_)));
        assert_matches!(parse_uri("a://b://c"), Err(UriError::Format(_)));
    }

    #[test]
    fn test_model_uri() {
        let uri: ModelUri = "s3://bucket/path/to/qwen.gguf".parse().unwrap();
        assert_eq!(uri.protocol, Protocol::S3);
        assert_eq!(uri.bucket.as_deref(), Some("bucket"));
        assert_eq!(uri.path, "path/to/qwen.gguf");

        let uri: ModelUri = "host:///models/opt".parse().unwrap();
        assert_eq!(uri.protocol, Protocol::Host);
        assert_eq!(uri.path, "/models/opt");

        assert_matches!(
            "ftp://x/y".parse::<ModelUri>(),
            Err(UriError::UnsupportedProtocol(p)) if p == "FTP"
        );
    }
}
