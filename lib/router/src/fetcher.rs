// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::backend::{BackendRegistry, UnsupportedBackend, indicator_from};
use crate::metrics::{DecodeError, MetricError, MetricFamilies, decode};
use crate::store::Indicator;

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("failed to scrape {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("scrape of {url} returned {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decode metrics from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: DecodeError,
    },

    #[error("no metrics found at {0}")]
    NoMetrics(String),

    #[error(transparent)]
    UnsupportedBackend(#[from] UnsupportedBackend),

    #[error(transparent)]
    Metric(#[from] MetricError),
}

/// Something that turns a replica endpoint into its current load
#[async_trait]
pub trait Scrape: Send + Sync {
    async fn scrape(&self, endpoint: &str) -> Result<Indicator, FetchError>;
}

/// `/metrics` scraper over HTTP
#[derive(Debug, Clone)]
pub struct MetricsFetcher {
    client: reqwest::Client,
    backends: Arc<BackendRegistry>,
}

impl MetricsFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::with_backends(timeout, BackendRegistry::default())
    }

    pub fn with_backends(timeout: Duration, backends: BackendRegistry) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backends: Arc::new(backends),
        })
    }

    pub fn metrics_url(endpoint: &str) -> String {
        format!("{}/metrics", endpoint.trim_end_matches('/'))
    }

    pub async fn fetch(&self, endpoint: &str) -> Result<MetricFamilies, FetchError> {
        let url = Self::metrics_url(endpoint);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Http {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        let body = response.text().await.map_err(|source| FetchError::Http {
            url: url.clone(),
            source,
        })?;

        let families = decode(&body).map_err(|source| FetchError::Decode {
            url: url.clone(),
            source,
        })?;
        if families.is_empty() {
            return Err(FetchError::NoMetrics(url));
        }
        Ok(families)
    }

    pub async fn query(&self, endpoint: &str) -> Result<Indicator, FetchError> {
        let families = self.fetch(endpoint).await?;
        let backend = self.backends.detect_backend(&families)?;
        Ok(indicator_from(&families, backend)?)
    }
}

#[async_trait]
impl Scrape for MetricsFetcher {
    async fn scrape(&self, endpoint: &str) -> Result<Indicator, FetchError> {
        self.query(endpoint).await
    }
}
