//! Best-effort duplicate resolution against the server asset index.

use super::models::{DuplicateCandidate, MatchBasis};
use crate::asset_store::{Asset, UsageLocation};
use crate::server::messages::{
    DuplicateCheckRequest, DuplicateCheckResponse, UsageAttachResponse, UsageRequest,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default timeout for index queries. Duplicate detection is a nice-to-have;
/// a slow index must not stall the upload.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(3);

/// Client view of the server-side asset index.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait AssetIndex: Send + Sync {
    /// Look up an asset by exact content digest.
    async fn find_by_digest(&self, digest: &str)
        -> Result<Option<(Asset, Vec<UsageLocation>)>>;

    /// Look up an asset by exact original filename.
    async fn find_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<(Asset, Vec<UsageLocation>)>>;

    /// Attach a usage location to an existing asset (the "reuse" path).
    async fn attach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<i64>;
}

/// What to resolve by: the authoritative digest, or the filename heuristic
/// when fingerprinting was indeterminate.
#[derive(Debug, Clone)]
pub enum DuplicateQuery {
    Digest(String),
    Filename(String),
}

/// Resolves duplicates against an asset index, degrading to "no match" on
/// any failure.
pub struct DuplicateResolver {
    index: Arc<dyn AssetIndex>,
    timeout: Duration,
}

impl DuplicateResolver {
    pub fn new(index: Arc<dyn AssetIndex>) -> Self {
        Self {
            index,
            timeout: DEFAULT_RESOLVE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve a query to a candidate, or None.
    ///
    /// Index failures and timeouts are logged and treated as "no match":
    /// the pipeline proceeds to an ordinary upload.
    pub async fn resolve(&self, query: &DuplicateQuery) -> Option<DuplicateCandidate> {
        let lookup = async {
            match query {
                DuplicateQuery::Digest(digest) => self
                    .index
                    .find_by_digest(digest)
                    .await
                    .map(|hit| (hit, MatchBasis::Fingerprint)),
                DuplicateQuery::Filename(filename) => self
                    .index
                    .find_by_filename(filename)
                    .await
                    .map(|hit| (hit, MatchBasis::Filename)),
            }
        };

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok((Some((asset, locations)), basis))) => {
                debug!(
                    "Duplicate candidate {} matched by {:?} ({} usages)",
                    asset.id,
                    basis,
                    locations.len()
                );
                Some(DuplicateCandidate {
                    asset,
                    locations,
                    basis,
                })
            }
            Ok(Ok((None, _))) => None,
            Ok(Err(e)) => {
                warn!("Duplicate check failed, continuing without: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Duplicate check timed out after {:?}, continuing without",
                    self.timeout
                );
                None
            }
        }
    }
}

/// HTTP implementation of the asset index, backed by the media server.
pub struct HttpAssetIndex {
    base_url: String,
    client: reqwest::Client,
}

impl HttpAssetIndex {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    async fn check(
        &self,
        body: DuplicateCheckRequest,
    ) -> Result<Option<(Asset, Vec<UsageLocation>)>> {
        let response = self
            .client
            .post(format!("{}/v1/media/duplicates/check", self.base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<DuplicateCheckResponse>()
            .await?;

        Ok(match (response.exists, response.media) {
            (true, Some(media)) => Some((media, response.locations)),
            _ => None,
        })
    }
}

#[async_trait]
impl AssetIndex for HttpAssetIndex {
    async fn find_by_digest(
        &self,
        digest: &str,
    ) -> Result<Option<(Asset, Vec<UsageLocation>)>> {
        self.check(DuplicateCheckRequest {
            hash: Some(digest.to_string()),
            original_name: None,
        })
        .await
    }

    async fn find_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<(Asset, Vec<UsageLocation>)>> {
        self.check(DuplicateCheckRequest {
            hash: None,
            original_name: Some(filename.to_string()),
        })
        .await
    }

    async fn attach_usage(&self, asset_id: &str, location: &UsageLocation) -> Result<i64> {
        let response = self
            .client
            .post(format!("{}/v1/media/{}/usage", self.base_url, asset_id))
            .json(&UsageRequest::from(location))
            .send()
            .await?
            .error_for_status()?
            .json::<UsageAttachResponse>()
            .await?;
        Ok(response.usage_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset_store::MediaKind;

    struct StaticIndex {
        by_digest: Option<Asset>,
        by_filename: Option<Asset>,
        fail: bool,
    }

    #[async_trait]
    impl AssetIndex for StaticIndex {
        async fn find_by_digest(
            &self,
            _digest: &str,
        ) -> Result<Option<(Asset, Vec<UsageLocation>)>> {
            if self.fail {
                anyhow::bail!("index unavailable");
            }
            Ok(self.by_digest.clone().map(|a| (a, vec![])))
        }

        async fn find_by_filename(
            &self,
            _filename: &str,
        ) -> Result<Option<(Asset, Vec<UsageLocation>)>> {
            if self.fail {
                anyhow::bail!("index unavailable");
            }
            Ok(self.by_filename.clone().map(|a| (a, vec![])))
        }

        async fn attach_usage(&self, _asset_id: &str, _location: &UsageLocation) -> Result<i64> {
            Ok(1)
        }
    }

    fn asset(id: &str) -> Asset {
        Asset::new(id, "/url", MediaKind::Image, 10, "a.jpg", None)
    }

    #[tokio::test]
    async fn test_digest_match_is_authoritative() {
        let resolver = DuplicateResolver::new(Arc::new(StaticIndex {
            by_digest: Some(asset("a1")),
            by_filename: None,
            fail: false,
        }));

        let candidate = resolver
            .resolve(&DuplicateQuery::Digest("abc".into()))
            .await
            .unwrap();
        assert_eq!(candidate.asset.id, "a1");
        assert_eq!(candidate.basis, MatchBasis::Fingerprint);
        assert!(!candidate.requires_confirmation());
    }

    #[tokio::test]
    async fn test_filename_match_requires_confirmation() {
        let resolver = DuplicateResolver::new(Arc::new(StaticIndex {
            by_digest: None,
            by_filename: Some(asset("a2")),
            fail: false,
        }));

        let candidate = resolver
            .resolve(&DuplicateQuery::Filename("a.jpg".into()))
            .await
            .unwrap();
        assert_eq!(candidate.basis, MatchBasis::Filename);
        assert!(candidate.requires_confirmation());
    }

    #[tokio::test]
    async fn test_no_match() {
        let resolver = DuplicateResolver::new(Arc::new(StaticIndex {
            by_digest: None,
            by_filename: None,
            fail: false,
        }));
        assert!(resolver
            .resolve(&DuplicateQuery::Digest("abc".into()))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_index_failure_degrades_to_none() {
        let resolver = DuplicateResolver::new(Arc::new(StaticIndex {
            by_digest: Some(asset("a1")),
            by_filename: None,
            fail: true,
        }));
        assert!(resolver
            .resolve(&DuplicateQuery::Digest("abc".into()))
            .await
            .is_none());
    }
}
