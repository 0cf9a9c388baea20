//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all media-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // ========================================================================
    // Uploads
    // ========================================================================

    /// Small-tier multipart upload with just a file field
    pub async fn upload(&self, filename: &str, data: Vec<u8>) -> Response {
        self.upload_with_kind(filename, data, None).await
    }

    /// Small-tier multipart upload with an explicit kind
    pub async fn upload_with_kind(
        &self,
        filename: &str,
        data: Vec<u8>,
        kind: Option<&str>,
    ) -> Response {
        let mut form = Form::new().part(
            "file",
            Part::bytes(data).file_name(filename.to_string()),
        );
        if let Some(kind) = kind {
            form = form.text("kind", kind.to_string());
        }

        self.client
            .post(self.url("/v1/media/upload"))
            .multipart(form)
            .send()
            .await
            .expect("upload request failed")
    }

    /// Start a chunked upload session
    pub async fn start_session(
        &self,
        filename: &str,
        total_size: u64,
        chunk_size: u64,
    ) -> Response {
        let total_chunks = total_size.div_ceil(chunk_size);
        self.client
            .post(self.url("/v1/media/upload/sessions"))
            .json(&json!({
                "filename": filename,
                "total_size": total_size,
                "total_chunks": total_chunks,
                "chunk_size": chunk_size,
            }))
            .send()
            .await
            .expect("start session request failed")
    }

    /// Abort a chunked upload session
    pub async fn abort_session(&self, session_id: &str) -> Response {
        self.client
            .delete(self.url(&format!("/v1/media/upload/sessions/{}", session_id)))
            .send()
            .await
            .expect("abort session request failed")
    }

    /// Send one chunk of a session
    pub async fn send_chunk(&self, session_id: &str, index: u64, data: Vec<u8>) -> Response {
        self.client
            .post(self.url(&format!(
                "/v1/media/upload/sessions/{}/chunks/{}",
                session_id, index
            )))
            .body(data)
            .send()
            .await
            .expect("chunk request failed")
    }

    // ========================================================================
    // Duplicate Check
    // ========================================================================

    pub async fn check_duplicate_hash(&self, hash: &str) -> Response {
        self.client
            .post(self.url("/v1/media/duplicates/check"))
            .json(&json!({ "hash": hash }))
            .send()
            .await
            .expect("duplicate check request failed")
    }

    pub async fn check_duplicate_name(&self, original_name: &str) -> Response {
        self.client
            .post(self.url("/v1/media/duplicates/check"))
            .json(&json!({ "original_name": original_name }))
            .send()
            .await
            .expect("duplicate check request failed")
    }

    // ========================================================================
    // Usage Ledger
    // ========================================================================

    pub async fn attach_usage(
        &self,
        asset_id: &str,
        property_id: &str,
        zone_id: &str,
        step_id: &str,
    ) -> Response {
        self.client
            .post(self.url(&format!("/v1/media/{}/usage", asset_id)))
            .json(&json!({
                "property_id": property_id,
                "zone_id": zone_id,
                "step_id": step_id,
            }))
            .send()
            .await
            .expect("attach usage request failed")
    }

    pub async fn detach_usage(
        &self,
        asset_id: &str,
        property_id: &str,
        zone_id: &str,
        step_id: &str,
    ) -> Response {
        self.client
            .delete(self.url(&format!("/v1/media/{}/usage", asset_id)))
            .json(&json!({
                "property_id": property_id,
                "zone_id": zone_id,
                "step_id": step_id,
            }))
            .send()
            .await
            .expect("detach usage request failed")
    }

    pub async fn check_usage(&self, media_ids: &[&str]) -> Response {
        self.client
            .post(self.url("/v1/media/usage/check"))
            .json(&json!({ "media_ids": media_ids }))
            .send()
            .await
            .expect("usage check request failed")
    }

    // ========================================================================
    // Assets
    // ========================================================================

    pub async fn get_media(&self, asset_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/media/{}", asset_id)))
            .send()
            .await
            .expect("get media request failed")
    }

    pub async fn get_media_file(&self, asset_id: &str) -> Response {
        self.client
            .get(self.url(&format!("/v1/media/{}/file", asset_id)))
            .send()
            .await
            .expect("get media file request failed")
    }

    pub async fn delete_media(&self, asset_id: &str) -> Response {
        self.client
            .delete(self.url(&format!("/v1/media/{}", asset_id)))
            .send()
            .await
            .expect("delete media request failed")
    }

    pub async fn list_media(&self) -> Response {
        self.client
            .get(self.url("/v1/media"))
            .send()
            .await
            .expect("list media request failed")
    }
}
