//! Write operations against the platform.
//!
//! Each function is a single POST. Retry and fallback policy belongs to the
//! reconcilers, not to this layer.

use tbsync_core::types::NewDevice;
use tbsync_core::{Device, DeviceCredentials, EntityRef, RuleChainMetadata, SessionToken};

use crate::client::{ApiClient, RequestError};

const DEVICE_PATH: &str = "/api/device";
const CREDENTIALS_PATH: &str = "/api/device/credentials";
const LEGACY_METADATA_PATH: &str = "/api/ruleChain/metadata";

impl ApiClient {
    // ── Devices ──────────────────────────────────────────────────

    /// Create a device and return the platform's record of it.
    pub async fn create_device(
        &self,
        token: &SessionToken,
        name: &str,
        kind: &str,
    ) -> Result<Device, RequestError> {
        self.post_json(DEVICE_PATH, &NewDevice { name, kind }, token)
            .await?
            .ok_or_else(|| RequestError::EmptyBody {
                path: DEVICE_PATH.to_string(),
            })
    }

    /// Create or update a device credential record.
    ///
    /// Carrying the existing record's `id` makes this an in-place update;
    /// without it the platform may add a second record.
    pub async fn save_device_credentials(
        &self,
        token: &SessionToken,
        credentials: &DeviceCredentials,
    ) -> Result<Option<DeviceCredentials>, RequestError> {
        self.post_json(CREDENTIALS_PATH, credentials, token).await
    }

    // ── Rule chains ──────────────────────────────────────────────

    /// Replace a rule chain's metadata through `/api/ruleChain/{id}/metadata`.
    pub async fn save_rule_chain_metadata(
        &self,
        token: &SessionToken,
        chain_id: &EntityRef,
        metadata: &RuleChainMetadata,
    ) -> Result<(), RequestError> {
        let path = format!("/api/ruleChain/{}/metadata", chain_id.id);
        self.request(&path, reqwest::Method::POST, Some(metadata), Some(token))
            .await?;
        Ok(())
    }

    /// Replace a rule chain's metadata through the older `/api/ruleChain/metadata`
    /// endpoint. The chain is identified by the document's own `ruleChainId`.
    pub async fn save_rule_chain_metadata_legacy(
        &self,
        token: &SessionToken,
        metadata: &RuleChainMetadata,
    ) -> Result<(), RequestError> {
        self.request(
            LEGACY_METADATA_PATH,
            reqwest::Method::POST,
            Some(metadata),
            Some(token),
        )
        .await?;
        Ok(())
    }
}
