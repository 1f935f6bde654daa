//! Read operations against the platform.

use serde::de::DeserializeOwned;

use tbsync_core::types::Named;
use tbsync_core::{Device, DeviceCredentials, EntityRef, Page, RuleChain, RuleChainMetadata, SessionToken};

use crate::client::{ApiClient, RequestError};

const SEARCH_PAGE_SIZE: u32 = 50;

/// Upper bound on pages walked by a single name search.
pub const MAX_SEARCH_PAGES: u32 = 100;

impl ApiClient {
    // ── Name lookups ─────────────────────────────────────────────

    /// Find the device whose name equals `name` exactly.
    pub async fn find_device_by_name(
        &self,
        token: &SessionToken,
        name: &str,
    ) -> Result<Option<Device>, RequestError> {
        self.find_by_name("/api/tenant/devices", token, name).await
    }

    /// Find the rule chain whose name equals `name` exactly.
    pub async fn find_rule_chain_by_name(
        &self,
        token: &SessionToken,
        name: &str,
    ) -> Result<Option<RuleChain>, RequestError> {
        self.find_by_name("/api/ruleChains", token, name).await
    }

    /// Text-search `listing` and return the first exact name match.
    ///
    /// Walks further pages while the platform reports more results, so an
    /// exact match is not hidden behind a page full of near matches. The walk
    /// ends at an empty page, at `totalPages`, or after `MAX_SEARCH_PAGES`.
    /// Hitting the cap is an error, never "not found".
    async fn find_by_name<T>(
        &self,
        listing: &str,
        token: &SessionToken,
        name: &str,
    ) -> Result<Option<T>, RequestError>
    where
        T: DeserializeOwned + Named,
    {
        for page_no in 0..MAX_SEARCH_PAGES {
            let path = search_path(listing, page_no, name);
            let page: Page<T> = self.get_json(&path, token).await?.unwrap_or_default();
            let last_page = !page.has_next
                || page.data.is_empty()
                || page
                    .total_pages
                    .is_some_and(|total| u64::from(page_no) + 1 >= total);

            if let Some(found) = page.into_exact_match(name) {
                return Ok(Some(found));
            }
            if last_page {
                tracing::debug!(listing, name, pages = page_no + 1, "No exact match");
                return Ok(None);
            }
        }

        tracing::warn!(listing, name, pages = MAX_SEARCH_PAGES, "Search did not terminate");
        Err(RequestError::SearchExhausted {
            listing: listing.to_string(),
            pages: MAX_SEARCH_PAGES,
        })
    }

    // ── Records ──────────────────────────────────────────────────

    /// The device's credential record, if the platform has one.
    pub async fn get_device_credentials(
        &self,
        token: &SessionToken,
        device_id: &EntityRef,
    ) -> Result<Option<DeviceCredentials>, RequestError> {
        let path = format!("/api/device/{}/credentials", device_id.id);
        self.get_json(&path, token).await
    }

    /// The full node/connection document of a rule chain.
    pub async fn get_rule_chain_metadata(
        &self,
        token: &SessionToken,
        chain_id: &EntityRef,
    ) -> Result<RuleChainMetadata, RequestError> {
        let path = format!("/api/ruleChain/{}/metadata", chain_id.id);
        Ok(self.get_json(&path, token).await?.unwrap_or_default())
    }
}

fn search_path(listing: &str, page: u32, name: &str) -> String {
    format!(
        "{listing}?pageSize={SEARCH_PAGE_SIZE}&page={page}&textSearch={}",
        urlencoding::encode(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_path_encodes_name() {
        assert_eq!(
            search_path("/api/ruleChains", 0, "Root Rule Chain"),
            "/api/ruleChains?pageSize=50&page=0&textSearch=Root%20Rule%20Chain"
        );
        assert_eq!(
            search_path("/api/tenant/devices", 2, "a&b"),
            "/api/tenant/devices?pageSize=50&page=2&textSearch=a%26b"
        );
    }
}
