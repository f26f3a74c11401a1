//! HTTP client the gateway uses to read purchases through the ledger API
use event_schema::PurchaseRecord;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum LedgerClientError {
    #[error("Invalid ledger URL: {0}")]
    InvalidUrl(String),

    #[error("Ledger request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Ledger returned status {0}")]
    Status(u16),
}

#[derive(Debug, Deserialize)]
struct UserPurchasesBody {
    #[serde(default)]
    purchases: Vec<PurchaseRecord>,
}

#[derive(Clone)]
pub struct LedgerClient {
    http: Client,
    base_url: Url,
}

impl LedgerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LedgerClientError> {
        let base_url =
            Url::parse(base_url).map_err(|e| LedgerClientError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(LedgerClientError::InvalidUrl(base_url.to_string()));
        }

        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self { http, base_url })
    }

    /// `{base}/api/purchases/{user_id}` with the user id percent-encoded
    fn user_purchases_url(&self, user_id: &str) -> Result<Url, LedgerClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| LedgerClientError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["api", "purchases", user_id]);
        Ok(url)
    }

    pub async fn fetch_user_purchases(
        &self,
        user_id: &str,
    ) -> Result<Vec<PurchaseRecord>, LedgerClientError> {
        let url = self.user_purchases_url(user_id)?;
        let response = self.http.get(url).send().await?;

        if !response.status().is_success() {
            return Err(LedgerClientError::Status(response.status().as_u16()));
        }

        let body: UserPurchasesBody = response.json().await?;
        Ok(body.purchases)
    }

    /// Read-through used by the gateway: any failure degrades to an empty list
    pub async fn user_purchases_or_empty(&self, user_id: &str) -> Vec<PurchaseRecord> {
        match self.fetch_user_purchases(user_id).await {
            Ok(purchases) => {
                info!(user_id, count = purchases.len(), "Retrieved purchases from ledger API");
                purchases
            }
            Err(LedgerClientError::Status(status)) => {
                warn!(user_id, status, "Ledger API returned an error status");
                Vec::new()
            }
            Err(e) => {
                error!(user_id, error = %e, "Error fetching purchases from ledger API");
                Vec::new()
            }
        }
    }
}
