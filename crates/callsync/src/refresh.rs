//! Signed URL refresh for recordings that are already stored

use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument};

use crate::db::CallTable;
use crate::error::StoreError;
use crate::models::storage_path_for;
use crate::storage::{ObjectStore, StorageError};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("no stored recording at '{0}'")]
    NotStored(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("could not update call row: {0}")]
    Table(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedUrl {
    pub call_id: String,
    pub signed_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Re-sign `{call_id}.mp3` and write the new URL onto the call row
#[instrument(skip(store, table))]
pub async fn refresh_signed_url(
    store: &dyn ObjectStore,
    table: &dyn CallTable,
    call_id: &str,
    expiry: Duration,
) -> Result<RefreshedUrl, RefreshError> {
    let key = storage_path_for(call_id);
    if !store.exists(&key).await? {
        return Err(RefreshError::NotStored(key));
    }

    let signed_url = store.sign(&key, expiry).await?;
    let expires_at = Utc::now() + chrono::Duration::seconds(expiry.as_secs() as i64);
    table
        .update_signed_url(call_id, &signed_url, expires_at)
        .await?;

    info!(call_id, %expires_at, "Signed URL refreshed");
    Ok(RefreshedUrl {
        call_id: call_id.to_string(),
        signed_url,
        expires_at,
    })
}
