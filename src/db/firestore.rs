// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Credentials (one document per user)
//! - Health records (one collection per category, keyed by record key)
//! - Sync watermarks (keyed by `{user_id}_{category}`)

use async_trait::async_trait;
use firestore::FirestoreConsistencySelector;

use super::{collections, CredentialRepo, RecordRepo};
use crate::error::AppError;
use crate::models::{Category, Credential, HealthRecord, SyncWatermark};

// Firestore limits batch/transaction writes to 500 operations.
// We use a safe limit of 400 to allow headroom.
const BATCH_SIZE: usize = 400;

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Database(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create an offline client. Every operation returns a database error.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Database("Database not connected (offline mode)".to_string()))
    }
}

#[async_trait]
impl CredentialRepo for FirestoreDb {
    async fn get_credential(&self, user_id: &str) -> Result<Option<Credential>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::CREDENTIALS)
            .obj()
            .one(user_id)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn put_credential(&self, credential: &Credential) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::CREDENTIALS)
            .document_id(&credential.user_id)
            .object(credential)
            .execute()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(())
    }

    async fn list_credentials(&self) -> Result<Vec<Credential>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .from(collections::CREDENTIALS)
            .order_by([("user_id", firestore::FirestoreQueryDirection::Ascending)])
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl RecordRepo for FirestoreDb {
    async fn get_record(
        &self,
        category: Category,
        key: &str,
    ) -> Result<Option<HealthRecord>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(category.collection())
            .obj()
            .one(key)
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Commits in transactions of at most [`BATCH_SIZE`] writes. Each chunk
    /// is atomic; a failure in a later chunk leaves earlier chunks committed,
    /// which a retry of the same batch overwrites with identical data.
    async fn commit_records(
        &self,
        category: Category,
        records: &[HealthRecord],
    ) -> Result<(), AppError> {
        let client = self.get_client()?;

        for chunk in records.chunks(BATCH_SIZE) {
            let mut transaction = client
                .begin_transaction()
                .await
                .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

            for record in chunk {
                client
                    .fluent()
                    .update()
                    .in_col(category.collection())
                    .document_id(&record.key)
                    .object(record)
                    .add_to_transaction(&mut transaction)
                    .map_err(|e| {
                        AppError::Database(format!(
                            "Failed to add {} record {} to transaction: {}",
                            category, record.key, e
                        ))
                    })?;
            }

            transaction.commit().await.map_err(|e| {
                AppError::Database(format!("Failed to commit {} records: {}", category, e))
            })?;
        }

        tracing::debug!(category = %category, count = records.len(), "Committed records");

        Ok(())
    }

    async fn count_records(&self, user_id: &str, category: Category) -> Result<usize, AppError> {
        let records: Vec<HealthRecord> = self
            .get_client()?
            .fluent()
            .select()
            .from(category.collection())
            .filter(|q| q.for_all([q.field("user_id").eq(user_id)]))
            .obj()
            .query()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;
        Ok(records.len())
    }

    async fn get_watermark(
        &self,
        user_id: &str,
        category: Category,
    ) -> Result<Option<SyncWatermark>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::SYNC_WATERMARKS)
            .obj()
            .one(&SyncWatermark::doc_id(user_id, category))
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    async fn advance_watermark(&self, watermark: &SyncWatermark) -> Result<bool, AppError> {
        let client = self.get_client()?;
        let doc_id = SyncWatermark::doc_id(&watermark.user_id, watermark.category);

        let mut transaction = client
            .begin_transaction()
            .await
            .map_err(|e| AppError::Database(format!("Failed to begin transaction: {}", e)))?;

        // Reading through the transaction makes the commit fail if another
        // writer moved the watermark after this read.
        let in_transaction = client.clone_with_consistency_selector(
            FirestoreConsistencySelector::Transaction(transaction.transaction_id().clone()),
        );
        let current: Option<SyncWatermark> = in_transaction
            .fluent()
            .select()
            .by_id_in(collections::SYNC_WATERMARKS)
            .obj()
            .one(&doc_id)
            .await
            .map_err(|e| {
                AppError::Database(format!("Failed to read watermark in transaction: {}", e))
            })?;

        if !watermark.advances(current.as_ref()) {
            let _ = transaction.rollback().await;
            return Ok(false);
        }

        client
            .fluent()
            .update()
            .in_col(collections::SYNC_WATERMARKS)
            .document_id(&doc_id)
            .object(watermark)
            .add_to_transaction(&mut transaction)
            .map_err(|e| {
                AppError::Database(format!("Failed to add watermark to transaction: {}", e))
            })?;

        transaction
            .commit()
            .await
            .map_err(|e| AppError::Database(format!("Transaction commit failed: {}", e)))?;

        Ok(true)
    }
}
