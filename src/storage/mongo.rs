//! MongoDB record store.

use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{ErrorKind, InsertManyError};
use mongodb::options::{ClientOptions, InsertManyOptions};
use mongodb::{Client, Collection, IndexModel};
use tracing::{info, warn};

use super::traits::{InsertReport, RecordStore, StorageError};
use crate::event::ErrorEvent;

/// Single-field indexes for equality lookups
const INDEXED_FIELDS: [&str; 4] = ["timestamp", "userId", "browser", "url"];

pub struct MongoRecordStore {
    client: Client,
    collection: Collection<ErrorEvent>,
}

impl MongoRecordStore {
    /// Connect to MongoDB and bind to `database.collection`.
    pub async fn connect(
        uri: &str,
        database: &str,
        collection: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| StorageError::Backend(format!("Invalid MongoDB URI: {}", e)))?;
        options.connect_timeout = Some(timeout);
        options.server_selection_timeout = Some(timeout);

        let client = Client::with_options(options)
            .map_err(|e| StorageError::Backend(format!("Failed to create MongoDB client: {}", e)))?;

        // Fail at startup rather than on the first batch
        client
            .database(database)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| StorageError::Backend(format!("MongoDB ping failed: {}", e)))?;

        info!(database, collection, "Connected to MongoDB");
        Ok(Self::new(client, database, collection))
    }

    /// Bind to a collection on an existing client.
    #[must_use]
    pub fn new(client: Client, database: &str, collection: &str) -> Self {
        let collection = client.database(database).collection(collection);
        Self { client, collection }
    }

    /// Create the equality-lookup indexes if they don't exist.
    pub async fn ensure_indexes(&self) -> Result<(), StorageError> {
        let models: Vec<IndexModel> = INDEXED_FIELDS
            .iter()
            .map(|field| IndexModel::builder().keys(doc! { *field: 1 }).build())
            .collect();

        self.collection
            .create_indexes(models)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to create indexes: {}", e)))?;

        info!(fields = ?INDEXED_FIELDS, "MongoDB indexes ensured");
        Ok(())
    }

    /// Close the underlying client.
    pub async fn shutdown(&self) {
        self.client.clone().shutdown().await;
    }
}

#[async_trait]
impl RecordStore for MongoRecordStore {
    async fn insert_many(&self, events: &[ErrorEvent]) -> Result<InsertReport, StorageError> {
        if events.is_empty() {
            return Ok(InsertReport::default());
        }

        let options = InsertManyOptions::builder().ordered(false).build();
        match self.collection.insert_many(events).with_options(options).await {
            Ok(result) => Ok(InsertReport {
                inserted: result.inserted_ids.len(),
                failed: 0,
            }),
            Err(err) => match err.kind.as_ref() {
                // Unordered insert: rejected documents don't stop the rest.
                ErrorKind::InsertMany(InsertManyError {
                    write_errors: Some(write_errors),
                    write_concern_error: None,
                    ..
                }) if !write_errors.is_empty() => {
                    let failed = write_errors.len().min(events.len());
                    for write_error in write_errors.iter().take(5) {
                        warn!(
                            index = write_error.index,
                            code = write_error.code,
                            message = %write_error.message,
                            "MongoDB rejected document"
                        );
                    }
                    Ok(InsertReport {
                        inserted: events.len() - failed,
                        failed,
                    })
                }
                _ => Err(StorageError::Backend(format!("MongoDB insert_many failed: {}", err))),
            },
        }
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.collection
            .count_documents(doc! {})
            .await
            .map_err(|e| StorageError::Backend(format!("MongoDB count failed: {}", e)))
    }
}
