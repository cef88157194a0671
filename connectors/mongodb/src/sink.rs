use crate::config::MongoSinkConfig;
use async_trait::async_trait;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::error::{ErrorKind, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use ratingsync_core::{
    connector::{ConnectorConfig, DocumentBatch, DocumentSink},
    Error, Result,
};
use std::time::Duration;
use tracing::{error, info, warn};

/// Document sink inserting each batch into one MongoDB collection.
///
/// With `transactional` set, a batch is inserted inside a session transaction
/// and either commits whole or not at all. Without it, the insert is ordered
/// and a failure deletes whatever part of the batch got in, by the `_id`s
/// assigned before sending.
pub struct MongoSink {
    config: MongoSinkConfig,
    timeout: Duration,
    client: Option<Client>,
}

impl MongoSink {
    pub fn new(config: ConnectorConfig, timeout: Duration) -> Result<Self> {
        let config = MongoSinkConfig::from_json(config.properties_json())?;
        Ok(Self::with_config(config, timeout))
    }

    pub fn with_config(config: MongoSinkConfig, timeout: Duration) -> Self {
        Self {
            config,
            timeout,
            client: None,
        }
    }

    fn collection(&self, client: &Client) -> Collection<Document> {
        client
            .database(&self.config.database)
            .collection(&self.config.collection)
    }

    async fn open(&self) -> mongodb::error::Result<Client> {
        let mut options = ClientOptions::parse(&self.config.url).await?;
        options.app_name = Some("ratingsync".to_string());
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);
        let client = Client::with_options(options)?;
        client
            .database(&self.config.database)
            .run_command(doc! { "ping": 1 })
            .await?;
        Ok(client)
    }

    async fn insert_in_transaction(
        &self,
        client: &Client,
        documents: Vec<Document>,
    ) -> mongodb::error::Result<u64> {
        let collection = self.collection(client);
        let mut session = client.start_session().await?;
        session.start_transaction().await?;
        // an error drops the session, which aborts the open transaction
        let result = collection
            .insert_many(documents)
            .session(&mut session)
            .await?;
        session.commit_transaction().await?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn insert_compensated(
        &self,
        client: &Client,
        ids: Vec<ObjectId>,
        documents: Vec<Document>,
    ) -> Result<u64> {
        let collection = self.collection(client);
        let outcome = tokio::time::timeout(
            self.timeout,
            collection.insert_many(documents).ordered(true),
        )
        .await;

        let err = match outcome {
            Ok(Ok(result)) => return Ok(result.inserted_ids.len() as u64),
            Ok(Err(e)) => classify(e),
            Err(_) => timed_out(self.timeout),
        };

        let ids: Vec<Bson> = ids.into_iter().map(Bson::ObjectId).collect();
        let cleanup = tokio::time::timeout(
            self.timeout,
            collection.delete_many(doc! { "_id": { "$in": ids } }),
        )
        .await;
        match cleanup {
            Ok(Ok(result)) if result.deleted_count > 0 => warn!(
                removed = result.deleted_count,
                "Removed partially inserted batch"
            ),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(
                error = %e,
                "Could not remove partially inserted batch; reconcile by batch_digest"
            ),
            Err(_) => error!("Removing partially inserted batch timed out; reconcile by batch_digest"),
        }
        Err(err)
    }
}

/// Adds a preassigned `_id` and the batch digest to every document.
fn to_documents(batch: &DocumentBatch) -> Result<(Vec<ObjectId>, Vec<Document>)> {
    let mut ids = Vec::with_capacity(batch.documents.len());
    let mut documents = Vec::with_capacity(batch.documents.len());
    for value in &batch.documents {
        let mut document = mongodb::bson::to_document(value)
            .map_err(|e| Error::LoadRejected(format!("Document is not a BSON object: {}", e)))?;
        let id = ObjectId::new();
        document.insert("_id", id);
        document.insert("batch_digest", batch.digest.as_str());
        ids.push(id);
        documents.push(document);
    }
    Ok((ids, documents))
}

/// Failing to reach a server, or a transaction the server marks as safe to
/// retry, means the store was unavailable. Anything else is a refusal.
fn classify(err: mongodb::error::Error) -> Error {
    match err.kind.as_ref() {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. } => Error::LoadUnavailable(err.to_string()),
        _ if err.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
            Error::LoadUnavailable(err.to_string())
        }
        _ => Error::LoadRejected(err.to_string()),
    }
}

fn timed_out(timeout: Duration) -> Error {
    Error::LoadUnavailable(format!("insert did not finish within {:?}", timeout))
}

#[async_trait]
impl DocumentSink for MongoSink {
    async fn connect(&mut self) -> Result<()> {
        info!(
            database = %self.config.database,
            collection = %self.config.collection,
            transactional = self.config.transactional,
            "Connecting to MongoDB document store"
        );

        let client = self.open().await.map_err(|e| {
            let err = Error::LoadUnavailable(format!("Failed to connect to MongoDB: {}", e));
            error!("{}", err);
            err
        })?;

        self.client = Some(client);
        Ok(())
    }

    async fn write_batch(&mut self, batch: &DocumentBatch) -> Result<u64> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::LoadUnavailable("Not connected".into()))?;
        if batch.documents.is_empty() {
            return Ok(0);
        }
        let (ids, documents) = to_documents(batch)?;

        if !self.config.transactional {
            return self.insert_compensated(client, ids, documents).await;
        }
        match tokio::time::timeout(self.timeout, self.insert_in_transaction(client, documents))
            .await
        {
            Ok(Ok(inserted)) => Ok(inserted),
            Ok(Err(e)) => Err(classify(e)),
            Err(_) => Err(timed_out(self.timeout)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            info!("Closing MongoDB connection");
            client.shutdown().await;
        }
        Ok(())
    }
}
