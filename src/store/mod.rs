pub mod queries;
pub mod sqlite;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub const ID_FIELD: &str = "$id";

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn into_value(self) -> Value {
        let mut fields = self.fields;
        fields.insert(ID_FIELD.to_string(), Value::String(self.id));
        Value::Object(fields)
    }

    pub fn decode<T: DeserializeOwned>(self) -> Result<T, RemoteError> {
        let id = self.id.clone();
        serde_json::from_value(self.into_value()).map_err(|error| RemoteError::Decode {
            id,
            message: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Equal { field: String, value: Value },
    GreaterThanEqual { field: String, value: Value },
}

impl Filter {
    pub fn equal(field: &str, value: impl Into<Value>) -> Self {
        Self::Equal {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn greater_than_equal(field: &str, value: impl Into<Value>) -> Self {
        Self::GreaterThanEqual {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Equal { field, .. } | Self::GreaterThanEqual { field, .. } => field,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Self::Equal { value, .. } | Self::GreaterThanEqual { value, .. } => value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeNotice {
    pub channel: String,
    pub events: Vec<String>,
    pub document_id: String,
}

impl ChangeNotice {
    pub fn new(channel: &str, document_id: &str, kind: ChangeKind) -> Self {
        Self {
            channel: channel.to_string(),
            events: vec![event_name(channel, document_id, kind)],
            document_id: document_id.to_string(),
        }
    }
}

pub fn collection_channel(database_id: &str, collection: &str) -> String {
    format!("databases.{database_id}.collections.{collection}.documents")
}

pub fn event_name(channel: &str, document_id: &str, kind: ChangeKind) -> String {
    format!("{channel}.{document_id}.{}", kind.as_str())
}

pub fn parse_channel(channel: &str) -> Option<(&str, &str)> {
    let rest = channel.strip_prefix("databases.")?;
    let rest = rest.strip_suffix(".documents")?;
    let (database_id, collection) = rest.split_once(".collections.")?;

    (!database_id.is_empty() && !collection.is_empty() && !collection.contains('.'))
        .then_some((database_id, collection))
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Notice(ChangeNotice),
    Lagged(u64),
}

// Dropping the handle unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<ChangeNotice>,
}

impl Subscription {
    pub fn new(channel: &str, receiver: broadcast::Receiver<ChangeNotice>) -> Self {
        Self {
            channel: channel.to_string(),
            receiver,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn next(&mut self) -> Option<FeedMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(notice) if notice.channel == self.channel => {
                    return Some(FeedMessage::Notice(notice));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(FeedMessage::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("failed to decode document {id}: {message}")]
    Decode { id: String, message: String },
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("unknown change feed channel: {0}")]
    UnknownChannel(String),
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query(&self, collection: &str, filters: &[Filter])
    -> Result<Vec<Document>, RemoteError>;

    async fn create(
        &self,
        collection: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, RemoteError>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, RemoteError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    async fn subscribe(&self, channel: &str) -> Result<Subscription, SubscriptionError>;
}
