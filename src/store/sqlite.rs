use super::queries;
use super::{
    ChangeKind, ChangeNotice, Document, DocumentStore, Filter, ID_FIELD, RemoteError,
    Subscription, SubscriptionError, collection_channel, parse_channel,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const FEED_CAPACITY: usize = 256;

// The change feed is in-process only.
pub struct SqliteStore {
    database_id: String,
    conn: Mutex<Connection>,
    feed: broadcast::Sender<ChangeNotice>,
}

impl SqliteStore {
    pub fn open(path: &Path, database_id: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        Self::with_connection(conn, database_id)
    }

    pub fn open_in_memory(database_id: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite DB")?;
        Self::with_connection(conn, database_id)
    }

    fn with_connection(conn: Connection, database_id: &str) -> Result<Self> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                conn.execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })?;

        let (feed, _) = broadcast::channel(FEED_CAPACITY);

        Ok(Self {
            database_id: database_id.to_string(),
            conn: Mutex::new(conn),
            feed,
        })
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, RemoteError> {
        self.conn
            .lock()
            .map_err(|_| RemoteError::Backend("SQLite connection lock poisoned".to_string()))
    }

    fn publish(&self, collection: &str, document_id: &str, kind: ChangeKind) {
        let channel = collection_channel(&self.database_id, collection);
        let notice = ChangeNotice::new(&channel, document_id, kind);

        // No receivers is not an error: nobody is watching this collection yet.
        if self.feed.send(notice).is_err() {
            debug!(channel = %channel, document_id, "change notice dropped without subscribers");
        }
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, RemoteError> {
        let mut sql = queries::SELECT_COLLECTION.to_string();
        let mut bound = vec![SqlValue::Text(collection.to_string())];

        for filter in filters {
            let column = if filter.field() == ID_FIELD {
                "id".to_string()
            } else {
                bound.push(SqlValue::Text(format!("$.{}", filter.field())));
                format!("json_extract(body, ?{})", bound.len())
            };
            let operator = match filter {
                Filter::Equal { .. } => "=",
                Filter::GreaterThanEqual { .. } => ">=",
            };

            bound.push(sql_value(filter.value()));
            sql.push_str(&format!(" AND {column} {operator} ?{}", bound.len()));
        }
        sql.push_str(" ORDER BY seq ASC");

        let conn = self.connection()?;
        let mut statement = conn.prepare(&sql)?;
        let rows = statement
            .query_map(params_from_iter(bound.iter()), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, body)| parse_body(id, &body))
            .collect()
    }

    async fn create(
        &self,
        collection: &str,
        mut fields: Map<String, Value>,
    ) -> Result<Document, RemoteError> {
        fields.remove(ID_FIELD);
        let id = Uuid::new_v4().simple().to_string();
        let body = encode_body(&fields)?;

        self.connection()?.execute(
            queries::INSERT_DOCUMENT,
            params![collection, &id, body, Utc::now().timestamp_millis()],
        )?;

        self.publish(collection, &id, ChangeKind::Create);
        Ok(Document { id, fields })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<Document, RemoteError> {
        let merged = {
            let conn = self.connection()?;
            let existing = conn
                .query_row(queries::SELECT_DOCUMENT, params![collection, id], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?
                .ok_or_else(|| not_found(collection, id))?;

            let mut merged = parse_body(id.to_string(), &existing)?.fields;
            merged.extend(fields.into_iter().filter(|(key, _)| key != ID_FIELD));

            conn.execute(
                queries::UPDATE_DOCUMENT,
                params![
                    collection,
                    id,
                    encode_body(&merged)?,
                    Utc::now().timestamp_millis()
                ],
            )?;
            merged
        };

        self.publish(collection, id, ChangeKind::Update);
        Ok(Document {
            id: id.to_string(),
            fields: merged,
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let deleted = self
            .connection()?
            .execute(queries::DELETE_DOCUMENT, params![collection, id])?;

        if deleted == 0 {
            return Err(not_found(collection, id));
        }

        self.publish(collection, id, ChangeKind::Delete);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, SubscriptionError> {
        match parse_channel(channel) {
            Some((database_id, _)) if database_id == self.database_id => {
                Ok(Subscription::new(channel, self.feed.subscribe()))
            }
            _ => Err(SubscriptionError::UnknownChannel(channel.to_string())),
        }
    }
}

impl From<rusqlite::Error> for RemoteError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Backend(value.to_string())
    }
}

fn not_found(collection: &str, id: &str) -> RemoteError {
    RemoteError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn encode_body(fields: &Map<String, Value>) -> Result<String, RemoteError> {
    serde_json::to_string(fields).map_err(|error| RemoteError::Backend(error.to_string()))
}

fn parse_body(id: String, body: &str) -> Result<Document, RemoteError> {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(fields)) => Ok(Document { id, fields }),
        Ok(_) => Err(RemoteError::Decode {
            id,
            message: "document body is not a JSON object".to_string(),
        }),
        Err(error) => Err(RemoteError::Decode {
            id,
            message: error.to_string(),
        }),
    }
}

fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Number(number) => number
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| number.as_f64().map(SqlValue::Real))
            .unwrap_or(SqlValue::Null),
        Value::String(text) => SqlValue::Text(text.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::SqliteStore;
    use crate::store::{
        ChangeKind, DocumentStore, FeedMessage, Filter, RemoteError, SubscriptionError,
        collection_channel,
    };
    use serde_json::{Map, Value, json};

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn query_applies_equality_and_lower_bound() {
        let store = SqliteStore::open_in_memory("main").expect("store");
        for (user, at) in [("u1", 100), ("u1", 200), ("u2", 300)] {
            store
                .create("completions", fields(json!({ "user_id": user, "completed_at": at })))
                .await
                .expect("create");
        }

        let all = store
            .query("completions", &[Filter::equal("user_id", "u1")])
            .await
            .expect("query");
        assert_eq!(all.len(), 2);

        let recent = store
            .query(
                "completions",
                &[
                    Filter::equal("user_id", "u1"),
                    Filter::greater_than_equal("completed_at", 150),
                ],
            )
            .await
            .expect("query");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].fields["completed_at"], 200);
    }

    #[tokio::test]
    async fn query_by_document_id() {
        let store = SqliteStore::open_in_memory("main").expect("store");
        let created = store
            .create("habits", fields(json!({ "title": "Read" })))
            .await
            .expect("create");
        store
            .create("habits", fields(json!({ "title": "Walk" })))
            .await
            .expect("create");

        let found = store
            .query("habits", &[Filter::equal("$id", created.id.as_str())])
            .await
            .expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].fields["title"], "Read");
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = SqliteStore::open_in_memory("main").expect("store");
        let created = store
            .create("habits", fields(json!({ "title": "Read", "streak_count": 0 })))
            .await
            .expect("create");

        let updated = store
            .update("habits", &created.id, fields(json!({ "streak_count": 1 })))
            .await
            .expect("update");

        assert_eq!(updated.fields["title"], "Read");
        assert_eq!(updated.fields["streak_count"], 1);
    }

    #[tokio::test]
    async fn missing_documents_report_not_found() {
        let store = SqliteStore::open_in_memory("main").expect("store");

        let update = store.update("habits", "nope", Map::new()).await;
        assert!(matches!(update, Err(RemoteError::NotFound { .. })));

        let delete = store.delete("habits", "nope").await;
        assert!(matches!(delete, Err(RemoteError::NotFound { .. })));
    }

    #[tokio::test]
    async fn writes_are_announced_on_the_collection_channel() {
        let store = SqliteStore::open_in_memory("main").expect("store");
        let channel = collection_channel("main", "habits");
        let mut subscription = store.subscribe(&channel).await.expect("subscribe");

        let created = store
            .create("habits", fields(json!({ "title": "Read" })))
            .await
            .expect("create");
        store.delete("habits", &created.id).await.expect("delete");

        let expected = [ChangeKind::Create, ChangeKind::Delete].map(|kind| {
            crate::store::event_name(&channel, &created.id, kind)
        });
        for name in expected {
            match subscription.next().await {
                Some(FeedMessage::Notice(notice)) => assert_eq!(notice.events, vec![name]),
                other => panic!("unexpected feed message: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn subscribe_rejects_foreign_channels() {
        let store = SqliteStore::open_in_memory("main").expect("store");

        let result = store
            .subscribe(&collection_channel("other", "habits"))
            .await;
        assert!(matches!(result, Err(SubscriptionError::UnknownChannel(_))));
    }

    #[tokio::test]
    async fn file_backed_store_persists_between_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("db").join("habits.db");

        {
            let store = SqliteStore::open(&path, "main").expect("store");
            store
                .create("habits", fields(json!({ "title": "Read" })))
                .await
                .expect("create");
        }

        let reopened = SqliteStore::open(&path, "main").expect("store");
        let habits = reopened.query("habits", &[]).await.expect("query");
        assert_eq!(habits.len(), 1);
    }
}
