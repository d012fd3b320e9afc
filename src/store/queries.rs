pub const CREATE_DOCUMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
  seq          INTEGER PRIMARY KEY AUTOINCREMENT,
  collection   TEXT NOT NULL,
  id           TEXT NOT NULL,
  body         TEXT NOT NULL,
  created_at   INTEGER NOT NULL,
  updated_at   INTEGER NOT NULL,
  UNIQUE (collection, id)
);
"#;

pub const INDEX_DOCUMENTS_COLLECTION: &str =
    "CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);";

pub const INSERT_DOCUMENT: &str = "INSERT INTO documents (collection, id, body, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)";

pub const SELECT_DOCUMENT: &str = "SELECT body FROM documents WHERE collection = ?1 AND id = ?2";

pub const UPDATE_DOCUMENT: &str =
    "UPDATE documents SET body = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2";

pub const DELETE_DOCUMENT: &str = "DELETE FROM documents WHERE collection = ?1 AND id = ?2";

pub const SELECT_COLLECTION: &str = "SELECT id, body FROM documents WHERE collection = ?1";

pub fn schema_statements() -> Vec<&'static str> {
    vec![CREATE_DOCUMENTS, INDEX_DOCUMENTS_COLLECTION]
}
