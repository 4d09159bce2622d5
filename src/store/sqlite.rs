use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    Collection, Document, DocumentStore, Query, Snapshots, Stamp, StoreError, StoredDocument, notify::ChangeNotifier,
    sort_by_stamp,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    key TEXT NOT NULL,
    seq INTEGER NOT NULL,
    at_ns INTEGER NOT NULL,
    body TEXT NOT NULL,
    PRIMARY KEY (collection, key)
);
CREATE INDEX IF NOT EXISTS documents_by_stamp ON documents (collection, at_ns, seq);
"#;

type Row = (String, i64, i64, String);

/// SQLite-backed document store.
///
/// Writes go through one async mutex, which also holds the last assigned
/// seq. Change notification only reaches watchers in this process.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
    writes: Arc<Mutex<u64>>,
    changes: Arc<ChangeNotifier>,
}

impl SqliteStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        // an in-memory database lives only as long as its connection
        let options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(16)
        };
        let db_pool = options.connect(url).await?;
        info!(url, "connected to sqlite");
        Self::from_pool(db_pool).await
    }

    pub async fn from_pool(db_pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&db_pool).await?;
        let (last_seq,): (Option<i64>,) = sqlx::query_as("SELECT MAX(seq) FROM documents")
            .fetch_one(&db_pool)
            .await?;
        let last_seq = u64::try_from(last_seq.unwrap_or(0)).map_err(StoreError::backend)?;
        debug!(last_seq, "seq counter seeded");
        Ok(Self {
            db_pool,
            writes: Arc::new(Mutex::new(last_seq)),
            changes: Arc::new(ChangeNotifier::default()),
        })
    }

    /// Must be called with `writes` held; `last_seq` is what it guards.
    async fn next_stamp(&self, collection: &Collection, last_seq: u64) -> Result<Stamp, StoreError> {
        let (floor,): (Option<i64>,) = sqlx::query_as("SELECT MAX(at_ns) FROM documents WHERE collection=?")
            .bind(collection.as_str())
            .fetch_one(&self.db_pool)
            .await?;

        let floor = floor.map(from_nanos).transpose()?;
        Ok(Stamp::assign(OffsetDateTime::now_utc(), floor, last_seq + 1))
    }

    async fn write(&self, sql: &str, collection: &Collection, key: &str, document: &Document) -> Result<Option<Stamp>, StoreError> {
        let mut last_seq = self.writes.lock().await;
        let stamp = self.next_stamp(collection, *last_seq).await?;
        let written = sqlx::query(sql)
            .bind(collection.as_str())
            .bind(key)
            .bind(i64::try_from(stamp.seq).map_err(StoreError::backend)?)
            .bind(to_nanos(stamp.at)?)
            .bind(document.to_string())
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        if written == 0 {
            return Ok(None);
        }
        *last_seq = stamp.seq;
        Ok(Some(stamp))
    }
}

fn to_nanos(at: OffsetDateTime) -> Result<i64, StoreError> {
    i64::try_from(at.unix_timestamp_nanos()).map_err(StoreError::backend)
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).map_err(StoreError::backend)
}

fn from_row(collection: &Collection, (key, seq, at_ns, body): Row) -> Result<StoredDocument, StoreError> {
    let malformed = |reason: String| StoreError::Malformed {
        collection: collection.to_string(),
        key: key.clone(),
        reason,
    };
    let body = serde_json::from_str(&body).map_err(|err| malformed(err.to_string()))?;
    let seq = u64::try_from(seq).map_err(|err| malformed(err.to_string()))?;
    let at = from_nanos(at_ns)?;
    Ok(StoredDocument {
        key,
        stamp: Stamp { at, seq },
        body,
    })
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn put(&self, collection: &Collection, key: &str, document: Document) -> Result<Stamp, StoreError> {
        let stamp = self
            .write(
                "INSERT INTO documents (collection,key,seq,at_ns,body) VALUES (?,?,?,?,?) \
                 ON CONFLICT(collection,key) DO UPDATE SET seq=excluded.seq, at_ns=excluded.at_ns, body=excluded.body",
                collection,
                key,
                &document,
            )
            .await?
            .ok_or_else(|| StoreError::backend(format!("put {collection}/{key} wrote nothing")))?;
        debug!(%collection, key, seq = stamp.seq, "put");
        self.changes.notify(collection.as_str());
        Ok(stamp)
    }

    async fn insert(&self, collection: &Collection, key: &str, document: Document) -> Result<Option<Stamp>, StoreError> {
        let stamp = self
            .write(
                "INSERT INTO documents (collection,key,seq,at_ns,body) VALUES (?,?,?,?,?) \
                 ON CONFLICT(collection,key) DO NOTHING",
                collection,
                key,
                &document,
            )
            .await?;
        if stamp.is_some() {
            debug!(%collection, key, "insert");
            self.changes.notify(collection.as_str());
        }
        Ok(stamp)
    }

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        let row: Option<Row> = sqlx::query_as("SELECT key,seq,at_ns,body FROM documents WHERE collection=? AND key=?")
            .bind(collection.as_str())
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        row.map(|row| from_row(collection, row)).transpose()
    }

    async fn append(&self, collection: &Collection, document: Document) -> Result<StoredDocument, StoreError> {
        let key = Uuid::now_v7().simple().to_string();
        let stamp = self
            .write(
                "INSERT INTO documents (collection,key,seq,at_ns,body) VALUES (?,?,?,?,?)",
                collection,
                &key,
                &document,
            )
            .await?
            .ok_or_else(|| StoreError::backend(format!("append to {collection} wrote nothing")))?;
        debug!(%collection, key, seq = stamp.seq, "append");
        self.changes.notify(collection.as_str());
        Ok(StoredDocument {
            key,
            stamp,
            body: document,
        })
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let rows: Vec<Row> = sqlx::query_as("SELECT key,seq,at_ns,body FROM documents WHERE collection=? ORDER BY at_ns,seq")
            .bind(query.collection.as_str())
            .fetch_all(&self.db_pool)
            .await?;
        let mut documents = rows
            .into_iter()
            .map(|row| from_row(&query.collection, row))
            .collect::<Result<Vec<_>, _>>()?;
        sort_by_stamp(&mut documents);
        Ok(documents)
    }

    async fn watch(&self, query: Query) -> Result<Snapshots, StoreError> {
        let changes = self.changes.subscribe(query.collection.as_str());
        Ok(super::notify::snapshots(self.clone(), query, changes))
    }
}
