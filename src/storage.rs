use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::detect::DetectionReport;

/// A persisted detection pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: i64,
    /// Epoch seconds.
    pub created_at: u64,
    /// Media-relative path of the original image.
    pub image_path: String,
    pub processed_image_path: Option<String>,
    pub objects_detected: Vec<String>,
    pub confidence_scores: Vec<f32>,
    pub detection_count: usize,
}

/// Record contents before an id is assigned.
#[derive(Clone, Debug, PartialEq)]
pub struct NewDetectionRecord {
    pub created_at: u64,
    pub image_path: String,
    pub processed_image_path: Option<String>,
    pub objects_detected: Vec<String>,
    pub confidence_scores: Vec<f32>,
    pub detection_count: usize,
}

impl NewDetectionRecord {
    pub fn from_report(
        created_at: u64,
        image_path: impl Into<String>,
        processed_image_path: Option<String>,
        report: &DetectionReport,
    ) -> Self {
        Self {
            created_at,
            image_path: image_path.into(),
            processed_image_path,
            objects_detected: report.objects_detected.clone(),
            confidence_scores: report.confidence_scores.clone(),
            detection_count: report.detection_count,
        }
    }

    fn with_id(&self, id: i64) -> DetectionRecord {
        DetectionRecord {
            id,
            created_at: self.created_at,
            image_path: self.image_path.clone(),
            processed_image_path: self.processed_image_path.clone(),
            objects_detected: self.objects_detected.clone(),
            confidence_scores: self.confidence_scores.clone(),
            detection_count: self.detection_count,
        }
    }
}

/// Detection history. Listings are newest first: `created_at` descending,
/// ties broken by id descending.
pub trait DetectionStore: Send {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord>;

    fn get(&mut self, id: i64) -> Result<Option<DetectionRecord>>;

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionRecord>>;

    fn all(&mut self) -> Result<Vec<DetectionRecord>>;

    fn count(&mut self) -> Result<usize>;

    /// Remove every record, returning how many were removed.
    fn delete_all(&mut self) -> Result<usize>;
}

pub struct SqliteDetectionStore {
    conn: Connection,
}

impl SqliteDetectionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detections (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              image_path TEXT NOT NULL,
              processed_image_path TEXT,
              objects_detected TEXT NOT NULL,
              confidence_scores TEXT NOT NULL,
              detection_count INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detections_created ON detections(created_at);
            "#,
        )?;
        Ok(())
    }

    fn query(&self, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<DetectionRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(args)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(record_from_row(row)?);
        }
        Ok(out)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, created_at, image_path, processed_image_path, \
     objects_detected, confidence_scores, detection_count FROM detections";

fn record_from_row(row: &Row<'_>) -> Result<DetectionRecord> {
    let created_at: i64 = row.get(1)?;
    let objects: String = row.get(4)?;
    let scores: String = row.get(5)?;
    let count: i64 = row.get(6)?;
    Ok(DetectionRecord {
        id: row.get(0)?,
        created_at: u64::try_from(created_at)
            .map_err(|_| anyhow!("corrupt record: negative created_at"))?,
        image_path: row.get(2)?,
        processed_image_path: row.get(3)?,
        objects_detected: serde_json::from_str(&objects)?,
        confidence_scores: serde_json::from_str(&scores)?,
        detection_count: usize::try_from(count)
            .map_err(|_| anyhow!("corrupt record: negative detection_count"))?,
    })
}

impl DetectionStore for SqliteDetectionStore {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord> {
        let created_at = i64::try_from(record.created_at)
            .map_err(|_| anyhow!("created_at exceeds i64 range"))?;
        self.conn.execute(
            r#"
            INSERT INTO detections(created_at, image_path, processed_image_path,
                                   objects_detected, confidence_scores, detection_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                created_at,
                record.image_path,
                record.processed_image_path,
                serde_json::to_string(&record.objects_detected)?,
                serde_json::to_string(&record.confidence_scores)?,
                record.detection_count as i64
            ],
        )?;
        Ok(record.with_id(self.conn.last_insert_rowid()))
    }

    fn get(&mut self, id: i64) -> Result<Option<DetectionRecord>> {
        let sql = format!("{} WHERE id = ?1", SELECT_COLUMNS);
        Ok(self.query(&sql, params![id])?.into_iter().next())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionRecord>> {
        let sql = format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT ?1",
            SELECT_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query(&sql, params![limit])
    }

    fn all(&mut self) -> Result<Vec<DetectionRecord>> {
        let sql = format!("{} ORDER BY created_at DESC, id DESC", SELECT_COLUMNS);
        self.query(&sql, params![])
    }

    fn count(&mut self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM detections", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn delete_all(&mut self) -> Result<usize> {
        Ok(self.conn.execute("DELETE FROM detections", [])?)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryDetectionStore {
    records: Vec<DetectionRecord>,
    next_id: i64,
}

impl InMemoryDetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(&self) -> Vec<DetectionRecord> {
        let mut out = self.records.clone();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }
}

impl DetectionStore for InMemoryDetectionStore {
    fn insert(&mut self, record: &NewDetectionRecord) -> Result<DetectionRecord> {
        self.next_id += 1;
        let stored = record.with_id(self.next_id);
        self.records.push(stored.clone());
        Ok(stored)
    }

    fn get(&mut self, id: i64) -> Result<Option<DetectionRecord>> {
        Ok(self.records.iter().find(|r| r.id == id).cloned())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<DetectionRecord>> {
        Ok(self.sorted().into_iter().take(limit).collect())
    }

    fn all(&mut self) -> Result<Vec<DetectionRecord>> {
        Ok(self.sorted())
    }

    fn count(&mut self) -> Result<usize> {
        Ok(self.records.len())
    }

    fn delete_all(&mut self) -> Result<usize> {
        let n = self.records.len();
        self.records.clear();
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(created_at: u64, labels: &[&str]) -> NewDetectionRecord {
        NewDetectionRecord {
            created_at,
            image_path: format!("detections/{}.jpg", created_at),
            processed_image_path: None,
            objects_detected: labels.iter().map(|s| s.to_string()).collect(),
            confidence_scores: labels.iter().map(|_| 0.9).collect(),
            detection_count: labels.len(),
        }
    }

    fn exercise(store: &mut dyn DetectionStore) {
        let a = store.insert(&record(100, &["face"])).unwrap();
        let b = store.insert(&record(300, &["helmet", "phone"])).unwrap();
        let c = store.insert(&record(300, &[])).unwrap();
        store.insert(&record(200, &["mask"])).unwrap();

        assert_eq!(store.count().unwrap(), 4);
        let recent = store.recent(3).unwrap();
        let ids: Vec<i64> = recent.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, b.id, b.id + 2]);

        let fetched = store.get(b.id).unwrap().unwrap();
        assert_eq!(fetched, b);
        assert_eq!(fetched.objects_detected, vec!["helmet", "phone"]);
        assert_eq!(fetched.confidence_scores, vec![0.9, 0.9]);
        assert!(store.get(a.id + 100).unwrap().is_none());

        assert_eq!(store.all().unwrap().last().unwrap().id, a.id);
        assert_eq!(store.delete_all().unwrap(), 4);
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.recent(5).unwrap().is_empty());
    }

    #[test]
    fn in_memory_store_orders_newest_first() {
        exercise(&mut InMemoryDetectionStore::new());
    }

    #[test]
    fn sqlite_store_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.db");
        let mut store = SqliteDetectionStore::open(path.to_str().unwrap()).unwrap();
        exercise(&mut store);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.db");
        let path = path.to_str().unwrap();
        let id = {
            let mut store = SqliteDetectionStore::open(path).unwrap();
            let mut rec = record(42, &["phone"]);
            rec.processed_image_path = Some("processed/42.jpg".to_string());
            store.insert(&rec).unwrap().id
        };
        let mut store = SqliteDetectionStore::open(path).unwrap();
        let rec = store.get(id).unwrap().unwrap();
        assert_eq!(rec.processed_image_path.as_deref(), Some("processed/42.jpg"));
        assert_eq!(rec.detection_count, 1);
    }
}
