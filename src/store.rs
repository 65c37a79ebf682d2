//! Element store contracts and the SQLite implementation.
//!
//! Each row keeps the full record as JSON next to the classification columns
//! the list filters run against. Records are written once by the bulk import
//! and only read afterwards.
//!
//! Only `symbol`, `name`, `category`, `block`, `group` and `period` are real
//! columns, so only those can be filtered or ordered in SQL. Every other
//! attribute lives in the `data` document and is opaque to queries; adding a
//! filter on one of them means promoting it to a column first.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};
use validator::Validate;

use crate::element::Element;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS elements (
    atomic_number INTEGER PRIMARY KEY CHECK (atomic_number > 0),
    symbol TEXT NOT NULL,
    name TEXT NOT NULL,
    category TEXT,
    block TEXT,
    grp INTEGER,
    period INTEGER,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_elements_category ON elements (category);
CREATE INDEX IF NOT EXISTS idx_elements_block ON elements (block);
CREATE INDEX IF NOT EXISTS idx_elements_grp ON elements (grp);
CREATE INDEX IF NOT EXISTS idx_elements_period ON elements (period);
CREATE TRIGGER IF NOT EXISTS elements_atomic_number_immutable
BEFORE UPDATE OF atomic_number ON elements
BEGIN
    SELECT RAISE(ABORT, 'atomic_number is immutable');
END;
";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("element not found: {0}")]
    NotFound(u32),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("invalid persisted element data: {0}")]
    InvalidData(String),

    #[error("element {atomic_number} failed validation: {errors}")]
    Validation {
        atomic_number: u32,
        #[source]
        errors: validator::ValidationErrors,
    },

    #[error("store connection lock poisoned")]
    Poisoned,
}

/// Inclusive range over an integer classification column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl FieldRange {
    pub fn exactly(value: u32) -> Self {
        Self {
            min: Some(value),
            max: Some(value),
        }
    }

    pub fn between(min: u32, max: u32) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }
}

/// Filters on classification fields. The default matches every element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementFilter {
    pub category: Option<String>,
    pub block: Option<String>,
    pub period: Option<FieldRange>,
    pub group: Option<FieldRange>,
}

impl ElementFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values = Vec::new();

        if let Some(category) = &self.category {
            clauses.push("category = ?".to_string());
            values.push(Value::Text(category.clone()));
        }
        if let Some(block) = &self.block {
            clauses.push("block = ?".to_string());
            values.push(Value::Text(block.clone()));
        }
        for (column, range) in [("period", self.period), ("grp", self.group)] {
            let Some(range) = range else { continue };
            if let Some(min) = range.min {
                clauses.push(format!("{column} >= ?"));
                values.push(Value::Integer(i64::from(min)));
            }
            if let Some(max) = range.max {
                clauses.push(format!("{column} <= ?"));
                values.push(Value::Integer(i64::from(max)));
            }
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderBy {
    #[default]
    AtomicNumber,
    Name,
    Symbol,
}

impl OrderBy {
    fn sql(self) -> &'static str {
        match self {
            OrderBy::AtomicNumber => "atomic_number ASC",
            OrderBy::Name => "name ASC, atomic_number ASC",
            OrderBy::Symbol => "symbol ASC, atomic_number ASC",
        }
    }
}

/// Query options for listing elements.
#[derive(Debug, Clone, Default)]
pub struct ElementQuery {
    pub filter: ElementFilter,
    pub order_by: OrderBy,
    pub limit: Option<u64>,
    pub offset: u64,
}

/// Read-only view over the element collection.
pub trait ElementStore: Send + Sync {
    /// Elements matching the query, in the requested order.
    fn list(&self, query: &ElementQuery) -> StoreResult<Vec<Element>>;

    /// Number of elements matching the filter.
    fn count(&self, filter: &ElementFilter) -> StoreResult<u64>;

    /// The element with the given atomic number, or `StoreError::NotFound`.
    fn get(&self, atomic_number: u32) -> StoreResult<Element>;
}

/// SQLite-backed element store.
pub struct SqliteElementStore {
    conn: Mutex<Connection>,
}

impl SqliteElementStore {
    /// Opens (or creates) a database file and bootstraps the schema.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let started_at = Instant::now();
        info!(mode = "file", path = %path.as_ref().display(), "db_open start");

        let conn = Connection::open(path.as_ref()).map_err(|err| {
            error!(
                mode = "file",
                duration_ms = started_at.elapsed().as_millis() as u64,
                error = %err,
                "db_open failed"
            );
            StoreError::from(err)
        })?;

        Self::bootstrap(conn, "file", started_at)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        let started_at = Instant::now();
        info!(mode = "memory", "db_open start");
        let conn = Connection::open_in_memory()?;
        Self::bootstrap(conn, "memory", started_at)
    }

    fn bootstrap(conn: Connection, mode: &str, started_at: Instant) -> StoreResult<Self> {
        let result = conn
            .busy_timeout(Duration::from_secs(5))
            .and_then(|_| conn.execute_batch(SCHEMA_SQL));

        match result {
            Ok(()) => {
                info!(
                    mode,
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    "db_open ok"
                );
                Ok(Self {
                    conn: Mutex::new(conn),
                })
            }
            Err(err) => {
                error!(
                    mode,
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    error = %err,
                    "db_open bootstrap failed"
                );
                Err(err.into())
            }
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Bulk-loads elements in a single transaction.
    ///
    /// Every record is validated before anything is written. Atomic numbers
    /// already present are left untouched. Returns the number of rows added.
    pub fn import(&self, elements: &[Element]) -> StoreResult<usize> {
        for element in elements {
            element.validate().map_err(|errors| StoreError::Validation {
                atomic_number: element.atomic_number,
                errors,
            })?;
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO elements (atomic_number, symbol, name, category, block, grp, period, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (atomic_number) DO NOTHING",
            )?;
            for element in elements {
                let data = serde_json::to_string(element)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                inserted += stmt.execute(params![
                    element.atomic_number,
                    element.symbol,
                    element.name,
                    element.category,
                    element.block,
                    element.group,
                    element.period,
                    data,
                ])?;
            }
        }
        tx.commit()?;

        info!(
            received = elements.len(),
            inserted,
            "Imported elements"
        );
        Ok(inserted)
    }
}

fn decode_element(atomic_number: i64, data: &str) -> StoreResult<Element> {
    let element: Element = serde_json::from_str(data).map_err(|e| {
        StoreError::InvalidData(format!("element {atomic_number}: {e}"))
    })?;

    if i64::from(element.atomic_number) != atomic_number {
        return Err(StoreError::InvalidData(format!(
            "row {atomic_number} holds element {}",
            element.atomic_number
        )));
    }
    element.validate().map_err(|errors| StoreError::Validation {
        atomic_number: element.atomic_number,
        errors,
    })?;

    Ok(element)
}

impl ElementStore for SqliteElementStore {
    fn list(&self, query: &ElementQuery) -> StoreResult<Vec<Element>> {
        let (where_clause, mut values) = query.filter.where_clause();
        let sql = format!(
            "SELECT atomic_number, data FROM elements{} ORDER BY {} LIMIT ? OFFSET ?",
            where_clause,
            query.order_by.sql()
        );
        let limit = query
            .limit
            .map(|limit| i64::try_from(limit).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        values.push(Value::Integer(limit));
        values.push(Value::Integer(i64::try_from(query.offset).unwrap_or(i64::MAX)));

        debug!(sql = %sql, "Listing elements");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut elements = Vec::new();
        for row in rows {
            let (atomic_number, data) = row?;
            elements.push(decode_element(atomic_number, &data)?);
        }
        Ok(elements)
    }

    fn count(&self, filter: &ElementFilter) -> StoreResult<u64> {
        let (where_clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM elements{}", where_clause);

        let conn = self.lock()?;
        let count: i64 = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn get(&self, atomic_number: u32) -> StoreResult<Element> {
        let conn = self.lock()?;
        let data: Option<String> = conn
            .query_row(
                "SELECT data FROM elements WHERE atomic_number = ?1",
                params![atomic_number],
                |row| row.get(0),
            )
            .optional()?;

        match data {
            Some(data) => decode_element(i64::from(atomic_number), &data),
            None => Err(StoreError::NotFound(atomic_number)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(atomic_number: u32, symbol: &str, name: &str, period: u32, group: u32) -> Element {
        let mut element = Element::new(atomic_number, symbol, name);
        element.period = Some(period);
        element.group = Some(group);
        element.block = Some(if group <= 2 || atomic_number == 2 { "s" } else { "p" }.to_string());
        element.category = Some(if group == 18 { "noble gas" } else { "other" }.to_string());
        element
    }

    fn seeded_store() -> SqliteElementStore {
        let store = SqliteElementStore::open_in_memory().unwrap();
        let elements = vec![
            element(3, "Li", "Lithium", 2, 1),
            element(1, "H", "Hydrogen", 1, 1),
            element(10, "Ne", "Neon", 2, 18),
            element(2, "He", "Helium", 1, 18),
            element(6, "C", "Carbon", 2, 14),
        ];
        assert_eq!(store.import(&elements).unwrap(), 5);
        store
    }

    fn numbers(elements: &[Element]) -> Vec<u32> {
        elements.iter().map(|e| e.atomic_number).collect()
    }

    #[test]
    fn test_list_defaults_to_ascending_atomic_number() {
        let store = seeded_store();
        let elements = store.list(&ElementQuery::default()).unwrap();
        assert_eq!(numbers(&elements), vec![1, 2, 3, 6, 10]);
    }

    #[test]
    fn test_list_with_limit_offset_and_order() {
        let store = seeded_store();
        let page = store
            .list(&ElementQuery {
                limit: Some(2),
                offset: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(numbers(&page), vec![3, 6]);

        let by_name = store
            .list(&ElementQuery {
                order_by: OrderBy::Name,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(numbers(&by_name), vec![6, 2, 1, 3, 10]);
    }

    #[test]
    fn test_filters_on_classification_fields() {
        let store = seeded_store();

        let noble = ElementFilter {
            category: Some("noble gas".to_string()),
            ..Default::default()
        };
        assert_eq!(store.count(&noble).unwrap(), 2);

        let second_period = ElementFilter {
            period: Some(FieldRange::exactly(2)),
            group: Some(FieldRange::between(2, 17)),
            ..Default::default()
        };
        let query = ElementQuery {
            filter: second_period,
            ..Default::default()
        };
        assert_eq!(numbers(&store.list(&query).unwrap()), vec![6]);
        assert_eq!(store.count(&ElementFilter::default()).unwrap(), 5);
    }

    #[test]
    fn test_get_and_not_found() {
        let store = seeded_store();
        let hydrogen = store.get(1).unwrap();
        assert_eq!(hydrogen.symbol, "H");
        assert_eq!(hydrogen.name, "Hydrogen");

        assert!(matches!(store.get(119), Err(StoreError::NotFound(119))));
    }

    #[test]
    fn test_import_skips_existing_and_rejects_invalid() {
        let store = seeded_store();
        let again = vec![Element::new(1, "X", "Replaced"), Element::new(7, "N", "Nitrogen")];
        assert_eq!(store.import(&again).unwrap(), 1);
        assert_eq!(store.get(1).unwrap().name, "Hydrogen");

        let mut bad = Element::new(8, "O", "Oxygen");
        bad.density = Some(f64::NAN);
        let err = store.import(&[bad]).unwrap_err();
        assert!(matches!(err, StoreError::Validation { atomic_number: 8, .. }));
        assert!(matches!(store.get(8), Err(StoreError::NotFound(8))));
    }

    #[test]
    fn test_atomic_number_is_immutable() {
        let store = seeded_store();
        let conn = store.lock().unwrap();
        let result = conn.execute("UPDATE elements SET atomic_number = 200 WHERE atomic_number = 1", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_corrupt_rows() {
        let store = seeded_store();
        {
            let conn = store.lock().unwrap();
            conn.execute(
                "INSERT INTO elements (atomic_number, symbol, name, data) VALUES (50, 'Sn', 'Tin', '{not json')",
                [],
            )
            .unwrap();
        }
        assert!(matches!(store.get(50), Err(StoreError::InvalidData(_))));
    }
}
