//! Database capability over one SQLite connection.
//!
//! SQL text always arrives as a literal string from the script; user
//! data only ever crosses this boundary through positional parameter
//! binding. Concatenating SQL with user input is impossible here by
//! construction.
//!
//! Statements are `rusqlite::Statement` values, finalized by drop on
//! every path (success and error alike), so no statement can be
//! orphaned by an early return.

use std::path::Path;

use smallvec::SmallVec;

use hull_primitives::{CapError, Column, Value};

/// Most parameters one statement may bind. Binding is 1-based and
/// positional.
pub const MAX_BIND_PARAMS: usize = 255;

/// Row callbacks receive at most this many columns on the stack; wider
/// result sets spill to the heap.
pub const STACK_COLUMNS: usize = 32;

fn db_err(e: rusqlite::Error) -> CapError {
    CapError::Db(e.to_string())
}

/// The database capability: one connection, owned by one interpreter
/// host, never shared.
pub struct Db {
    conn: rusqlite::Connection,
}

impl Db {
    /// Open (creating if absent) the database file at `path`.
    pub fn open(path: &Path) -> Result<Self, CapError> {
        let conn = rusqlite::Connection::open(path).map_err(db_err)?;
        Ok(Self { conn })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, CapError> {
        let conn = rusqlite::Connection::open_in_memory().map_err(db_err)?;
        Ok(Self { conn })
    }

    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> Result<(), CapError> {
        if params.len() > MAX_BIND_PARAMS {
            return Err(CapError::invalid(format!(
                "too many bind parameters ({} > {})",
                params.len(),
                MAX_BIND_PARAMS
            )));
        }
        for (i, param) in params.iter().enumerate() {
            // Binding order is 1-based and positional.
            let idx = i + 1;
            match param {
                Value::Nil => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Double(v) => stmt.raw_bind_parameter(idx, v),
                Value::Text(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Blob(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, *b as i64),
            }
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Run a prepared, parameterized statement, invoking `on_row` per
    /// result row. The callback returns `true` to continue iteration,
    /// `false` to stop early.
    ///
    /// On failure the callback may already have seen some rows; callers
    /// must treat partial progress as aborted.
    pub fn query(
        &self,
        sql: &str,
        params: &[Value],
        mut on_row: impl FnMut(&[Column<'_>]) -> bool,
    ) -> Result<(), CapError> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        Self::bind_params(&mut stmt, params)?;

        // Column names are copied out of the prepared statement up
        // front: the raw_query borrow takes the statement for the whole
        // iteration.
        let names: Vec<String> = stmt.column_names().iter().map(|n| n.to_string()).collect();
        let ncols = names.len();

        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next().map_err(db_err)? {
            let mut cols: SmallVec<[Column<'_>; STACK_COLUMNS]> = SmallVec::with_capacity(ncols);
            for (i, name) in names.iter().enumerate() {
                let value = match row.get_ref(i).map_err(db_err)? {
                    rusqlite::types::ValueRef::Null => Value::Nil,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Double(v),
                    rusqlite::types::ValueRef::Text(t) => {
                        Value::Text(String::from_utf8_lossy(t).into_owned())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Blob(b.to_vec()),
                };
                cols.push(Column::new(name, value));
            }
            if !on_row(&cols) {
                break;
            }
        }
        Ok(())
    }

    /// Run a non-SELECT statement. Returns the number of affected rows.
    pub fn exec(&self, sql: &str, params: &[Value]) -> Result<i64, CapError> {
        let mut stmt = self.conn.prepare(sql).map_err(db_err)?;
        Self::bind_params(&mut stmt, params)?;
        let affected = stmt.raw_execute().map_err(db_err)?;
        Ok(affected as i64)
    }

    /// Last auto-generated row id on this connection.
    pub fn last_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Begin a transaction.
    pub fn begin(&self) -> Result<(), CapError> {
        self.conn.execute_batch("BEGIN").map_err(db_err)
    }

    /// Commit the open transaction.
    pub fn commit(&self) -> Result<(), CapError> {
        self.conn.execute_batch("COMMIT").map_err(db_err)
    }

    /// Roll back the open transaction.
    pub fn rollback(&self) -> Result<(), CapError> {
        self.conn.execute_batch("ROLLBACK").map_err(db_err)
    }

    /// Roll back a transaction a crashed handler left open.
    ///
    /// Called by the dispatcher before each request. Returns `true` if a
    /// stale transaction was rolled back.
    pub fn guard_stale_txn(&self) -> Result<bool, CapError> {
        if self.conn.is_autocommit() {
            return Ok(false);
        }
        self.conn.execute_batch("ROLLBACK").map_err(db_err)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_table() -> Db {
        let db = Db::open_in_memory().unwrap();
        db.exec("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, score REAL)", &[])
            .unwrap();
        db
    }

    fn collect_rows(db: &Db, sql: &str, params: &[Value]) -> Vec<Vec<(String, Value)>> {
        let mut out = Vec::new();
        db.query(sql, params, |cols| {
            out.push(
                cols.iter()
                    .map(|c| (c.name.to_string(), c.value.clone()))
                    .collect(),
            );
            true
        })
        .unwrap();
        out
    }

    #[test]
    fn test_exec_and_query_roundtrip() {
        let db = db_with_table();
        let n = db
            .exec(
                "INSERT INTO t (name, score) VALUES (?, ?)",
                &[Value::Text("alice".into()), Value::Double(9.5)],
            )
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(db.last_id(), 1);

        let rows = collect_rows(&db, "SELECT name, score FROM t", &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ("name".into(), Value::Text("alice".into())));
        assert_eq!(rows[0][1], ("score".into(), Value::Double(9.5)));
    }

    #[test]
    fn test_injection_attempt_stays_data() {
        let db = db_with_table();
        let hostile = "'; DROP TABLE t; --";
        db.exec(
            "INSERT INTO t (name) VALUES (?)",
            &[Value::Text(hostile.into())],
        )
        .unwrap();

        // The hostile string matched literally, and the table survived.
        let rows = collect_rows(
            &db,
            "SELECT id FROM t WHERE name = ?",
            &[Value::Text(hostile.into())],
        );
        assert_eq!(rows.len(), 1);
        let rows = collect_rows(&db, "SELECT COUNT(*) AS n FROM t", &[]);
        assert_eq!(rows[0][0].1, Value::Int(1));
    }

    #[test]
    fn test_query_early_stop() {
        let db = db_with_table();
        for i in 0..10 {
            db.exec("INSERT INTO t (name) VALUES (?)", &[Value::Text(format!("u{i}"))])
                .unwrap();
        }
        let mut seen = 0;
        db.query("SELECT id FROM t ORDER BY id", &[], |_cols| {
            seen += 1;
            seen < 3
        })
        .unwrap();
        assert_eq!(seen, 3);
    }

    #[test]
    fn test_nil_and_bool_binding() {
        let db = db_with_table();
        db.exec(
            "INSERT INTO t (name, score) VALUES (?, ?)",
            &[Value::Nil, Value::Bool(true)],
        )
        .unwrap();
        let rows = collect_rows(&db, "SELECT name, score FROM t", &[]);
        assert_eq!(rows[0][0].1, Value::Nil);
        // Bools bind as integers.
        assert_eq!(rows[0][1].1, Value::Double(1.0));
    }

    #[test]
    fn test_blob_roundtrip() {
        let db = db_with_table();
        db.exec(
            "INSERT INTO t (name) VALUES (?)",
            &[Value::Blob(vec![0, 159, 146, 150])],
        )
        .unwrap();
        let rows = collect_rows(&db, "SELECT name FROM t", &[]);
        assert_eq!(rows[0][0].1, Value::Blob(vec![0, 159, 146, 150]));
    }

    #[test]
    fn test_malformed_sql_is_db_error() {
        let db = db_with_table();
        let err = db.exec("INSRT INTO t VALUES (1)", &[]).unwrap_err();
        assert!(matches!(err, CapError::Db(_)));
    }

    #[test]
    fn test_transactions() {
        let db = db_with_table();
        db.begin().unwrap();
        db.exec("INSERT INTO t (name) VALUES (?)", &[Value::Text("x".into())])
            .unwrap();
        db.rollback().unwrap();
        assert!(collect_rows(&db, "SELECT * FROM t", &[]).is_empty());

        db.begin().unwrap();
        db.exec("INSERT INTO t (name) VALUES (?)", &[Value::Text("y".into())])
            .unwrap();
        db.commit().unwrap();
        assert_eq!(collect_rows(&db, "SELECT * FROM t", &[]).len(), 1);
    }

    #[test]
    fn test_guard_stale_txn() {
        let db = db_with_table();
        assert!(!db.guard_stale_txn().unwrap());

        // Simulate a handler that crashed mid-transaction.
        db.begin().unwrap();
        db.exec("INSERT INTO t (name) VALUES (?)", &[Value::Text("zombie".into())])
            .unwrap();
        assert!(db.guard_stale_txn().unwrap());
        assert!(collect_rows(&db, "SELECT * FROM t", &[]).is_empty());
        assert!(!db.guard_stale_txn().unwrap());
    }
}
