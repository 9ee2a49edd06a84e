use crate::account::AccountDirectory;
use crate::naming::{
    has_container_extension, is_genuine_container, strip_container_extension, CONTAINER_EXTENSION,
};
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Result as SqlResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Prefix of the versioned content table (`image_hardlink_info_v3`, ...)
const CONTENT_TABLE_PREFIX: &str = "image_hardlink_info";

/// Prefix of the optional directory alias table
const ALIAS_TABLE_PREFIX: &str = "dir2id";

/// Location parts of one content table row
#[derive(Debug, Clone, PartialEq, Eq)]
struct HardlinkRecord {
    dir1: String,
    dir2: String,
    file_name: String,
}

/// The HardlinkIndex wraps the vendor's hardlink SQLite side-table.
/// It maps a content hash to the folder the client stored the file in.
///
/// The database is opened read-only and never written.
pub struct HardlinkIndex {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    account_dir: AccountDirectory,
    content_table: String,
    alias_table: Option<String>,
}

impl HardlinkIndex {
    /// Open the account's hardlink database and discover its tables.
    pub fn open(account_dir: &AccountDirectory) -> SqlResult<Option<Self>> {
        let Some(db_path) = account_dir.hardlink_db() else {
            return Ok(None);
        };

        let conn = Connection::open_with_flags(
            &db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let tables = Self::table_names(&conn)?;
        let Some(content_table) = latest_versioned(&tables, CONTENT_TABLE_PREFIX) else {
            debug!(path = %db_path.display(), "hardlink database has no content table");
            return Ok(None);
        };
        let alias_table = latest_versioned(&tables, ALIAS_TABLE_PREFIX);

        debug!(
            path = %db_path.display(),
            content_table = %content_table,
            alias_table = ?alias_table,
            "hardlink index opened"
        );

        Ok(Some(HardlinkIndex {
            conn: Mutex::new(conn),
            db_path,
            account_dir: account_dir.clone(),
            content_table,
            alias_table,
        }))
    }

    fn table_names(conn: &Connection) -> SqlResult<Vec<String>> {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table'")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    pub fn content_table(&self) -> &str {
        &self.content_table
    }

    /// Look up the on-disk container for a content hash.
    ///
    /// Best effort: every query failure is logged and reported as no hit.
    pub fn lookup(&self, md5: &str, session_id: Option<&str>) -> Option<PathBuf> {
        match self.try_lookup(md5, session_id) {
            Ok(path) => path,
            Err(e) => {
                warn!(md5, error = %e, "hardlink lookup failed");
                None
            }
        }
    }

    fn try_lookup(&self, md5: &str, session_id: Option<&str>) -> SqlResult<Option<PathBuf>> {
        let Some(record) = self.find_record(md5)? else {
            return Ok(None);
        };

        if has_container_extension(&record.file_name)
            && !is_genuine_container(strip_container_extension(&record.file_name))
        {
            debug!(file_name = %record.file_name, "hardlink row is not an image container");
            return Ok(None);
        }

        let dir_name = match session_id {
            Some(session) => self
                .resolve_alias(&record.dir2, session)?
                .unwrap_or_else(|| record.dir2.clone()),
            None => record.dir2.clone(),
        };

        let base = self
            .account_dir
            .path()
            .join(&record.dir1)
            .join(&dir_name);

        let direct = base.join(&record.file_name);
        if direct.is_file() {
            return Ok(Some(direct));
        }

        let with_ext = base.join(format!("{}.{}", record.file_name, CONTAINER_EXTENSION));
        if with_ext.is_file() {
            return Ok(Some(with_ext));
        }

        debug!(md5, path = %direct.display(), "hardlink target missing on disk");
        Ok(None)
    }

    /// Fetch the content row for a hash. Rows missing any path part are skipped.
    fn find_record(&self, md5: &str) -> SqlResult<Option<HardlinkRecord>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT dir1, dir2, file_name FROM \"{}\" WHERE md5 = ?1 LIMIT 1",
            self.content_table
        );
        let row = conn
            .query_row(&sql, [md5], |row| {
                Ok((
                    value_to_string(row.get(0)?),
                    value_to_string(row.get(1)?),
                    value_to_string(row.get(2)?),
                ))
            })
            .optional()?;

        Ok(match row {
            Some((Some(dir1), Some(dir2), Some(file_name))) => Some(HardlinkRecord {
                dir1,
                dir2,
                file_name,
            }),
            _ => None,
        })
    }

    /// Directory name for `(dir2, session)` from the alias table, if any
    fn resolve_alias(&self, dir2: &str, session_id: &str) -> SqlResult<Option<String>> {
        let Some(alias_table) = &self.alias_table else {
            return Ok(None);
        };
        let conn = self.lock();
        let sql = format!(
            "SELECT dir_name FROM \"{}\" WHERE dir_id = ?1 AND session_id = ?2 LIMIT 1",
            alias_table
        );
        let name = conn
            .query_row(&sql, [dir2, session_id], |row| row.get::<_, Value>(0))
            .optional()?
            .and_then(value_to_string);
        Ok(name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// Connections are not Debug; show where the index came from
impl std::fmt::Debug for HardlinkIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardlinkIndex")
            .field("db_path", &self.db_path)
            .field("content_table", &self.content_table)
            .field("alias_table", &self.alias_table)
            .finish()
    }
}

/// The vendor stores directory ids as integers in some versions and text in others
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Text(s) if !s.is_empty() => Some(s),
        Value::Integer(i) => Some(i.to_string()),
        _ => None,
    }
}

/// Pick the table with the highest trailing version number for a prefix.
/// `image_hardlink_info_v3` beats `image_hardlink_info_v2` and the bare prefix.
fn latest_versioned(tables: &[String], prefix: &str) -> Option<String> {
    tables
        .iter()
        .filter(|name| name.starts_with(prefix))
        .max_by_key(|name| {
            let digits: String = name
                .chars()
                .rev()
                .take_while(|c| c.is_ascii_digit())
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            (digits.parse::<u64>().unwrap_or(0), name.len())
        })
        .cloned()
}

/// Process-wide pool of opened hardlink indexes, one per account directory.
///
/// Handles open lazily on first lookup and stay open until [`shutdown`](Self::shutdown).
#[derive(Debug, Default)]
pub struct HardlinkPool {
    handles: Mutex<HashMap<PathBuf, Arc<HardlinkIndex>>>,
}

impl HardlinkPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized open. Accounts without a usable database are retried next time.
    pub fn get(&self, account_dir: &AccountDirectory) -> Option<Arc<HardlinkIndex>> {
        let mut handles = match self.handles.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = handles.get(account_dir.path()) {
            return Some(index.clone());
        }

        match HardlinkIndex::open(account_dir) {
            Ok(Some(index)) => {
                let index = Arc::new(index);
                handles.insert(account_dir.path().to_path_buf(), index.clone());
                Some(index)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(account = %account_dir.path().display(), error = %e, "cannot open hardlink index");
                None
            }
        }
    }

    /// Look up a hash through the account's memoized index.
    /// Runs the query on the blocking pool.
    pub async fn lookup(
        self: &Arc<Self>,
        account_dir: &AccountDirectory,
        md5: &str,
        session_id: Option<&str>,
    ) -> Option<PathBuf> {
        let pool = Arc::clone(self);
        let account_dir = account_dir.clone();
        let md5 = md5.to_string();
        let session_id = session_id.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            pool.get(&account_dir)?
                .lookup(&md5, session_id.as_deref())
        })
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, "hardlink lookup task failed");
            None
        })
    }

    /// Number of open handles
    pub fn open_count(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    /// Close every handle
    pub fn shutdown(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.clear();
        }
    }
}
