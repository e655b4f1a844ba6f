use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

/// The signed-in session restored on the next start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSession {
    pub email: String,
    pub jwt: String,
    pub mfa_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

/// An email this client has seen, with its last known MFA status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownUser {
    pub email: String,
    pub mfa_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn save_session(&self, session: &StoredSession) -> Result<()> {
        if session.email.trim().is_empty() {
            bail!("storage: session email required");
        }
        if session.jwt.is_empty() {
            bail!("storage: session token required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO session (id, email, jwt, mfa_enabled, updated_at)
VALUES (1, ?1, ?2, ?3, ?4)
ON CONFLICT(id) DO UPDATE SET
  email = excluded.email,
  jwt = excluded.jwt,
  mfa_enabled = excluded.mfa_enabled,
  updated_at = excluded.updated_at
"#,
            params![
                session.email,
                session.jwt,
                session.mfa_enabled,
                Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<StoredSession>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT email, jwt, mfa_enabled, updated_at
FROM session
WHERE id = 1
"#,
            [],
            |row| {
                Ok(StoredSession {
                    email: row.get(0)?,
                    jwt: row.get(1)?,
                    mfa_enabled: row.get(2)?,
                    updated_at: timestamp(row.get(3)?),
                })
            },
        )
        .optional()
        .context("storage: query session")
    }

    pub fn clear_session(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM session", [])
            .context("storage: clear session")?;
        Ok(())
    }

    pub fn set_user_mfa(&self, email: &str, enabled: bool) -> Result<()> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            bail!("storage: user email required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO known_users (email, mfa_enabled, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(email) DO UPDATE SET
  mfa_enabled = excluded.mfa_enabled,
  updated_at = excluded.updated_at
"#,
            params![email, enabled, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Unknown users report MFA as disabled.
    pub fn user_mfa(&self, email: &str) -> Result<bool> {
        let email = email.trim().to_lowercase();
        let conn = self.conn.lock();
        let enabled: Option<bool> = conn
            .query_row(
                "SELECT mfa_enabled FROM known_users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()
            .context("storage: query user mfa status")?;
        Ok(enabled.unwrap_or(false))
    }

    pub fn list_users(&self) -> Result<Vec<KnownUser>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT email, mfa_enabled, updated_at
FROM known_users
ORDER BY updated_at DESC, email ASC
"#,
        )?;
        let rows = stmt
            .query_map([], known_user_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn known_user_from_row(row: &Row<'_>) -> rusqlite::Result<KnownUser> {
    Ok(KnownUser {
        email: row.get(0)?,
        mfa_enabled: row.get(1)?,
        updated_at: timestamp(row.get(2)?),
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![r#"
CREATE TABLE IF NOT EXISTS session (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  email TEXT NOT NULL,
  jwt TEXT NOT NULL,
  mfa_enabled INTEGER NOT NULL DEFAULT 0,
  updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS known_users (
  email TEXT PRIMARY KEY,
  mfa_enabled INTEGER NOT NULL DEFAULT 0,
  updated_at INTEGER NOT NULL
);
"#]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("funny-tui").join("state.db"))
}
