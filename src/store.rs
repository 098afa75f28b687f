//! SQLite persistence for rooms and messages.
//!
//! Two tables: `rooms` (unique join code) and `messages`, where
//! `messages.reply_to_id` points back into `messages`. Nothing is ever
//! deleted.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{Result, TextifyError};
use crate::models::{new_server_id, now_ms, Message, ReplyTo, Room};

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    user_name TEXT NOT NULL,
    is_ai INTEGER NOT NULL DEFAULT 0,
    room_id TEXT NOT NULL REFERENCES rooms(id),
    reply_to_id TEXT REFERENCES messages(id),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at);
"#;

/// Fields of a message about to be stored. The store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub content: &'a str,
    pub user_name: &'a str,
    pub room_id: &'a str,
    pub is_ai: bool,
    pub reply_to_id: Option<&'a str>,
}

/// Thread-safe handle over a single SQLite connection.
#[derive(Debug)]
pub struct ChatStore {
    conn: Mutex<Connection>,
}

impl ChatStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Private in-memory database, used by tests and `--ephemeral` runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock leaves the connection itself usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    pub fn find_room_by_code(&self, code: &str) -> Result<Option<Room>> {
        let conn = self.conn();
        let room = conn
            .query_row(
                "SELECT id, code, created_at FROM rooms WHERE code = ?1",
                params![code],
                room_from_row,
            )
            .optional()?;
        Ok(room)
    }

    pub fn room_exists(&self, room_id: &str) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM rooms WHERE id = ?1",
            params![room_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert a room for `code`. Fails with [`TextifyError::Conflict`] when the
    /// code is already taken.
    pub fn create_room(&self, code: &str) -> Result<Room> {
        let room = Room {
            id: new_server_id(),
            code: code.to_string(),
            created_at: now_ms(),
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rooms (id, code, created_at) VALUES (?1, ?2, ?3)",
            params![room.id, room.code, room.created_at as i64],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(ref f, _) if f.code == ErrorCode::ConstraintViolation => {
                TextifyError::Conflict("Room with this code already exists".to_string())
            }
            other => TextifyError::Store(other),
        })?;
        Ok(room)
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// Snapshot of message `id` if it belongs to `room_id`.
    pub fn reply_target(&self, room_id: &str, id: &str) -> Result<Option<ReplyTo>> {
        let conn = self.conn();
        let target = conn
            .query_row(
                "SELECT id, content, user_name, is_ai FROM messages WHERE id = ?1 AND room_id = ?2",
                params![id, room_id],
                |row| {
                    Ok(ReplyTo {
                        id: row.get(0)?,
                        content: row.get(1)?,
                        user_name: row.get(2)?,
                        is_ai: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(target)
    }

    /// Store a message and return it with its reply snapshot attached.
    pub fn insert_message(&self, new: NewMessage<'_>) -> Result<Message> {
        let reply_to = match new.reply_to_id {
            Some(target) => self.reply_target(new.room_id, target)?,
            None => None,
        };

        let message = Message {
            id: new_server_id(),
            content: new.content.to_string(),
            user_name: new.user_name.to_string(),
            is_ai: new.is_ai,
            room_id: new.room_id.to_string(),
            created_at: now_ms(),
            reply_to_id: new.reply_to_id.map(str::to_string),
            reply_to,
            status: None,
            is_new: false,
        };

        let conn = self.conn();
        conn.execute(
            "INSERT INTO messages (id, content, user_name, is_ai, room_id, reply_to_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.content,
                message.user_name,
                message.is_ai,
                message.room_id,
                message.reply_to_id,
                message.created_at as i64,
            ],
        )?;
        Ok(message)
    }

    /// All messages of a room, oldest first, with reply snapshots joined in.
    pub fn list_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.content, m.user_name, m.is_ai, m.room_id, m.created_at, m.reply_to_id,
                    r.id, r.content, r.user_name, r.is_ai
             FROM messages m
             LEFT JOIN messages r ON r.id = m.reply_to_id
             WHERE m.room_id = ?1
             ORDER BY m.created_at ASC, m.rowid ASC",
        )?;
        let rows = stmt.query_map(params![room_id], message_from_row)?;
        let messages = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(messages)
    }
}

fn room_from_row(row: &Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        code: row.get(1)?,
        created_at: row.get::<_, i64>(2)? as u64,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let reply_id: Option<String> = row.get(7)?;
    let reply_to = match reply_id {
        Some(id) => Some(ReplyTo {
            id,
            content: row.get(8)?,
            user_name: row.get(9)?,
            is_ai: row.get(10)?,
        }),
        None => None,
    };
    Ok(Message {
        id: row.get(0)?,
        content: row.get(1)?,
        user_name: row.get(2)?,
        is_ai: row.get(3)?,
        room_id: row.get(4)?,
        created_at: row.get::<_, i64>(5)? as u64,
        reply_to_id: row.get(6)?,
        reply_to,
        status: None,
        is_new: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_room() -> (ChatStore, Room) {
        let store = ChatStore::open_in_memory().expect("open");
        let room = store.create_room("ABCD").expect("create");
        (store, room)
    }

    fn plain<'a>(room: &'a Room, user: &'a str, content: &'a str) -> NewMessage<'a> {
        NewMessage {
            content,
            user_name: user,
            room_id: &room.id,
            is_ai: false,
            reply_to_id: None,
        }
    }

    #[test]
    fn test_create_and_find_room() {
        let (store, room) = store_with_room();
        let found = store.find_room_by_code("ABCD").expect("query").expect("room");
        assert_eq!(found, room);
        assert!(store.room_exists(&room.id).expect("query"));
        assert!(store.find_room_by_code("ZZZZ").expect("query").is_none());
    }

    #[test]
    fn test_duplicate_code_is_conflict() {
        let (store, _) = store_with_room();
        let err = store.create_room("ABCD").unwrap_err();
        assert!(matches!(err, TextifyError::Conflict(_)));
    }

    #[test]
    fn test_codes_are_case_sensitive() {
        let (store, _) = store_with_room();
        assert!(store.create_room("abcd").is_ok());
    }

    #[test]
    fn test_messages_listed_oldest_first() {
        let (store, room) = store_with_room();
        for text in ["one", "two", "three"] {
            store.insert_message(plain(&room, "Alice", text)).expect("insert");
        }
        let contents: Vec<String> = store
            .list_messages(&room.id)
            .expect("list")
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_messages_scoped_to_room() {
        let (store, room) = store_with_room();
        let other = store.create_room("EFGH").expect("create");
        store.insert_message(plain(&room, "Alice", "here")).expect("insert");
        store.insert_message(plain(&other, "Bob", "there")).expect("insert");
        let listed = store.list_messages(&other.id).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].content, "there");
    }

    #[test]
    fn test_reply_snapshot_is_joined() {
        let (store, room) = store_with_room();
        let first = store.insert_message(plain(&room, "Alice", "question?")).expect("insert");
        let reply = store
            .insert_message(NewMessage {
                reply_to_id: Some(&first.id),
                ..plain(&room, "Bob", "answer")
            })
            .expect("insert");
        assert_eq!(reply.reply_to.as_ref().map(|r| r.content.as_str()), Some("question?"));

        let listed = store.list_messages(&room.id).expect("list");
        let snapshot = listed[1].reply_to.as_ref().expect("snapshot");
        assert_eq!(snapshot.id, first.id);
        assert_eq!(snapshot.user_name, "Alice");
        assert!(!snapshot.is_ai);
        assert!(listed[0].reply_to.is_none());
    }

    #[test]
    fn test_reply_target_must_be_in_room() {
        let (store, room) = store_with_room();
        let other = store.create_room("EFGH").expect("create");
        let elsewhere = store.insert_message(plain(&other, "Bob", "hi")).expect("insert");
        assert!(store.reply_target(&room.id, &elsewhere.id).expect("query").is_none());
        assert!(store.reply_target(&other.id, &elsewhere.id).expect("query").is_some());
    }

    #[test]
    fn test_unknown_room_rejected_by_foreign_key() {
        let store = ChatStore::open_in_memory().expect("open");
        let err = store
            .insert_message(NewMessage {
                content: "x",
                user_name: "Alice",
                room_id: "missing",
                is_ai: false,
                reply_to_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, TextifyError::Store(_)));
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("chat.db");
        {
            let store = ChatStore::open(&path).expect("open");
            let room = store.create_room("KEEP").expect("create");
            store.insert_message(plain(&room, "Alice", "persisted")).expect("insert");
        }
        let store = ChatStore::open(&path).expect("reopen");
        let room = store.find_room_by_code("KEEP").expect("query").expect("room");
        assert_eq!(store.list_messages(&room.id).expect("list")[0].content, "persisted");
    }
}
