pub mod models;

use chrono::{DateTime, Utc};
use models::{Attachment, Conversation, Message, PatientDetails, Role};
use rusqlite::{params, Connection};
use std::str::FromStr;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub struct Database {
    pub conn: Mutex<Connection>,
}

impl Database {
    pub fn new(app_dir: &std::path::Path) -> StoreResult<Self> {
        std::fs::create_dir_all(app_dir).ok();
        let db_path = app_dir.join("health-assist.db");
        let conn = Connection::open(db_path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                content TEXT NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                created_at TEXT NOT NULL,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            );

            -- No foreign key on message_id: uploads may race ahead of the
            -- owning message and carry a staging id until send time.
            CREATE TABLE IF NOT EXISTS chat_attachments (
                id TEXT PRIMARY KEY,
                message_id TEXT,
                file_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                size INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS patient_details (
                user_id TEXT PRIMARY KEY,
                full_name TEXT NOT NULL,
                phone_number TEXT NOT NULL,
                email TEXT NOT NULL,
                initial_symptoms TEXT NOT NULL,
                age INTEGER,
                height REAL,
                weight REAL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    // ── Conversations ──

    pub fn create_conversation(&self, owner_id: &str, title: &str) -> StoreResult<Conversation> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO conversations (id, title, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, title, owner_id, created_at.to_rfc3339()],
        )?;
        Ok(Conversation {
            id,
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            created_at,
        })
    }

    /// Conversation list for one owner, newest first. The ordering is part of
    /// the query contract; rowid breaks ties between same-instant inserts.
    pub fn list_conversations(&self, owner_id: &str) -> StoreResult<Vec<Conversation>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, user_id, created_at FROM conversations
             WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![owner_id], |row| {
            Ok(Conversation {
                id: row.get(0)?,
                title: row.get(1)?,
                owner_id: row.get(2)?,
                created_at: parse_ts(&row.get::<_, String>(3)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Deletes the conversation row and everything under it. Messages cascade
    /// via their foreign key; attachment rows are removed explicitly since
    /// they have none.
    pub fn delete_conversation(&self, id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM chat_attachments WHERE message_id IN
             (SELECT id FROM chat_messages WHERE conversation_id = ?1)",
            params![id],
        )?;
        conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        Ok(())
    }

    // ── Messages ──

    pub fn append_message(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> StoreResult<Message> {
        let conn = self.conn.lock().unwrap();
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO chat_messages (id, conversation_id, content, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                conversation_id,
                content,
                role.as_str(),
                created_at.to_rfc3339()
            ],
        )?;
        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at,
            attachments: Vec::new(),
        })
    }

    /// Full transcript in chronological order, attachments included.
    pub fn list_messages(&self, conversation_id: &str) -> StoreResult<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, content, role, created_at FROM chat_messages
             WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id], |row| {
            let role_text: String = row.get(3)?;
            let role = Role::from_str(&role_text).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            Ok(Message {
                id: row.get(0)?,
                conversation_id: row.get(1)?,
                content: row.get(2)?,
                role,
                created_at: parse_ts(&row.get::<_, String>(4)?),
                attachments: Vec::new(),
            })
        })?;
        let mut messages = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)?;

        let mut att_stmt = conn.prepare(
            "SELECT id, message_id, file_name, file_path, content_type, size
             FROM chat_attachments WHERE message_id = ?1 ORDER BY rowid ASC",
        )?;
        for msg in &mut messages {
            let atts = att_stmt.query_map(params![msg.id], |row| {
                Ok(Attachment {
                    id: row.get(0)?,
                    message_id: row.get(1)?,
                    file_name: row.get(2)?,
                    file_path: row.get(3)?,
                    content_type: row.get(4)?,
                    size: row.get(5)?,
                })
            })?;
            msg.attachments = atts
                .collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::from)?;
        }
        Ok(messages)
    }

    pub fn update_message_content(&self, id: &str, new_content: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE chat_messages SET content = ?1 WHERE id = ?2",
            params![new_content, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("message {id}")));
        }
        Ok(())
    }

    // ── Attachments ──

    pub fn insert_attachment(&self, attachment: &Attachment) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO chat_attachments (id, message_id, file_name, file_path, content_type, size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attachment.id,
                attachment.message_id,
                attachment.file_name,
                attachment.file_path,
                attachment.content_type,
                attachment.size
            ],
        )?;
        Ok(())
    }

    /// Points staged attachment rows at the message the store just confirmed.
    pub fn link_attachments(&self, attachment_ids: &[String], message_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        for id in attachment_ids {
            conn.execute(
                "UPDATE chat_attachments SET message_id = ?1 WHERE id = ?2",
                params![message_id, id],
            )?;
        }
        Ok(())
    }

    // ── Intake ──

    pub fn has_patient_details(&self, user_id: &str) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM patient_details WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn save_patient_details(&self, details: &PatientDetails) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO patient_details
             (user_id, full_name, phone_number, email, initial_symptoms, age, height, weight, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                details.user_id,
                details.full_name,
                details.phone_number,
                details.email,
                details.initial_symptoms,
                details.age,
                details.height,
                details.weight,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    // ── Settings ──

    pub fn get_setting(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        );
        match result {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversations_list_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_conversation("u1", "first").unwrap();
        let b = db.create_conversation("u1", "second").unwrap();
        let c = db.create_conversation("u1", "third").unwrap();
        db.create_conversation("u2", "other user").unwrap();

        let list = db.list_conversations("u1").unwrap();
        let ids: Vec<&str> = list.iter().map(|conv| conv.id.as_str()).collect();
        assert_eq!(ids, vec![c.id.as_str(), b.id.as_str(), a.id.as_str()]);
    }

    #[test]
    fn messages_chronological_with_attachments() {
        let db = Database::open_in_memory().unwrap();
        let conv = db.create_conversation("u1", "New Consultation").unwrap();
        let m1 = db
            .append_message(&conv.id, Role::User, "I have a headache")
            .unwrap();
        let m2 = db
            .append_message(&conv.id, Role::Assistant, "How long have you had it?")
            .unwrap();

        let att = Attachment {
            id: "att-1".to_string(),
            message_id: None,
            file_name: "scan.pdf".to_string(),
            file_path: "abc.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 42,
        };
        db.insert_attachment(&att).unwrap();
        db.link_attachments(&["att-1".to_string()], &m1.id).unwrap();

        let messages = db.list_messages(&conv.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, m1.id);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].attachments.len(), 1);
        assert_eq!(messages[0].attachments[0].file_name, "scan.pdf");
        assert_eq!(messages[1].id, m2.id);
        assert!(messages[1].attachments.is_empty());
    }

    #[test]
    fn delete_conversation_cascades() {
        let db = Database::open_in_memory().unwrap();
        let conv = db.create_conversation("u1", "t").unwrap();
        let msg = db.append_message(&conv.id, Role::User, "hi").unwrap();
        let att = Attachment {
            id: "att-1".to_string(),
            message_id: Some(msg.id.clone()),
            file_name: "f.png".to_string(),
            file_path: "k.png".to_string(),
            content_type: "image/png".to_string(),
            size: 1,
        };
        db.insert_attachment(&att).unwrap();

        db.delete_conversation(&conv.id).unwrap();

        assert!(db.list_conversations("u1").unwrap().is_empty());
        assert!(db.list_messages(&conv.id).unwrap().is_empty());
        let conn = db.conn.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM chat_attachments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn update_message_content_edits_in_place() {
        let db = Database::open_in_memory().unwrap();
        let conv = db.create_conversation("u1", "t").unwrap();
        let first = db.append_message(&conv.id, Role::User, "my hed hurts").unwrap();
        db.append_message(&conv.id, Role::Assistant, "Sorry to hear that").unwrap();

        db.update_message_content(&first.id, "my head hurts").unwrap();

        let messages = db.list_messages(&conv.id).unwrap();
        assert_eq!(messages[0].content, "my head hurts");
        assert_eq!(messages[0].id, first.id);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn update_missing_message_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.update_message_content("nope", "x").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn intake_flag_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(!db.has_patient_details("u1").unwrap());
        db.save_patient_details(&PatientDetails {
            user_id: "u1".to_string(),
            full_name: "Ada Lovelace".to_string(),
            phone_number: "0123456789".to_string(),
            email: "ada@example.com".to_string(),
            initial_symptoms: "persistent cough for two weeks".to_string(),
            age: Some(36),
            height: None,
            weight: None,
        })
        .unwrap();
        assert!(db.has_patient_details("u1").unwrap());
        assert!(!db.has_patient_details("u2").unwrap());
    }

    #[test]
    fn settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.get_setting("openai_api_key").unwrap(), None);
        db.set_setting("openai_api_key", "sk-test").unwrap();
        assert_eq!(
            db.get_setting("openai_api_key").unwrap(),
            Some("sk-test".to_string())
        );
    }
}
