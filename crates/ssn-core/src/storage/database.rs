//! SQLite-backed repository.

use super::models::{
    post_hash, Circle, CircleCreator, Contact, ContactStatus, IncomingPost, PendingKind, Post,
    ProfileField,
};
use super::repository::Repository;
use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::identity::{NodeIdentity, OnionAddress};
use crate::logging::RedactedOnion;
use crate::security_event;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: PathBuf,
    /// Whether to use in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(super::DEFAULT_DB_NAME),
            in_memory: false,
        }
    }
}

const POST_COLUMNS: &str = "P.id, P.message, P.posted_at, P.published_at, P.remote_published_at, \
     P.ttl, A.onion, O.onion, P.hash, P.parent_id, P.parent_hash, P.published, P.deleted";

const POST_FROM: &str = "FROM posts AS P \
     JOIN onions AS A ON A.id = P.author_id \
     JOIN onions AS O ON O.id = P.originator_id";

const CONTACT_SELECT: &str = "SELECT C.id, O.onion, C.alias, C.status, C.request_message \
     FROM contacts AS C JOIN onions AS O ON O.id = C.onion_id";

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn onion_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<OnionAddress> {
    let s: String = row.get(idx)?;
    OnionAddress::from_string(s)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get(0)?,
        message: row.get(1)?,
        posted_at: row.get(2)?,
        published_at: row.get(3)?,
        remote_published_at: row.get(4)?,
        ttl: row.get(5)?,
        author: onion_column(row, 6)?,
        originator: onion_column(row, 7)?,
        hash: row.get(8)?,
        parent_id: row.get(9)?,
        parent_hash: row.get(10)?,
        published: row.get(11)?,
        deleted: row.get(12)?,
    })
}

fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let status: i64 = row.get(3)?;
    Ok(Contact {
        id: row.get(0)?,
        onion: onion_column(row, 1)?,
        alias: row.get(2)?,
        status: ContactStatus::from_i64(status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Integer, Box::new(e)))?,
        request_message: row.get(4)?,
    })
}

fn circle_from_row(row: &Row<'_>) -> rusqlite::Result<Circle> {
    let creator: String = row.get(2)?;
    Ok(Circle {
        id: row.get(0)?,
        name: row.get(1)?,
        creator: CircleCreator::parse(&creator),
    })
}

fn profile_from_row(row: &Row<'_>) -> rusqlite::Result<ProfileField> {
    Ok(ProfileField {
        key: row.get(0)?,
        value: row.get(1)?,
        changed_at: row.get(2)?,
    })
}

/// Database handle.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            // Create parent directories if needed
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
            }

            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = DELETE;
            PRAGMA secure_delete = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )
        .map_err(|e| Error::Storage(format!("failed to set pragmas: {}", e)))?;

        let db = Self { conn };
        db.init_schema()?;

        Ok(db)
    }

    /// Open a fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&DatabaseConfig {
            path: PathBuf::new(),
            in_memory: true,
        })
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    fn self_onion_id(&self) -> Result<i64> {
        self.conn
            .query_row("SELECT onion_id FROM identity WHERE id = 1", [], |row| row.get(0))
            .optional()?
            .ok_or_else(|| Error::NotFound("local identity".into()))
    }

    fn onion_id(&self, onion: &OnionAddress) -> Result<Option<i64>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id FROM onions WHERE onion = ?",
                params![onion.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn contact_by_id(&self, id: i64) -> Result<Option<Contact>> {
        Ok(self
            .conn
            .query_row(
                &format!("{} WHERE C.id = ?", CONTACT_SELECT),
                params![id],
                contact_from_row,
            )
            .optional()?)
    }

    fn is_member(&self, circle: &Circle, onion: &OnionAddress) -> Result<bool> {
        let contact = match self.contact_by_onion(onion)? {
            Some(c) => c,
            None => return Ok(false),
        };
        if circle.is_public() {
            return Ok(true);
        }
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM circle_contacts WHERE circle_id = ? AND contact_id = ?",
                params![circle.id, contact.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_post_to_circle(&self, circle_id: i64, post_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO circle_posts (circle_id, post_id) VALUES (?, ?)",
            params![circle_id, post_id],
        )?;
        Ok(())
    }

    /// Put a comment on one of our own posts into the parent's circles.
    ///
    /// For pulled comments the originator must itself be able to see the
    /// parent, otherwise a peer could inject content into circles it was
    /// never part of by naming a parent hash.
    fn redirect_comment(&self, comment: &Post, check_originator: bool) -> Result<()> {
        let parent = match self.post_by_id(comment.parent_id)? {
            Some(p) => p,
            None => return Ok(()),
        };
        if parent.author != self.self_onion()? {
            return Ok(());
        }

        let circles = self.post_circles(parent.id)?;
        if check_originator {
            let mut allowed = false;
            for circle in &circles {
                if self.is_member(circle, &comment.originator)? {
                    allowed = true;
                    break;
                }
            }
            if !allowed {
                security_event!(
                    originator = %RedactedOnion(comment.originator.as_str()),
                    parent = parent.id,
                    "Comment originator cannot see the parent post, not redirecting"
                );
                return Ok(());
            }
        }

        for circle in &circles {
            tracing::debug!(circle = %circle.name, comment = comment.id, "Redirecting comment");
            self.add_post_to_circle(circle.id, comment.id)?;
        }
        Ok(())
    }

    fn require_post(&self, post_id: i64) -> Result<Post> {
        self.post_by_id(post_id)?
            .ok_or_else(|| Error::NotFound(format!("post {}", post_id)))
    }
}

impl Repository for Database {
    fn store_identity_pem(&self, onion: &OnionAddress, pem: &str) -> Result<()> {
        let onion_id = self.get_or_create_onion(onion)?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO identity (id, onion_id, pem_key, created_at) VALUES (1, ?, ?, ?)",
                params![onion_id, pem, now()],
            )
            .map_err(|e| Error::Storage(format!("failed to store identity: {}", e)))?;
        Ok(())
    }

    fn load_identity(&self) -> Result<Option<NodeIdentity>> {
        let pem: Option<String> = self
            .conn
            .query_row("SELECT pem_key FROM identity WHERE id = 1", [], |row| row.get(0))
            .optional()?;

        match pem {
            Some(pem) => Ok(Some(NodeIdentity::from_pem(&pem)?)),
            None => Ok(None),
        }
    }

    fn self_onion(&self) -> Result<OnionAddress> {
        self.conn
            .query_row(
                "SELECT O.onion FROM identity AS I JOIN onions AS O ON O.id = I.onion_id WHERE I.id = 1",
                [],
                |row| onion_column(row, 0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound("local identity".into()))
    }

    fn get_or_create_onion(&self, onion: &OnionAddress) -> Result<i64> {
        self.conn.execute(
            "INSERT OR IGNORE INTO onions (onion) VALUES (?)",
            params![onion.as_str()],
        )?;
        self.onion_id(onion)?
            .ok_or_else(|| Error::Storage("onion insert vanished".into()))
    }

    fn add_contact(
        &self,
        onion: &OnionAddress,
        alias: &str,
        status: ContactStatus,
        request_message: &str,
    ) -> Result<Contact> {
        let onion_id = self.get_or_create_onion(onion)?;
        self.conn
            .execute(
                r#"
                INSERT INTO contacts (onion_id, alias, status, request_message, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![onion_id, alias, status.as_i64(), request_message, now()],
            )
            .map_err(|e| Error::Storage(format!("failed to add contact: {}", e)))?;

        let id = self.conn.last_insert_rowid();
        self.contact_by_id(id)?
            .ok_or_else(|| Error::Storage("contact insert vanished".into()))
    }

    fn contact_by_onion(&self, onion: &OnionAddress) -> Result<Option<Contact>> {
        Ok(self
            .conn
            .query_row(
                &format!("{} WHERE O.onion = ?", CONTACT_SELECT),
                params![onion.as_str()],
                contact_from_row,
            )
            .optional()?)
    }

    fn friendly_contact_by_onion(&self, onion: &OnionAddress) -> Result<Option<Contact>> {
        Ok(self
            .contact_by_onion(onion)?
            .filter(|c| c.status.is_friendly()))
    }

    fn contacts_with_status(&self, statuses: &[ContactStatus]) -> Result<Vec<Contact>> {
        Ok(self
            .all_contacts()?
            .into_iter()
            .filter(|c| statuses.contains(&c.status))
            .collect())
    }

    fn all_contacts(&self) -> Result<Vec<Contact>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY C.id", CONTACT_SELECT))?;
        let rows = stmt.query_map([], contact_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_contact_status(&self, contact_id: i64, status: ContactStatus) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE contacts SET status = ? WHERE id = ?",
            params![status.as_i64(), contact_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("contact {}", contact_id)));
        }
        Ok(())
    }

    fn promote_to_success(&self, contact: &Contact) -> Result<Circle> {
        let tx = self.conn.unchecked_transaction()?;

        self.set_contact_status(contact.id, ContactStatus::Success)?;
        let circle = match self.circle_by_name(&contact.alias)? {
            Some(circle) => circle,
            None => self.create_circle(&contact.alias, CircleCreator::App)?,
        };
        self.add_contact_to_circle(circle.id, contact.id)?;
        self.mark_pending(PendingKind::Contacts)?;

        tx.commit()?;

        tracing::info!(
            alias = %contact.alias,
            circle = %circle.name,
            "Contact promoted to SUCCESS"
        );
        Ok(circle)
    }

    fn circle_by_name(&self, name: &str) -> Result<Option<Circle>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, creator FROM circles WHERE name = ?",
                params![name],
                circle_from_row,
            )
            .optional()?)
    }

    fn circle_by_id(&self, id: i64) -> Result<Option<Circle>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, creator FROM circles WHERE id = ?",
                params![id],
                circle_from_row,
            )
            .optional()?)
    }

    fn create_circle(&self, name: &str, creator: CircleCreator) -> Result<Circle> {
        self.conn
            .execute(
                "INSERT INTO circles (name, creator) VALUES (?, ?)",
                params![name, creator.as_str()],
            )
            .map_err(|e| Error::Storage(format!("failed to create circle: {}", e)))?;
        let id = self.conn.last_insert_rowid();
        self.circle_by_id(id)?
            .ok_or_else(|| Error::Storage("circle insert vanished".into()))
    }

    fn add_contact_to_circle(&self, circle_id: i64, contact_id: i64) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO circle_contacts (circle_id, contact_id) VALUES (?, ?)",
            params![circle_id, contact_id],
        )?;
        Ok(())
    }

    fn circle_contacts(&self, circle: &Circle) -> Result<Vec<Contact>> {
        if circle.is_public() {
            return self.all_contacts();
        }
        let mut stmt = self.conn.prepare(&format!(
            "{} JOIN circle_contacts AS CC ON CC.contact_id = C.id WHERE CC.circle_id = ? ORDER BY C.id",
            CONTACT_SELECT
        ))?;
        let rows = stmt.query_map(params![circle.id], contact_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn post_circles(&self, post_id: i64) -> Result<Vec<Circle>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT C.id, C.name, C.creator FROM circles AS C
            JOIN circle_posts AS CP ON CP.circle_id = C.id
            WHERE CP.post_id = ? ORDER BY C.id
            "#,
        )?;
        let rows = stmt.query_map(params![post_id], circle_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_local_post(&self, message: &str, ttl: u8, circle_ids: &[i64]) -> Result<Post> {
        let me = self.self_onion()?;
        let me_id = self.get_or_create_onion(&me)?;
        let ts = now();
        let hash = post_hash(message, &me, &me, ts, "");

        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute(
                r#"
                INSERT INTO posts
                (message, posted_at, published_at, remote_published_at, ttl, author_id,
                 originator_id, hash, parent_id, parent_hash, published, deleted)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0, '', 1, 0)
                "#,
                params![message, ts, ts, ts, ttl, me_id, me_id, hash],
            )
            .map_err(|e| Error::Storage(format!("failed to store post: {}", e)))?;
        let id = self.conn.last_insert_rowid();
        for circle_id in circle_ids {
            self.add_post_to_circle(*circle_id, id)?;
        }
        tx.commit()?;

        self.require_post(id)
    }

    fn create_local_comment(&self, parent_id: i64, message: &str, ttl: u8) -> Result<Post> {
        let parent = self.require_post(parent_id)?;
        let me = self.self_onion()?;
        let me_id = self.get_or_create_onion(&me)?;
        let originator_id = self.get_or_create_onion(&parent.originator)?;
        let ts = now();
        let remote_published_at = if parent.originator == me { ts } else { 0 };
        let hash = post_hash(message, &me, &parent.originator, ts, &parent.hash);

        let tx = self.conn.unchecked_transaction()?;
        self.conn
            .execute(
                r#"
                INSERT INTO posts
                (message, posted_at, published_at, remote_published_at, ttl, author_id,
                 originator_id, hash, parent_id, parent_hash, published, deleted)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, 0)
                "#,
                params![
                    message,
                    ts,
                    ts,
                    remote_published_at,
                    ttl,
                    me_id,
                    originator_id,
                    hash,
                    parent.id,
                    parent.hash,
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to store comment: {}", e)))?;
        let comment = self.require_post(self.conn.last_insert_rowid())?;
        self.redirect_comment(&comment, false)?;
        tx.commit()?;

        Ok(comment)
    }

    fn upsert_post(&self, post: &IncomingPost) -> Result<Option<Post>> {
        let (parent_id, deleted) = if post.parent_hash.is_empty() {
            (0, false)
        } else {
            match self.post_by_hash(&post.parent_hash)? {
                Some(parent) => (parent.id, parent.deleted),
                None => {
                    tracing::warn!(
                        parent_hash = %post.parent_hash,
                        "Parent of pulled comment not found, skipping"
                    );
                    return Ok(None);
                }
            }
        };

        let author_id = self.get_or_create_onion(&post.author)?;
        let originator_id = self.get_or_create_onion(&post.originator)?;
        let hash = post.content_hash();

        let existing: Option<i64> = self
            .conn
            .query_row("SELECT id FROM posts WHERE hash = ?", params![hash], |row| row.get(0))
            .optional()?;

        let id = match existing {
            Some(id) => {
                self.conn.execute(
                    r#"
                    UPDATE posts SET ttl = ?, remote_published_at = ?, parent_id = ?, deleted = ?
                    WHERE id = ?
                    "#,
                    params![post.ttl, post.published_at, parent_id, deleted, id],
                )?;
                id
            }
            None => {
                self.conn.execute(
                    r#"
                    INSERT INTO posts
                    (message, posted_at, published_at, remote_published_at, ttl, author_id,
                     originator_id, hash, parent_id, parent_hash, published, deleted)
                    VALUES (?, ?, 0, ?, ?, ?, ?, ?, ?, ?, 0, ?)
                    "#,
                    params![
                        post.message,
                        post.posted_at,
                        post.published_at,
                        post.ttl,
                        author_id,
                        originator_id,
                        hash,
                        parent_id,
                        post.parent_hash,
                        deleted,
                    ],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        let stored = self.require_post(id)?;
        if stored.is_comment() {
            self.redirect_comment(&stored, true)?;
        }
        Ok(Some(stored))
    }

    fn publish_post(&self, post_id: i64) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE posts SET published = 1, published_at = ? WHERE id = ? AND published = 0",
            params![now(), post_id],
        )?;
        Ok(changed > 0)
    }

    fn post_by_id(&self, post_id: i64) -> Result<Option<Post>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} {} WHERE P.id = ?", POST_COLUMNS, POST_FROM),
                params![post_id],
                post_from_row,
            )
            .optional()?)
    }

    fn post_by_hash(&self, hash: &str) -> Result<Option<Post>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} {} WHERE P.hash = ?", POST_COLUMNS, POST_FROM),
                params![hash],
                post_from_row,
            )
            .optional()?)
    }

    fn posts_visible_to(&self, contact: Option<&Contact>, since: i64) -> Result<Vec<Post>> {
        let me_id = self.self_onion_id()?;
        let contact_id = contact.map(|c| c.id);

        let sql = format!(
            r#"
            SELECT {} {}
            WHERE P.published = 1 AND P.deleted = 0 AND P.ttl > 0 AND P.published_at > ?1
            AND (
                P.id IN (SELECT CP.post_id FROM circle_posts AS CP
                         JOIN circles AS C ON C.id = CP.circle_id
                         WHERE C.name = 'Public')
                OR (?2 IS NOT NULL AND P.id IN (
                         SELECT CP.post_id FROM circle_posts AS CP
                         JOIN circle_contacts AS CC ON CC.circle_id = CP.circle_id
                         WHERE CC.contact_id = ?2))
                OR (?2 IS NOT NULL AND P.parent_id != 0 AND P.author_id = ?3
                    AND P.originator_id = (SELECT onion_id FROM contacts WHERE id = ?2))
            )
            ORDER BY P.id
            "#,
            POST_COLUMNS, POST_FROM
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![since, contact_id, me_id], post_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn set_local_profile(
        &self,
        key: &str,
        value: &str,
        circle_ids: &[i64],
    ) -> Result<ProfileField> {
        let me = self.self_onion()?;
        let me_id = self.get_or_create_onion(&me)?;
        let ts = now();

        let tx = self.conn.unchecked_transaction()?;
        self.conn.execute(
            r#"
            INSERT INTO profiles (onion_id, key, value, changed_at) VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (onion_id, key) DO UPDATE SET value = ?3, changed_at = ?4
            "#,
            params![me_id, key, value, ts],
        )?;
        let profile_id: i64 = self.conn.query_row(
            "SELECT id FROM profiles WHERE onion_id = ? AND key = ?",
            params![me_id, key],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "DELETE FROM circle_profiles WHERE profile_id = ?",
            params![profile_id],
        )?;
        for circle_id in circle_ids {
            self.conn.execute(
                "INSERT OR IGNORE INTO circle_profiles (circle_id, profile_id) VALUES (?, ?)",
                params![circle_id, profile_id],
            )?;
        }
        tx.commit()?;

        Ok(ProfileField {
            key: key.to_string(),
            value: value.to_string(),
            changed_at: ts,
        })
    }

    fn profiles_visible_to(
        &self,
        contact: Option<&Contact>,
        since: i64,
    ) -> Result<Vec<ProfileField>> {
        let me_id = self.self_onion_id()?;
        let contact_id = contact.map(|c| c.id);

        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT P.key, P.value, P.changed_at, P.id FROM profiles AS P
            JOIN circle_profiles AS CP ON CP.profile_id = P.id
            JOIN circles AS C ON C.id = CP.circle_id
            WHERE P.onion_id = ?1
            AND (C.name = 'Public'
                 OR (?2 IS NOT NULL AND C.id IN
                     (SELECT circle_id FROM circle_contacts WHERE contact_id = ?2)))
            ORDER BY P.id
            "#,
        )?;
        let rows = stmt.query_map(params![me_id, contact_id], profile_from_row)?;
        let profiles = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        if profiles.iter().any(|p| p.changed_at > since) {
            Ok(profiles)
        } else {
            Ok(Vec::new())
        }
    }

    fn replace_profiles(&self, onion: &OnionAddress, profiles: &[ProfileField]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        self.replace_profiles_in_tx(onion, profiles)?;
        tx.commit()?;
        Ok(())
    }

    fn profiles_of(&self, onion: &OnionAddress) -> Result<Vec<ProfileField>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT P.key, P.value, P.changed_at FROM profiles AS P
            JOIN onions AS O ON O.id = P.onion_id
            WHERE O.onion = ? ORDER BY P.id
            "#,
        )?;
        let rows = stmt.query_map(params![onion.as_str()], profile_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn last_activity(&self, contact: &Contact) -> Result<i64> {
        let ts: Option<i64> = self
            .conn
            .query_row(
                r#"
                SELECT MAX(
                    IFNULL((SELECT MAX(remote_published_at) FROM posts WHERE originator_id = C.onion_id), 0),
                    IFNULL((SELECT MAX(changed_at) FROM profiles WHERE onion_id = C.onion_id), 0))
                FROM contacts AS C WHERE C.id = ?
                "#,
                params![contact.id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts.unwrap_or(0))
    }

    fn mark_pending(&self, kind: PendingKind) -> Result<()> {
        self.conn.execute(
            &format!("UPDATE pending SET {} = 1 WHERE id = 1", kind.column()),
            [],
        )?;
        Ok(())
    }

    fn take_pending(&self, kind: PendingKind) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let set: bool = self.conn.query_row(
            &format!("SELECT {} FROM pending WHERE id = 1", kind.column()),
            [],
            |row| row.get(0),
        )?;
        if set {
            self.conn.execute(
                &format!("UPDATE pending SET {} = 0 WHERE id = 1", kind.column()),
                [],
            )?;
        }
        tx.commit()?;
        Ok(set)
    }

    fn merge_pull(
        &self,
        onion: &OnionAddress,
        posts: &[IncomingPost],
        profiles: &[ProfileField],
    ) -> Result<Vec<Post>> {
        let tx = self.conn.unchecked_transaction()?;

        self.replace_profiles_in_tx(onion, profiles)?;

        let mut stored = Vec::with_capacity(posts.len());
        for post in posts {
            if let Some(p) = self.upsert_post(post)? {
                stored.push(p);
            }
        }
        if !posts.is_empty() {
            self.mark_pending(PendingKind::Posts)?;
        }

        tx.commit()?;
        Ok(stored)
    }
}

impl Database {
    // SQLite has no nested transactions; merge_pull already holds one.
    fn replace_profiles_in_tx(
        &self,
        onion: &OnionAddress,
        profiles: &[ProfileField],
    ) -> Result<()> {
        if profiles.is_empty() {
            return Ok(());
        }
        let onion_id = self.get_or_create_onion(onion)?;
        self.conn.execute(
            "DELETE FROM circle_profiles WHERE profile_id IN (SELECT id FROM profiles WHERE onion_id = ?)",
            params![onion_id],
        )?;
        self.conn
            .execute("DELETE FROM profiles WHERE onion_id = ?", params![onion_id])?;
        for p in profiles {
            self.conn.execute(
                "INSERT OR REPLACE INTO profiles (onion_id, key, value, changed_at) VALUES (?, ?, ?, ?)",
                params![onion_id, p.key, p.value, p.changed_at],
            )?;
        }
        Ok(())
    }
}
