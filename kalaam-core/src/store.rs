use crate::error::{CoreError, Result};
use crate::model::{
    Category, DisplaySettings, GlobalSettings, Lyric, NewLyric, NewUser, ProfileUpdate,
    SubCategory, User, UserRole,
};
use crate::seed;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA_SQL: &str = r"
-- Single-row application switches
CREATE TABLE IF NOT EXISTS global_settings (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    is_signup_enabled INTEGER NOT NULL,
    is_login_enabled INTEGER NOT NULL,
    logo_url TEXT
);

CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    name TEXT NOT NULL,
    email TEXT NOT NULL UNIQUE,
    phone TEXT NOT NULL,
    role TEXT NOT NULL,
    is_enabled INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

-- Personal libraries, keyed by owner
CREATE TABLE IF NOT EXISTS categories (
    user_id TEXT NOT NULL,
    id TEXT NOT NULL,
    name TEXT NOT NULL,
    serial INTEGER NOT NULL,
    PRIMARY KEY (user_id, id),
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS sub_categories (
    user_id TEXT NOT NULL,
    id TEXT NOT NULL,
    category_id TEXT NOT NULL,
    name TEXT NOT NULL,
    serial INTEGER NOT NULL,
    PRIMARY KEY (user_id, id),
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS lyrics (
    user_id TEXT NOT NULL,
    id TEXT NOT NULL,
    sub_category_id TEXT NOT NULL,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    serial INTEGER NOT NULL,
    audio_url TEXT,
    PRIMARY KEY (user_id, id),
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS favorites (
    user_id TEXT NOT NULL,
    lyric_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (user_id, lyric_id),
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS display_settings (
    user_id TEXT PRIMARY KEY,
    background_color TEXT NOT NULL,
    text_color TEXT NOT NULL,
    font_size INTEGER NOT NULL,
    line_height REAL NOT NULL,
    FOREIGN KEY (user_id) REFERENCES profiles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_sub_categories_category ON sub_categories(user_id, category_id);
CREATE INDEX IF NOT EXISTS idx_lyrics_sub_category ON lyrics(user_id, sub_category_id);
";

const PROFILE_COLUMNS: &str = "id, username, name, email, phone, role, is_enabled, created_at";
const LYRIC_COLUMNS: &str = "id, user_id, sub_category_id, title, content, serial, audio_url";

/// Storage for accounts, personal libraries and settings
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn global_settings(&self) -> Result<GlobalSettings>;
    async fn save_global_settings(&self, settings: &GlobalSettings) -> Result<()>;

    async fn register(&self, new_user: NewUser) -> Result<User>;
    async fn login(&self, email: &str) -> Result<User>;
    async fn user(&self, user_id: &str) -> Result<Option<User>>;
    async fn update_user_enabled(&self, user_id: &str, enabled: bool) -> Result<()>;
    /// Change a profile's own details, returning the stored result
    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User>;
    async fn users(&self) -> Result<Vec<User>>;

    async fn seed_user_data(&self, user_id: &str) -> Result<()>;
    async fn categories(&self, user_id: &str) -> Result<Vec<Category>>;
    async fn add_category(&self, user_id: &str, name: &str) -> Result<Category>;
    async fn sub_categories(
        &self,
        user_id: &str,
        category_id: Option<&str>,
    ) -> Result<Vec<SubCategory>>;
    async fn add_sub_category(
        &self,
        user_id: &str,
        category_id: &str,
        name: &str,
    ) -> Result<SubCategory>;
    async fn lyrics(&self, user_id: &str, sub_category_id: Option<&str>) -> Result<Vec<Lyric>>;
    async fn lyric(&self, user_id: &str, lyric_id: &str) -> Result<Option<Lyric>>;
    async fn add_lyric(&self, user_id: &str, lyric: NewLyric) -> Result<Lyric>;
    async fn search_lyrics(
        &self,
        user_id: &str,
        query: &str,
        favorites_only: bool,
    ) -> Result<Vec<Lyric>>;

    /// Flip the favorite flag, returning the new state
    async fn toggle_favorite(&self, user_id: &str, lyric_id: &str) -> Result<bool>;
    async fn favorites(&self, user_id: &str) -> Result<Vec<String>>;

    async fn display_settings(&self, user_id: &str) -> Result<DisplaySettings>;
    async fn save_display_settings(&self, user_id: &str, settings: &DisplaySettings) -> Result<()>;
}

/// SQLite-backed library store
pub struct LibraryStore {
    conn: Connection,
}

impl LibraryStore {
    /// Open the store at the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created or opened.
    pub async fn new() -> Result<Self> {
        let path = crate::paths::library_db_path();
        Self::open(&path).await
    }

    /// Open a store at a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: &Path) -> Result<Self> {
        info!("Opening library database at {:?}", path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(())
        })
        .await?;

        Self::initialize(conn).await
    }

    /// Open a throwaway in-memory store
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA_SQL)?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            Ok(())
        })
        .await?;

        info!("Library database initialized");
        Ok(Self { conn })
    }

    /// Checkpoint WAL for clean shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL checkpoint fails.
    pub async fn checkpoint(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = normalize_email(email);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE email = ?1"
                ))?;
                Ok(stmt.query_row([email], profile_from_row).optional()?)
            })
            .await
            .map_err(Into::into)
    }
}

#[async_trait]
impl ContentRepository for LibraryStore {
    async fn global_settings(&self) -> Result<GlobalSettings> {
        self.conn
            .call(|conn| {
                let settings = conn
                    .query_row(
                        "SELECT is_signup_enabled, is_login_enabled, logo_url \
                         FROM global_settings WHERE id = 1",
                        [],
                        |row| {
                            Ok(GlobalSettings {
                                is_signup_enabled: row.get(0)?,
                                is_login_enabled: row.get(1)?,
                                logo_url: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(settings.unwrap_or_default())
            })
            .await
            .map_err(Into::into)
    }

    async fn save_global_settings(&self, settings: &GlobalSettings) -> Result<()> {
        info!(
            "Saving global settings: signup={}, login={}",
            settings.is_signup_enabled, settings.is_login_enabled
        );
        let settings = settings.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO global_settings (id, is_signup_enabled, is_login_enabled, logo_url)
                    VALUES (1, ?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET
                        is_signup_enabled = excluded.is_signup_enabled,
                        is_login_enabled = excluded.is_login_enabled,
                        logo_url = excluded.logo_url
                ",
                    rusqlite::params![
                        settings.is_signup_enabled,
                        settings.is_login_enabled,
                        settings.logo_url
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn register(&self, new_user: NewUser) -> Result<User> {
        let email = normalize_email(&new_user.email);
        if !email.contains('@') {
            return Err(CoreError::InvalidInput {
                reason: format!("'{}' is not an email address", new_user.email),
            });
        }
        if new_user.username.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                reason: "username must not be empty".to_string(),
            });
        }
        if !self.global_settings().await?.is_signup_enabled {
            return Err(CoreError::SignupDisabled);
        }

        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now().timestamp_millis();
        info!("Registering account {} ({})", email, id);

        let existing_email = email.clone();
        let user = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let taken: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM profiles WHERE email = ?1)",
                    [&email],
                    |row| row.get(0),
                )?;
                if taken {
                    return Ok(None);
                }

                let is_first: bool =
                    tx.query_row("SELECT NOT EXISTS(SELECT 1 FROM profiles)", [], |row| {
                        row.get(0)
                    })?;
                let user = User {
                    id,
                    username: new_user.username.trim().to_string(),
                    name: new_user.name.trim().to_string(),
                    email,
                    phone: new_user.phone.trim().to_string(),
                    role: if is_first {
                        UserRole::Admin
                    } else {
                        UserRole::User
                    },
                    is_enabled: true,
                    created_at,
                };

                tx.execute(
                    &format!(
                        "INSERT INTO profiles ({PROFILE_COLUMNS}) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                    ),
                    rusqlite::params![
                        user.id,
                        user.username,
                        user.name,
                        user.email,
                        user.phone,
                        user.role.as_str(),
                        user.is_enabled,
                        user.created_at
                    ],
                )?;
                insert_seed(&tx, &user.id)?;
                tx.commit()?;

                Ok(Some(user))
            })
            .await?;

        user.ok_or(CoreError::AlreadyExists {
            kind: "account",
            id: existing_email,
        })
    }

    async fn login(&self, email: &str) -> Result<User> {
        let user = self
            .user_by_email(email)
            .await?
            .ok_or_else(|| CoreError::not_found("account", normalize_email(email)))?;

        if !user.is_enabled {
            return Err(CoreError::AccountDisabled);
        }
        if !user.is_admin() && !self.global_settings().await?.is_login_enabled {
            return Err(CoreError::LoginDisabled);
        }

        debug!("Signed in {} as {}", user.email, user.role);
        Ok(user)
    }

    async fn user(&self, user_id: &str) -> Result<Option<User>> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"
                ))?;
                Ok(stmt.query_row([user_id], profile_from_row).optional()?)
            })
            .await
            .map_err(Into::into)
    }

    async fn update_user_enabled(&self, user_id: &str, enabled: bool) -> Result<()> {
        info!("Setting account {} enabled={}", user_id, enabled);
        let id = user_id.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE profiles SET is_enabled = ?1 WHERE id = ?2",
                    rusqlite::params![enabled, id],
                )?)
            })
            .await?;

        if updated == 0 {
            return Err(CoreError::not_found("account", user_id));
        }
        Ok(())
    }

    async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<User> {
        let email = update.email.as_deref().map(normalize_email);
        if let Some(email) = &email {
            if !email.contains('@') {
                return Err(CoreError::InvalidInput {
                    reason: format!("'{email}' is not an email address"),
                });
            }
        }
        let name = update.name.as_deref().map(str::trim).map(str::to_string);
        let phone = update.phone.as_deref().map(str::trim).map(str::to_string);

        info!("Updating profile of account {}", user_id);
        let id = user_id.to_string();
        let taken_email = email.clone();
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let current = tx
                    .query_row(
                        &format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?1"),
                        [&id],
                        profile_from_row,
                    )
                    .optional()?;
                let Some(mut user) = current else {
                    return Ok(ProfileOutcome::Missing);
                };

                if let Some(email) = email {
                    let taken: bool = tx.query_row(
                        "SELECT EXISTS(SELECT 1 FROM profiles WHERE email = ?1 AND id != ?2)",
                        [&email, &id],
                        |row| row.get(0),
                    )?;
                    if taken {
                        return Ok(ProfileOutcome::EmailTaken);
                    }
                    user.email = email;
                }
                if let Some(name) = name {
                    user.name = name;
                }
                if let Some(phone) = phone {
                    user.phone = phone;
                }

                tx.execute(
                    "UPDATE profiles SET name = ?1, email = ?2, phone = ?3 WHERE id = ?4",
                    rusqlite::params![user.name, user.email, user.phone, user.id],
                )?;
                tx.commit()?;
                Ok(ProfileOutcome::Updated(user))
            })
            .await?;

        match outcome {
            ProfileOutcome::Updated(user) => Ok(user),
            ProfileOutcome::Missing => Err(CoreError::not_found("account", user_id)),
            ProfileOutcome::EmailTaken => Err(CoreError::AlreadyExists {
                kind: "account",
                id: taken_email.unwrap_or_default(),
            }),
        }
    }

    async fn users(&self) -> Result<Vec<User>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC"
                ))?;
                let users = stmt
                    .query_map([], profile_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(users)
            })
            .await
            .map_err(Into::into)
    }

    async fn seed_user_data(&self, user_id: &str) -> Result<()> {
        info!("Seeding starter library for {}", user_id);
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                insert_seed(&tx, &user_id)?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }

    async fn categories(&self, user_id: &str) -> Result<Vec<Category>> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, user_id, name, serial FROM categories \
                     WHERE user_id = ?1 ORDER BY serial",
                )?;
                let categories = stmt
                    .query_map([user_id], |row| {
                        Ok(Category {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            name: row.get(2)?,
                            serial: row.get(3)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(categories)
            })
            .await
            .map_err(Into::into)
    }

    async fn add_category(&self, user_id: &str, name: &str) -> Result<Category> {
        let name = require_text("category name", name)?;
        let user_id = user_id.to_string();
        let id = format!("cat_{}", Uuid::new_v4().simple());

        self.conn
            .call(move |conn| {
                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM categories WHERE user_id = ?1",
                    [&user_id],
                    |row| row.get(0),
                )?;
                let category = Category {
                    id,
                    user_id: Some(user_id),
                    name,
                    serial: count + 1,
                };
                conn.execute(
                    "INSERT INTO categories (user_id, id, name, serial) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        category.user_id,
                        category.id,
                        category.name,
                        category.serial
                    ],
                )?;
                Ok(category)
            })
            .await
            .map_err(Into::into)
    }

    async fn sub_categories(
        &self,
        user_id: &str,
        category_id: Option<&str>,
    ) -> Result<Vec<SubCategory>> {
        let user_id = user_id.to_string();
        let category_id = category_id.map(str::to_string);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    r"
                    SELECT id, user_id, category_id, name, serial FROM sub_categories
                    WHERE user_id = ?1 AND (?2 IS NULL OR category_id = ?2)
                    ORDER BY serial, category_id
                ",
                )?;
                let subs = stmt
                    .query_map(rusqlite::params![user_id, category_id], |row| {
                        Ok(SubCategory {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            category_id: row.get(2)?,
                            name: row.get(3)?,
                            serial: row.get(4)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(subs)
            })
            .await
            .map_err(Into::into)
    }

    async fn add_sub_category(
        &self,
        user_id: &str,
        category_id: &str,
        name: &str,
    ) -> Result<SubCategory> {
        let name = require_text("sub-category name", name)?;
        let owner = user_id.to_string();
        let parent = category_id.to_string();
        let id = format!("sub_{}", Uuid::new_v4().simple());

        let sub = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM categories WHERE user_id = ?1 AND id = ?2)",
                    [&owner, &parent],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }

                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM sub_categories WHERE user_id = ?1 AND category_id = ?2",
                    [&owner, &parent],
                    |row| row.get(0),
                )?;
                let sub = SubCategory {
                    id,
                    user_id: Some(owner),
                    category_id: parent,
                    name,
                    serial: count + 1,
                };
                conn.execute(
                    "INSERT INTO sub_categories (user_id, id, category_id, name, serial) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![sub.user_id, sub.id, sub.category_id, sub.name, sub.serial],
                )?;
                Ok(Some(sub))
            })
            .await?;

        sub.ok_or_else(|| CoreError::not_found("category", category_id))
    }

    async fn lyrics(&self, user_id: &str, sub_category_id: Option<&str>) -> Result<Vec<Lyric>> {
        let user_id = user_id.to_string();
        let sub_category_id = sub_category_id.map(str::to_string);

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    r"
                    SELECT {LYRIC_COLUMNS} FROM lyrics
                    WHERE user_id = ?1 AND (?2 IS NULL OR sub_category_id = ?2)
                    ORDER BY serial, sub_category_id
                "
                ))?;
                let lyrics = stmt
                    .query_map(rusqlite::params![user_id, sub_category_id], lyric_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(lyrics)
            })
            .await
            .map_err(Into::into)
    }

    async fn lyric(&self, user_id: &str, lyric_id: &str) -> Result<Option<Lyric>> {
        let user_id = user_id.to_string();
        let lyric_id = lyric_id.to_string();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {LYRIC_COLUMNS} FROM lyrics WHERE user_id = ?1 AND id = ?2"
                ))?;
                Ok(stmt.query_row([user_id, lyric_id], lyric_from_row).optional()?)
            })
            .await
            .map_err(Into::into)
    }

    async fn add_lyric(&self, user_id: &str, lyric: NewLyric) -> Result<Lyric> {
        let title = require_text("title", &lyric.title)?;
        if lyric.content.trim().is_empty() {
            return Err(CoreError::InvalidInput {
                reason: "content must not be empty".to_string(),
            });
        }
        let sub_category_id = lyric.sub_category_id.clone();
        let owner = user_id.to_string();
        let id = format!("lyric_{}", Uuid::new_v4().simple());

        let added = self
            .conn
            .call(move |conn| {
                let exists: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM sub_categories WHERE user_id = ?1 AND id = ?2)",
                    [&owner, &lyric.sub_category_id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }

                let count: u32 = conn.query_row(
                    "SELECT COUNT(*) FROM lyrics WHERE user_id = ?1 AND sub_category_id = ?2",
                    [&owner, &lyric.sub_category_id],
                    |row| row.get(0),
                )?;
                let added = Lyric {
                    id,
                    user_id: Some(owner),
                    sub_category_id: lyric.sub_category_id,
                    title,
                    content: lyric.content,
                    serial: count + 1,
                    audio_url: lyric
                        .audio_url
                        .map(|url| url.trim().to_string())
                        .filter(|url| !url.is_empty()),
                };
                conn.execute(
                    &format!(
                        "INSERT INTO lyrics ({LYRIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                    ),
                    rusqlite::params![
                        added.id,
                        added.user_id,
                        added.sub_category_id,
                        added.title,
                        added.content,
                        added.serial,
                        added.audio_url
                    ],
                )?;
                Ok(Some(added))
            })
            .await?;

        added.ok_or_else(|| CoreError::not_found("sub-category", sub_category_id))
    }

    async fn search_lyrics(
        &self,
        user_id: &str,
        query: &str,
        favorites_only: bool,
    ) -> Result<Vec<Lyric>> {
        let query = query.trim();
        if query.is_empty() && !favorites_only {
            return Ok(Vec::new());
        }

        // SQLite LOWER() only folds ASCII, so matching happens here.
        let mut lyrics = self.lyrics(user_id, None).await?;
        if favorites_only {
            let favorites = self.favorites(user_id).await?;
            lyrics.retain(|lyric| favorites.contains(&lyric.id));
        }
        if !query.is_empty() {
            lyrics.retain(|lyric| lyric.matches(query));
        }

        debug!(
            "Search '{}' (favorites_only={}) matched {} lyrics",
            query,
            favorites_only,
            lyrics.len()
        );
        Ok(lyrics)
    }

    async fn toggle_favorite(&self, user_id: &str, lyric_id: &str) -> Result<bool> {
        let owner = user_id.to_string();
        let id = lyric_id.to_string();
        let now = Utc::now().timestamp_millis();

        let favorite = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM lyrics WHERE user_id = ?1 AND id = ?2)",
                    [&owner, &id],
                    |row| row.get(0),
                )?;
                if !exists {
                    return Ok(None);
                }

                let removed = tx.execute(
                    "DELETE FROM favorites WHERE user_id = ?1 AND lyric_id = ?2",
                    [&owner, &id],
                )?;
                if removed == 0 {
                    tx.execute(
                        "INSERT INTO favorites (user_id, lyric_id, created_at) VALUES (?1, ?2, ?3)",
                        rusqlite::params![owner, id, now],
                    )?;
                }
                tx.commit()?;
                Ok(Some(removed == 0))
            })
            .await?;

        favorite.ok_or_else(|| CoreError::not_found("lyric", lyric_id))
    }

    async fn favorites(&self, user_id: &str) -> Result<Vec<String>> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT lyric_id FROM favorites WHERE user_id = ?1 ORDER BY created_at",
                )?;
                let ids = stmt
                    .query_map([user_id], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<String>>>()?;
                Ok(ids)
            })
            .await
            .map_err(Into::into)
    }

    async fn display_settings(&self, user_id: &str) -> Result<DisplaySettings> {
        let user_id = user_id.to_string();
        self.conn
            .call(move |conn| {
                let settings = conn
                    .query_row(
                        r"
                        SELECT background_color, text_color, font_size, line_height
                        FROM display_settings WHERE user_id = ?1
                    ",
                        [user_id],
                        |row| {
                            Ok(DisplaySettings {
                                background_color: row.get(0)?,
                                text_color: row.get(1)?,
                                font_size: row.get(2)?,
                                line_height: row.get(3)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(settings.unwrap_or_default())
            })
            .await
            .map_err(Into::into)
    }

    async fn save_display_settings(&self, user_id: &str, settings: &DisplaySettings) -> Result<()> {
        let user_id = user_id.to_string();
        let settings = settings.clone();

        self.conn
            .call(move |conn| {
                conn.execute(
                    r"
                    INSERT INTO display_settings
                        (user_id, background_color, text_color, font_size, line_height)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(user_id) DO UPDATE SET
                        background_color = excluded.background_color,
                        text_color = excluded.text_color,
                        font_size = excluded.font_size,
                        line_height = excluded.line_height
                ",
                    rusqlite::params![
                        user_id,
                        settings.background_color,
                        settings.text_color,
                        settings.font_size,
                        settings.line_height
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(Into::into)
    }
}

/// Write the starter library for `user_id`, overwriting seeded rows.
fn insert_seed(conn: &rusqlite::Connection, user_id: &str) -> rusqlite::Result<()> {
    {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO categories (user_id, id, name, serial) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for c in seed::categories() {
            stmt.execute(rusqlite::params![user_id, c.id, c.name, c.serial])?;
        }
    }
    {
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO sub_categories (user_id, id, category_id, name, serial) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for s in seed::sub_categories() {
            stmt.execute(rusqlite::params![user_id, s.id, s.category_id, s.name, s.serial])?;
        }
    }
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT OR REPLACE INTO lyrics ({LYRIC_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
    ))?;
    for l in seed::lyrics() {
        stmt.execute(rusqlite::params![
            l.id,
            user_id,
            l.sub_category_id,
            l.title,
            l.content,
            l.serial,
            l.audio_url
        ])?;
    }
    Ok(())
}

fn profile_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        phone: row.get(4)?,
        role: UserRole::parse(&row.get::<_, String>(5)?).unwrap_or(UserRole::User),
        is_enabled: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn lyric_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Lyric> {
    Ok(Lyric {
        id: row.get(0)?,
        user_id: row.get(1)?,
        sub_category_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        serial: row.get(5)?,
        audio_url: row.get(6)?,
    })
}

enum ProfileOutcome {
    Updated(User),
    Missing,
    EmailTaken,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn require_text(field: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CoreError::InvalidInput {
            reason: format!("{field} must not be empty"),
        });
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: email.split('@').next().unwrap().to_string(),
            name: "Test Reader".to_string(),
            email: email.to_string(),
            phone: "0300-0000000".to_string(),
        }
    }

    async fn store_with_admin() -> (LibraryStore, User) {
        let store = LibraryStore::open_in_memory().await.unwrap();
        let admin = store.register(new_user("admin@example.com")).await.unwrap();
        (store, admin)
    }

    #[tokio::test]
    async fn test_global_settings_default_then_saved() {
        let store = LibraryStore::open_in_memory().await.unwrap();
        assert_eq!(store.global_settings().await.unwrap(), GlobalSettings::default());

        let settings = GlobalSettings {
            is_signup_enabled: false,
            is_login_enabled: true,
            logo_url: Some("https://example.com/logo.png".to_string()),
        };
        store.save_global_settings(&settings).await.unwrap();
        assert_eq!(store.global_settings().await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_first_user_is_admin_and_library_seeded() {
        let (store, admin) = store_with_admin().await;
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.is_enabled);

        let reader = store.register(new_user("reader@example.com")).await.unwrap();
        assert_eq!(reader.role, UserRole::User);

        assert_eq!(store.categories(&reader.id).await.unwrap().len(), 6);
        assert_eq!(store.sub_categories(&reader.id, None).await.unwrap().len(), 30);
        assert_eq!(
            store.lyrics(&reader.id, Some("s1")).await.unwrap().len(),
            10
        );
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_bad_input() {
        let (store, _) = store_with_admin().await;

        let err = store
            .register(new_user("ADMIN@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));

        let err = store.register(new_user("no-at-sign")).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_register_when_signup_closed() {
        let (store, _) = store_with_admin().await;
        store
            .save_global_settings(&GlobalSettings {
                is_signup_enabled: false,
                ..GlobalSettings::default()
            })
            .await
            .unwrap();

        let err = store
            .register(new_user("late@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SignupDisabled));
    }

    #[tokio::test]
    async fn test_login_rules() {
        let (store, admin) = store_with_admin().await;
        let reader = store.register(new_user("reader@example.com")).await.unwrap();

        assert_eq!(store.login(" Reader@Example.com ").await.unwrap().id, reader.id);
        assert!(matches!(
            store.login("nobody@example.com").await.unwrap_err(),
            CoreError::NotFound { .. }
        ));

        store
            .save_global_settings(&GlobalSettings {
                is_login_enabled: false,
                ..GlobalSettings::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            store.login("reader@example.com").await.unwrap_err(),
            CoreError::LoginDisabled
        ));
        assert_eq!(store.login("admin@example.com").await.unwrap().id, admin.id);

        store.update_user_enabled(&reader.id, false).await.unwrap();
        assert!(matches!(
            store.login("reader@example.com").await.unwrap_err(),
            CoreError::AccountDisabled
        ));
    }

    #[tokio::test]
    async fn test_update_user_enabled_unknown_account() {
        let (store, _) = store_with_admin().await;
        let err = store.update_user_enabled("missing", true).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "account", .. }));
    }

    #[tokio::test]
    async fn test_update_profile_changes_only_given_fields() {
        let (store, admin) = store_with_admin().await;

        let updated = store
            .update_profile(
                &admin.id,
                ProfileUpdate {
                    name: Some("  Hafiz Sahib ".to_string()),
                    email: Some(" Hafiz@Example.COM".to_string()),
                    phone: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "Hafiz Sahib");
        assert_eq!(updated.email, "hafiz@example.com");
        assert_eq!(updated.phone, admin.phone);
        assert_eq!(updated.role, UserRole::Admin);

        let stored = store.user(&admin.id).await.unwrap().unwrap();
        assert_eq!(stored, updated);
        assert_eq!(store.login("hafiz@example.com").await.unwrap().id, admin.id);
        assert!(matches!(
            store.login("admin@example.com").await.unwrap_err(),
            CoreError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_update_profile_rejects_taken_or_bad_email() {
        let (store, admin) = store_with_admin().await;
        let reader = store.register(new_user("reader@example.com")).await.unwrap();

        let taken = ProfileUpdate {
            email: Some("ADMIN@example.com".to_string()),
            ..ProfileUpdate::default()
        };
        let err = store.update_profile(&reader.id, taken).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::AlreadyExists { kind: "account", ref id } if id == "admin@example.com"
        ));

        let bad = ProfileUpdate {
            email: Some("no-at-sign".to_string()),
            ..ProfileUpdate::default()
        };
        let err = store.update_profile(&reader.id, bad).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert_eq!(store.user(&reader.id).await.unwrap().unwrap(), reader);

        // Keeping one's own address is not a conflict
        let same = ProfileUpdate {
            email: Some(admin.email.clone()),
            ..ProfileUpdate::default()
        };
        assert_eq!(store.update_profile(&admin.id, same).await.unwrap(), admin);

        let err = store
            .update_profile("missing", ProfileUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "account", .. }));
    }

    #[tokio::test]
    async fn test_users_newest_first() {
        let (store, admin) = store_with_admin().await;
        let reader = store.register(new_user("reader@example.com")).await.unwrap();

        let users = store.users().await.unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.iter().any(|u| u.id == admin.id));
        assert!(users.iter().any(|u| u.id == reader.id));
        assert_eq!(store.user(&reader.id).await.unwrap(), Some(reader));
        assert_eq!(store.user("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_category_and_sub_category_serials() {
        let (store, user) = store_with_admin().await;

        let category = store.add_category(&user.id, "  مرثیہ ").await.unwrap();
        assert_eq!(category.serial, 7);
        assert_eq!(category.name, "مرثیہ");

        let first = store
            .add_sub_category(&user.id, &category.id, "کربلا")
            .await
            .unwrap();
        let second = store
            .add_sub_category(&user.id, &category.id, "شہدا")
            .await
            .unwrap();
        assert_eq!((first.serial, second.serial), (1, 2));

        let subs = store
            .sub_categories(&user.id, Some(&category.id))
            .await
            .unwrap();
        assert_eq!(subs, vec![first, second]);

        let err = store
            .add_sub_category(&user.id, "nope", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "category", .. }));
    }

    #[tokio::test]
    async fn test_add_lyric_appends_to_sub_category() {
        let (store, user) = store_with_admin().await;

        let added = store
            .add_lyric(
                &user.id,
                NewLyric {
                    sub_category_id: "s1".to_string(),
                    title: "نیا کلام".to_string(),
                    content: "پہلا مصرع\nدوسرا مصرع".to_string(),
                    audio_url: Some("   ".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(added.serial, 11);
        assert_eq!(added.audio_url, None);

        let fetched = store.lyric(&user.id, &added.id).await.unwrap().unwrap();
        assert_eq!(fetched, added);

        let lyrics = store.lyrics(&user.id, Some("s1")).await.unwrap();
        assert_eq!(lyrics.last().map(|l| l.id.as_str()), Some(added.id.as_str()));

        let err = store
            .add_lyric(
                &user.id,
                NewLyric {
                    sub_category_id: "missing".to_string(),
                    title: "x".to_string(),
                    content: "y".to_string(),
                    audio_url: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "sub-category", .. }));
    }

    #[tokio::test]
    async fn test_libraries_are_per_user() {
        let (store, admin) = store_with_admin().await;
        let reader = store.register(new_user("reader@example.com")).await.unwrap();

        store.add_category(&admin.id, "صرف میرا").await.unwrap();
        assert_eq!(store.categories(&admin.id).await.unwrap().len(), 7);
        assert_eq!(store.categories(&reader.id).await.unwrap().len(), 6);

        let lyric = store.lyric(&reader.id, "l-s1-1").await.unwrap().unwrap();
        assert_eq!(lyric.user_id.as_deref(), Some(reader.id.as_str()));
        assert_eq!(lyric.audio_url.as_deref(), Some(seed::SAMPLE_AUDIO_URL));
    }

    #[tokio::test]
    async fn test_toggle_favorite() {
        let (store, user) = store_with_admin().await;

        assert!(store.toggle_favorite(&user.id, "l-s1-1").await.unwrap());
        assert_eq!(store.favorites(&user.id).await.unwrap(), vec!["l-s1-1"]);
        assert!(!store.toggle_favorite(&user.id, "l-s1-1").await.unwrap());
        assert!(store.favorites(&user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toggle_favorite_unknown_lyric() {
        let (store, user) = store_with_admin().await;

        let err = store
            .toggle_favorite(&user.id, "l-missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "lyric", .. }));

        let added = store
            .add_lyric(
                &user.id,
                NewLyric {
                    sub_category_id: "s1".to_string(),
                    title: "نئی نعت".to_string(),
                    content: "پہلا مصرع\nدوسرا مصرع".to_string(),
                    audio_url: None,
                },
            )
            .await
            .unwrap();
        let other = store.register(new_user("other@example.com")).await.unwrap();
        let err = store
            .toggle_favorite(&other.id, &added.id)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { kind: "lyric", .. }));
        assert!(store.favorites(&other.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_lyrics() {
        let (store, user) = store_with_admin().await;

        assert!(store.search_lyrics(&user.id, "  ", false).await.unwrap().is_empty());

        let hits = store.search_lyrics(&user.id, "مناجات", false).await.unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.iter().all(|l| l.sub_category_id == "s2"));

        // every seeded lyric shares the sample verses
        let hits = store.search_lyrics(&user.id, "قدرت", false).await.unwrap();
        assert_eq!(hits.len(), 300);

        store.toggle_favorite(&user.id, "l-s2-3").await.unwrap();
        store.toggle_favorite(&user.id, "l-s4-1").await.unwrap();
        let favorites = store.search_lyrics(&user.id, "", true).await.unwrap();
        assert_eq!(favorites.len(), 2);
        let favorites = store.search_lyrics(&user.id, "مناجات", true).await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, "l-s2-3");
    }

    #[tokio::test]
    async fn test_display_settings_default_then_saved() {
        let (store, user) = store_with_admin().await;
        assert_eq!(
            store.display_settings(&user.id).await.unwrap(),
            DisplaySettings::default()
        );

        let settings = DisplaySettings {
            font_size: 32,
            line_height: 3.0,
            ..DisplaySettings::default()
        };
        store.save_display_settings(&user.id, &settings).await.unwrap();
        assert_eq!(store.display_settings(&user.id).await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_seed_user_data_restores_seeded_rows() {
        let (store, user) = store_with_admin().await;
        store.add_category(&user.id, "اضافی").await.unwrap();

        store.seed_user_data(&user.id).await.unwrap();
        assert_eq!(store.categories(&user.id).await.unwrap().len(), 7);
        assert_eq!(store.lyrics(&user.id, None).await.unwrap().len(), 300);
    }
}
