//! Library records: categories, sub-categories, lyrics, users and settings.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Top-level grouping (Hamd, Naat, Manqabat, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    /// Owning user, if the record belongs to a personal library
    pub user_id: Option<String>,
    pub name: String,
    pub serial: u32,
}

/// Second-level grouping inside a category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCategory {
    pub id: String,
    pub user_id: Option<String>,
    pub category_id: String,
    pub name: String,
    pub serial: u32,
}

/// A single poem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lyric {
    pub id: String,
    pub user_id: Option<String>,
    pub sub_category_id: String,
    pub title: String,
    /// Newline-delimited verse text
    pub content: String,
    pub serial: u32,
    /// Address of a pre-recorded recitation
    pub audio_url: Option<String>,
}

impl Lyric {
    /// The static recitation address, ignoring blank values.
    #[must_use]
    pub fn static_audio(&self) -> Option<&str> {
        self.audio_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    /// Non-empty trimmed verse lines grouped into couplets.
    ///
    /// A trailing odd line forms a couplet of its own.
    #[must_use]
    pub fn couplets(&self) -> Vec<Couplet> {
        let lines: Vec<&str> = self
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        lines
            .chunks(2)
            .map(|pair| Couplet {
                first: pair[0].to_string(),
                second: pair.get(1).map(|s| (*s).to_string()),
            })
            .collect()
    }

    /// Case-insensitive match against the title or the verse text.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return false;
        }
        self.title.to_lowercase().contains(&query) || self.content.to_lowercase().contains(&query)
    }
}

/// Two lines of verse displayed together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Couplet {
    pub first: String,
    pub second: Option<String>,
}

/// Input for adding a lyric to a personal library
#[derive(Debug, Clone)]
pub struct NewLyric {
    pub sub_category_id: String,
    pub title: String,
    pub content: String,
    pub audio_url: Option<String>,
}

/// Per-user reading preferences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default = "default_background_color")]
    pub background_color: String,
    #[serde(default = "default_text_color")]
    pub text_color: String,
    #[serde(default = "default_font_size")]
    pub font_size: u32,
    #[serde(default = "default_line_height")]
    pub line_height: f32,
}

fn default_background_color() -> String {
    "#F5F5DC".to_string()
}

fn default_text_color() -> String {
    "#1A0F0D".to_string()
}

const fn default_font_size() -> u32 {
    24
}

const fn default_line_height() -> f32 {
    2.5
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            background_color: default_background_color(),
            text_color: default_text_color(),
            font_size: default_font_size(),
            line_height: default_line_height(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserRole {
    Admin,
    User,
}

impl UserRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "ADMIN",
            Self::User => "USER",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADMIN" => Some(Self::Admin),
            "USER" => Some(Self::User),
            _ => None,
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Profile record. Credentials live with the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: UserRole,
    pub is_enabled: bool,
    /// Milliseconds since the Unix epoch
    pub created_at: i64,
}

impl User {
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self.role, UserRole::Admin)
    }

    /// Fail unless this user may use admin tools.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` for non-admin users.
    pub fn ensure_admin(&self) -> Result<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(CoreError::PermissionDenied {
                reason: format!("{} is not an admin", self.email),
            })
        }
    }

    /// Fail unless this admin may enable or disable `target_id`.
    ///
    /// Admins cannot disable their own account.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied` for non-admins or self-targeting.
    pub fn ensure_can_manage(&self, target_id: &str) -> Result<()> {
        self.ensure_admin()?;
        if self.id == target_id {
            return Err(CoreError::PermissionDenied {
                reason: "admins cannot change their own account status".to_string(),
            });
        }
        Ok(())
    }
}

/// Input for registering a profile
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub email: String,
    pub phone: String,
}

/// Profile fields to change; `None` keeps the stored value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

impl ProfileUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.phone.is_none()
    }
}

/// Application-wide switches managed by admins
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub is_signup_enabled: bool,
    pub is_login_enabled: bool,
    pub logo_url: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            is_signup_enabled: true,
            is_login_enabled: true,
            logo_url: None,
        }
    }
}
