//! Typed objects from flat wire mappings.
//!
//! Service payloads arrive as flat JSON objects. [`Hydrate`] turns such a
//! mapping into a typed value with an explicit schema. Image references are
//! resolved into [`Avatar`]s before the remaining keys are mapped by name.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::identifiers::CharacterId;
use crate::protocol::Turn;

// ============================================================================
// Constants
// ============================================================================

/// Image CDN serving avatars.
const AVATAR_BASE_URL: &str = "https://characterai.io/i";

/// Wire key holding an avatar reference.
const AVATAR_KEY: &str = "avatar_file_name";

/// Default rendered avatar size, in pixels.
pub const DEFAULT_AVATAR_SIZE: u32 = 400;

// ============================================================================
// Hydrate
// ============================================================================

/// Builds a typed object from a flat key/value mapping.
pub trait Hydrate: Sized {
    /// Hydrates `raw`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if a known key has the wrong type.
    fn hydrate(raw: &Map<String, Value>) -> Result<Self>;
}

impl Hydrate for Turn {
    fn hydrate(raw: &Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(raw.clone()))?)
    }
}

// ============================================================================
// Avatar
// ============================================================================

/// Reference to an uploaded avatar image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Avatar {
    file_name: String,
}

impl Avatar {
    /// Wraps a file name as sent by the service.
    #[inline]
    #[must_use]
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Returns the raw file name.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Returns the image URL at `size` pixels.
    #[must_use]
    pub fn url(&self, size: u32) -> String {
        let path = self
            .file_name
            .split('/')
            .map(urlencoding::encode)
            .collect::<Vec<_>>()
            .join("/");
        format!("{AVATAR_BASE_URL}/{size}/static/avatars/{path}")
    }
}

// ============================================================================
// CharacterProfile
// ============================================================================

/// Public profile of a character.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterProfile {
    /// Character id.
    #[serde(rename = "external_id")]
    pub character_id: CharacterId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Short tagline.
    #[serde(default)]
    pub title: String,
    /// Long description.
    #[serde(default)]
    pub description: String,
    /// First message of a new chat.
    #[serde(default)]
    pub greeting: String,
    /// Avatar image, if one was uploaded.
    #[serde(skip)]
    pub avatar: Option<Avatar>,
    /// Keys without a typed field, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Hydrate for CharacterProfile {
    fn hydrate(raw: &Map<String, Value>) -> Result<Self> {
        let mut fields = raw.clone();
        let avatar = match fields.remove(AVATAR_KEY) {
            Some(Value::String(file_name)) if !file_name.is_empty() => Some(Avatar::new(file_name)),
            _ => None,
        };

        let mut profile: Self = serde_json::from_value(Value::Object(fields))?;
        profile.avatar = avatar;
        Ok(profile)
    }
}

// ============================================================================
// Tests
// ============================================================================
