//! Path layout of the relay namespace.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Root of the per-user command lists.
pub const COMMANDS_ROOT: &str = "commands";

/// Root of the per-user response lists.
pub const RESPONSES_ROOT: &str = "command_responses";

/// Characters the store refuses inside a key.
const FORBIDDEN: &[char] = &['.', '$', '#', '[', ']', '?', '%'];

/// Path validation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Empty path segment in {0:?}")]
    EmptySegment(String),
    #[error("Forbidden character in segment {0:?}")]
    ForbiddenChar(String),
}

/// A validated `/`-separated location in the store.
///
/// The root path has no segments and renders as an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StorePath {
    segments: Vec<String>,
}

impl StorePath {
    /// The root of the store.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a path, ignoring leading and trailing slashes.
    ///
    /// # Errors
    /// Returns error if a segment is empty or contains a forbidden character.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut path = Self::root();
        for segment in trimmed.split('/') {
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// Append a single segment.
    ///
    /// # Errors
    /// Returns error if the segment is empty or contains a forbidden character.
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Ok(Self { segments })
    }

    /// Append every segment of a relative path such as `"/-Nabc/field"`.
    ///
    /// # Errors
    /// Returns error if any segment is invalid.
    pub fn join(&self, relative: &str) -> Result<Self, PathError> {
        let rel = Self::parse(relative)?;
        let mut segments = self.segments.clone();
        segments.extend(rel.segments);
        Ok(Self { segments })
    }

    /// Command list of a user: `commands/{user_id}`.
    ///
    /// # Errors
    /// Returns error if `user_id` is not a valid segment.
    pub fn commands(user_id: &str) -> Result<Self, PathError> {
        Self::root().child(COMMANDS_ROOT)?.child(user_id)
    }

    /// Response list of a user: `command_responses/{user_id}`.
    ///
    /// # Errors
    /// Returns error if `user_id` is not a valid segment.
    pub fn responses(user_id: &str) -> Result<Self, PathError> {
        Self::root().child(RESPONSES_ROOT)?.child(user_id)
    }

    /// Stream list of a user for one modality, e.g. `camera_stream/{user_id}`.
    ///
    /// # Errors
    /// Returns error if `user_id` is not a valid segment.
    pub fn stream(modality: Modality, user_id: &str) -> Result<Self, PathError> {
        Self::root().child(modality.token())?.child(user_id)
    }

    /// Path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, if any.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether this is the store root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `self` equals `other` or lies beneath it.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment(segment.to_string()));
    }
    if segment.contains(FORBIDDEN)
        || segment.contains('/')
        || segment.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(PathError::ForbiddenChar(segment.to_string()));
    }
    Ok(())
}

/// Kind of media streamed back by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Microphone chunks.
    Audio,
    /// Camera frames.
    Camera,
    /// Screen frames.
    Screen,
}

impl Modality {
    /// Every modality, in subscription order.
    pub const ALL: [Self; 3] = [Self::Audio, Self::Camera, Self::Screen];

    /// Root segment of the stream path, e.g. `audio_stream`.
    #[must_use]
    pub const fn token(self) -> &'static str {
        match self {
            Self::Audio => "audio_stream",
            Self::Camera => "camera_stream",
            Self::Screen => "screen_stream",
        }
    }

    /// Filename prefix of saved chunks.
    #[must_use]
    pub const fn file_prefix(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Camera => "camera",
            Self::Screen => "screen",
        }
    }

    /// Filename extension of saved chunks.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Audio => "mp3",
            Self::Camera | Self::Screen => "jpg",
        }
    }

    /// Find the modality whose token is the root segment of `path`.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let root = path.trim_start_matches('/').split('/').next()?;
        Self::ALL.into_iter().find(|m| m.token() == root)
    }

    /// Find the modality whose token is the root segment of `path`.
    #[must_use]
    pub fn from_store_path(path: &StorePath) -> Option<Self> {
        let root = path.segments().first()?;
        Self::ALL.into_iter().find(|m| m.token() == root)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_prefix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_paths() {
        assert_eq!(StorePath::commands("u1").unwrap().to_string(), "commands/u1");
        assert_eq!(
            StorePath::responses("u1").unwrap().to_string(),
            "command_responses/u1"
        );
        assert_eq!(
            StorePath::stream(Modality::Screen, "u1").unwrap().to_string(),
            "screen_stream/u1"
        );
    }

    #[test]
    fn test_parse_and_join() {
        let base = StorePath::parse("/audio_stream/u1/").unwrap();
        assert_eq!(base.segments().len(), 2);

        let child = base.join("/-Nabc").unwrap();
        assert_eq!(child.to_string(), "audio_stream/u1/-Nabc");
        assert!(child.starts_with(&base));
        assert!(!base.starts_with(&child));

        assert_eq!(base.join("/").unwrap(), base);
        assert!(StorePath::parse("").unwrap().is_root());
    }

    #[test]
    fn test_rejects_invalid_segments() {
        assert!(matches!(
            StorePath::commands(""),
            Err(PathError::EmptySegment(_))
        ));
        assert!(matches!(
            StorePath::commands("a.b"),
            Err(PathError::ForbiddenChar(_))
        ));
        assert!(StorePath::parse("a//b").is_err());
        for user in ["a?b", "50%", "a b", "tab\there"] {
            assert!(
                matches!(StorePath::commands(user), Err(PathError::ForbiddenChar(_))),
                "{user:?}"
            );
        }
    }

    #[test]
    fn test_modality_routing() {
        assert_eq!(
            Modality::from_path("camera_stream/u1/-Nabc"),
            Some(Modality::Camera)
        );
        assert_eq!(Modality::from_path("audio_stream/u1"), Some(Modality::Audio));
        assert_eq!(Modality::from_path("commands/u1"), None);
        assert_eq!(
            Modality::from_path("camera_stream/audio_stream_fan/-N1"),
            Some(Modality::Camera)
        );
        assert_eq!(Modality::from_path("commands/audio_stream/-N1"), None);

        let path = StorePath::stream(Modality::Screen, "camera_stream_rig").unwrap();
        assert_eq!(Modality::from_store_path(&path), Some(Modality::Screen));
        assert_eq!(Modality::from_store_path(&StorePath::root()), None);
        assert_eq!(Modality::Audio.extension(), "mp3");
        assert_eq!(Modality::Screen.extension(), "jpg");
    }
}
