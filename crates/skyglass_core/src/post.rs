//! Normalized post model shared by every decoder and the store.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::media::{image_url, ImageFormat, ImageSize};

/// Labels that mark a post as sensitive when asserted.
pub const NSFW_LABELS: [&str; 5] = ["sexual", "porn", "nudity", "graphic-media", "nsfl"];

/// Opaque identifier, unique within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PostId(pub String);

impl PostId {
    /// Identifier for a post grouping every image of one record.
    pub fn for_record(author_id: &str, rkey: &str, received_at: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}",
            author_id,
            rkey,
            received_at.timestamp_millis()
        ))
    }

    /// Identifier for a post carrying a single image of a record.
    pub fn for_image(
        author_id: &str,
        rkey: &str,
        content_id: &str,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            author_id,
            rkey,
            content_id,
            received_at.timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Width/height pair, always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub const SQUARE: AspectRatio = AspectRatio {
        width: 1,
        height: 1,
    };

    /// Accept a declared ratio, falling back to 1:1 when missing or non-positive.
    pub fn or_square(width: Option<i64>, height: Option<i64>) -> Self {
        match (width, height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Self {
                width: u32::try_from(w).unwrap_or(u32::MAX),
                height: u32::try_from(h).unwrap_or(u32::MAX),
            },
            _ => Self::SQUARE,
        }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl Default for AspectRatio {
    fn default() -> Self {
        Self::SQUARE
    }
}

/// One image within a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Blob CID the URLs were derived from
    pub content_id: String,
    pub format: ImageFormat,
    pub thumbnail_url: String,
    pub fullsize_url: String,
    pub alt_text: String,
    pub aspect_ratio: AspectRatio,
}

impl ImageRef {
    /// Derive both CDN renditions for a blob.
    pub fn new(
        cdn_base: &str,
        author_id: &str,
        content_id: impl Into<String>,
        format: ImageFormat,
        alt_text: impl Into<String>,
        aspect_ratio: AspectRatio,
    ) -> Self {
        let content_id = content_id.into();
        Self {
            thumbnail_url: image_url(cdn_base, author_id, &content_id, format, ImageSize::Thumbnail),
            fullsize_url: image_url(cdn_base, author_id, &content_id, format, ImageSize::Fullsize),
            content_id,
            format,
            alt_text: alt_text.into(),
            aspect_ratio,
        }
    }
}

/// Moderation labels attached upstream, keyed by label value.
///
/// The flag records whether the label is asserted (a `true` value or a
/// non-empty list in the flat form, always `true` in the self-label form).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationLabels(pub BTreeMap<String, bool>);

impl ModerationLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<String>, asserted: bool) {
        self.0.insert(label.into(), asserted);
    }

    pub fn with(mut self, label: impl Into<String>, asserted: bool) -> Self {
        self.insert(label, asserted);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_asserted(&self, label: &str) -> bool {
        self.0.get(label).copied().unwrap_or(false)
    }

    /// True iff any NSFW label is asserted.
    pub fn is_sensitive(&self) -> bool {
        NSFW_LABELS.iter().any(|label| self.is_asserted(label))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// A normalized unit of displayable content.
///
/// Never mutated after it enters the store; the store shares it as `Arc<Post>`.
/// Deserialization goes through [`Post::new`], so the image invariant holds
/// for every instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PostFields")]
pub struct Post {
    pub id: PostId,
    pub author_id: String,
    pub author_display: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub source_url: String,
    images: Vec<ImageRef>,
    pub moderation_labels: ModerationLabels,
}

impl Post {
    /// Build a post, rejecting one without images.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PostId,
        author_id: impl Into<String>,
        author_display: Option<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
        source_url: impl Into<String>,
        images: Vec<ImageRef>,
        moderation_labels: ModerationLabels,
    ) -> Result<Self> {
        if images.is_empty() {
            return Err(CoreError::skipped(format!("post {} has no images", id)));
        }
        let author_id = author_id.into();
        let author_display = author_display
            .filter(|handle| !handle.trim().is_empty())
            .unwrap_or_else(|| author_id.clone());
        Ok(Self {
            id,
            author_id,
            author_display,
            text: text.into(),
            timestamp,
            source_url: source_url.into(),
            images,
            moderation_labels,
        })
    }

    /// Images in source order; never empty.
    pub fn images(&self) -> &[ImageRef] {
        &self.images
    }

    pub fn first_image(&self) -> Option<&ImageRef> {
        self.images.first()
    }

    pub fn is_sensitive(&self) -> bool {
        self.moderation_labels.is_sensitive()
    }
}

#[derive(Deserialize)]
struct PostFields {
    id: PostId,
    author_id: String,
    #[serde(default)]
    author_display: Option<String>,
    #[serde(default)]
    text: String,
    timestamp: DateTime<Utc>,
    source_url: String,
    images: Vec<ImageRef>,
    #[serde(default)]
    moderation_labels: ModerationLabels,
}

impl TryFrom<PostFields> for Post {
    type Error = CoreError;

    fn try_from(fields: PostFields) -> Result<Self> {
        Post::new(
            fields.id,
            fields.author_id,
            fields.author_display,
            fields.text,
            fields.timestamp,
            fields.source_url,
            fields.images,
            fields.moderation_labels,
        )
    }
}
