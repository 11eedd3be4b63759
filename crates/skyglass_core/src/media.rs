//! Image CDN URL derivation.
//!
//! URLs are never taken from the wire; they are rebuilt from the author DID,
//! the blob CID and the image format so the same inputs always produce the
//! same link.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default public image CDN
pub const DEFAULT_CDN_BASE: &str = "https://cdn.bsky.app";

/// Encoded format the CDN should serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Pick a format from a declared MIME type, falling back to JPEG.
    pub fn from_mime(mime: Option<&str>) -> Self {
        match mime {
            Some(m) if m.contains("webp") => Self::Webp,
            Some(m) if m.contains("png") => Self::Png,
            _ => Self::Jpeg,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendition requested from the CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSize {
    Thumbnail,
    Fullsize,
}

impl ImageSize {
    fn path_segment(&self) -> &'static str {
        match self {
            Self::Thumbnail => "feed_thumbnail",
            Self::Fullsize => "feed_fullsize",
        }
    }
}

/// Build a CDN URL for one image blob.
pub fn image_url(
    base: &str,
    author_id: &str,
    content_id: &str,
    format: ImageFormat,
    size: ImageSize,
) -> String {
    format!(
        "{}/img/{}/plain/{}/{}@{}",
        base.trim_end_matches('/'),
        size.path_segment(),
        author_id,
        content_id,
        format
    )
}

/// Link back to the post on the web client, or to the profile if the record
/// key is unknown.
pub fn post_url(author_id: &str, rkey: Option<&str>) -> String {
    match rkey {
        Some(rkey) if !rkey.is_empty() => {
            format!("https://bsky.app/profile/{}/post/{}", author_id, rkey)
        }
        _ => format!("https://bsky.app/profile/{}", author_id),
    }
}
