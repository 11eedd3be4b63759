//! Post record model shared by both decoders.
//!
//! Records arrive as JSON (directly in envelope mode, projected from
//! DAG-CBOR in block mode), so one serde model serves both.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::media::{post_url, ImageFormat};
use crate::post::{AspectRatio, ImageRef, ModerationLabels, Post, PostId};

pub const EMBED_IMAGES: &str = "app.bsky.embed.images";
pub const EMBED_RECORD_WITH_MEDIA: &str = "app.bsky.embed.recordWithMedia";

#[derive(Debug, Clone, Deserialize)]
pub struct PostRecord {
    #[serde(rename = "$type")]
    pub record_type: Option<String>,
    /// Anything but a string reads as empty
    #[serde(default, deserialize_with = "string_or_empty")]
    pub text: String,
    /// Anything but a string reads as absent
    #[serde(rename = "createdAt", default, deserialize_with = "string_or_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub embed: Option<Value>,
    #[serde(default)]
    pub labels: Option<Value>,
}

/// One image as declared by the record, before URL derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordImage {
    pub content_id: String,
    pub mime_type: Option<String>,
    pub alt: String,
    pub aspect_ratio: AspectRatio,
}

#[derive(Debug, Deserialize)]
struct EmbeddedImage {
    #[serde(default)]
    alt: Option<String>,
    image: Option<BlobRef>,
    #[serde(rename = "aspectRatio")]
    aspect_ratio: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct BlobRef {
    #[serde(rename = "ref")]
    link: Option<Link>,
    /// Legacy blobs carry a bare CID string
    cid: Option<String>,
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "$link")]
    link: String,
}

/// Where a decoded record came from.
#[derive(Debug, Clone)]
pub struct RecordContext<'a> {
    pub author_id: &'a str,
    /// Record key, when the frame names one
    pub rkey: Option<&'a str>,
    /// Stand-in for the record key in post ids when `rkey` is unknown
    pub fallback_key: &'a str,
    pub received_at: DateTime<Utc>,
    pub cdn_base: &'a str,
}

impl RecordContext<'_> {
    fn id_key(&self) -> &str {
        self.rkey.unwrap_or(self.fallback_key)
    }
}

impl PostRecord {
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| CoreError::Json {
            data_type: "post record".to_string(),
            cause: e,
        })
    }

    pub fn has_type(&self, collection: &str) -> bool {
        self.record_type.as_deref() == Some(collection)
    }

    /// Declared creation time, or the receipt time when absent or unparseable.
    pub fn timestamp(&self, received_at: DateTime<Utc>) -> DateTime<Utc> {
        self.created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(received_at)
    }

    pub fn labels(&self) -> ModerationLabels {
        self.labels.as_ref().map(parse_labels).unwrap_or_default()
    }

    /// Images from an images embed or the media half of a record-with-media
    /// embed. Entries without a blob reference are dropped.
    pub fn images(&self) -> Vec<RecordImage> {
        let Some(embed) = self.embed.as_ref() else {
            return Vec::new();
        };

        let images_embed = match embed_type(embed) {
            Some(EMBED_IMAGES) => Some(embed),
            Some(EMBED_RECORD_WITH_MEDIA) => embed
                .get("media")
                .filter(|media| embed_type(media) == Some(EMBED_IMAGES)),
            _ => None,
        };

        images_embed
            .and_then(|e| e.get("images"))
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(record_image).collect())
            .unwrap_or_default()
    }

    /// One post carrying every image of the record.
    pub fn grouped_post(&self, ctx: &RecordContext<'_>) -> Result<Post> {
        let images = self
            .images()
            .into_iter()
            .map(|image| image_ref(ctx, image))
            .collect();

        Post::new(
            PostId::for_record(ctx.author_id, ctx.id_key(), ctx.received_at),
            ctx.author_id,
            None,
            self.text.clone(),
            self.timestamp(ctx.received_at),
            post_url(ctx.author_id, ctx.rkey),
            images,
            self.labels(),
        )
    }

    /// One post per image, each with a distinct identifier.
    pub fn single_image_posts(&self, ctx: &RecordContext<'_>) -> Vec<Post> {
        let timestamp = self.timestamp(ctx.received_at);
        let labels = self.labels();

        self.images()
            .into_iter()
            .filter_map(|image| {
                let id = PostId::for_image(
                    ctx.author_id,
                    ctx.id_key(),
                    &image.content_id,
                    ctx.received_at,
                );
                Post::new(
                    id,
                    ctx.author_id,
                    None,
                    self.text.clone(),
                    timestamp,
                    post_url(ctx.author_id, ctx.rkey),
                    vec![image_ref(ctx, image)],
                    labels.clone(),
                )
                .ok()
            })
            .collect()
    }
}

fn string_or_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn string_or_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    string_or_none(deserializer).map(Option::unwrap_or_default)
}

fn embed_type(embed: &Value) -> Option<&str> {
    embed.get("$type").and_then(Value::as_str)
}

fn record_image(entry: &Value) -> Option<RecordImage> {
    let entry: EmbeddedImage = serde_json::from_value(entry.clone()).ok()?;
    let blob = entry.image?;
    let content_id = blob
        .link
        .map(|l| l.link)
        .or(blob.cid)
        .filter(|cid| !cid.is_empty())?;

    let dimension = |key: &str| {
        entry
            .aspect_ratio
            .as_ref()
            .and_then(|ratio| ratio.get(key))
            .and_then(Value::as_i64)
    };

    Some(RecordImage {
        content_id,
        mime_type: blob.mime_type,
        alt: entry.alt.unwrap_or_default(),
        aspect_ratio: AspectRatio::or_square(dimension("width"), dimension("height")),
    })
}

fn image_ref(ctx: &RecordContext<'_>, image: RecordImage) -> ImageRef {
    ImageRef::new(
        ctx.cdn_base,
        ctx.author_id,
        image.content_id,
        ImageFormat::from_mime(image.mime_type.as_deref()),
        image.alt,
        image.aspect_ratio,
    )
}

/// Parse either the self-label form (`{"values": [{"val": "porn"}]}`) or a
/// flat map of label to value.
///
/// In the flat form a label is asserted when its value is `true` or a
/// non-empty array.
pub fn parse_labels(value: &Value) -> ModerationLabels {
    let mut labels = ModerationLabels::new();

    let Some(map) = value.as_object() else {
        return labels;
    };

    if let Some(values) = map.get("values").and_then(Value::as_array) {
        for val in values
            .iter()
            .filter_map(|entry| entry.get("val").and_then(Value::as_str))
        {
            labels.insert(val, true);
        }
        return labels;
    }

    for (label, flag) in map {
        if label.starts_with('$') {
            continue;
        }
        let asserted = match flag {
            Value::Bool(b) => *b,
            Value::Array(items) => !items.is_empty(),
            _ => false,
        };
        labels.insert(label.as_str(), asserted);
    }

    labels
}
