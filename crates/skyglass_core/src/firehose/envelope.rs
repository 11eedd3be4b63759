//! Jetstream JSON commit events.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::record::{PostRecord, RecordContext};
use crate::error::{CoreError, Result};
use crate::post::Post;

#[derive(Debug, Deserialize)]
struct JetstreamEvent {
    did: String,
    #[serde(default)]
    time_us: Option<i64>,
    kind: String,
    #[serde(default)]
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    #[serde(default)]
    rkey: String,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    record: Option<Value>,
}

/// Decodes one JSON event per frame into at most one post with all of the
/// record's images.
#[derive(Debug, Clone)]
pub struct EnvelopeDecoder {
    collection: String,
    cdn_base: String,
}

impl EnvelopeDecoder {
    pub fn new(collection: impl Into<String>, cdn_base: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            cdn_base: cdn_base.into(),
        }
    }

    /// Never fails; anything undecodable or irrelevant yields no posts.
    pub fn decode_text(&self, text: &str, received_at: DateTime<Utc>) -> Vec<Post> {
        match self.decode_event(text, received_at) {
            Ok(Some(post)) => vec![post],
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!("Skipping Jetstream event: {}", e);
                Vec::new()
            }
        }
    }

    fn decode_event(&self, text: &str, received_at: DateTime<Utc>) -> Result<Option<Post>> {
        let event: JetstreamEvent = serde_json::from_str(text).map_err(|e| CoreError::Json {
            data_type: "Jetstream event".to_string(),
            cause: e,
        })?;

        if event.kind != "commit" {
            trace!("ignoring {} event from {}", event.kind, event.did);
            return Ok(None);
        }
        let Some(commit) = event.commit else {
            return Err(CoreError::skipped("commit event without commit body"));
        };
        if commit.operation != "create" || commit.collection != self.collection {
            return Ok(None);
        }
        let Some(record) = commit.record else {
            return Err(CoreError::skipped(format!(
                "create of {}/{} without a record",
                event.did, commit.rkey
            )));
        };

        let record = PostRecord::from_value(record)?;
        if !record.has_type(&self.collection) {
            return Ok(None);
        }
        if record.images().is_empty() {
            return Ok(None);
        }

        let fallback_key = commit
            .cid
            .clone()
            .or_else(|| event.time_us.map(|t| t.to_string()))
            .unwrap_or_default();
        let ctx = RecordContext {
            author_id: &event.did,
            rkey: Some(commit.rkey.as_str()).filter(|k| !k.is_empty()),
            fallback_key: &fallback_key,
            received_at,
            cdn_base: &self.cdn_base,
        };

        record.grouped_post(&ctx).map(Some)
    }
}
