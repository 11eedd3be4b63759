use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::blocks::BlockDecoder;
use super::envelope::EnvelopeDecoder;
use super::transport::Frame;
use crate::config::{DecodeMode, FirehoseConfig};
use crate::post::Post;

/// Turns one inbound frame into zero or more posts.
///
/// Implementations never fail past this boundary; frames they cannot use
/// are logged and produce nothing.
#[async_trait]
pub trait FrameDecode: Send + Sync {
    async fn decode_at(&self, frame: &Frame, received_at: DateTime<Utc>) -> Vec<Post>;

    async fn decode(&self, frame: &Frame) -> Vec<Post> {
        self.decode_at(frame, Utc::now()).await
    }
}

#[async_trait]
impl FrameDecode for EnvelopeDecoder {
    async fn decode_at(&self, frame: &Frame, received_at: DateTime<Utc>) -> Vec<Post> {
        match frame {
            Frame::Text(text) => self.decode_text(text, received_at),
            Frame::Binary(data) => match std::str::from_utf8(data) {
                Ok(text) => self.decode_text(text, received_at),
                Err(_) => {
                    debug!("Skipping non-UTF-8 binary frame ({} bytes)", data.len());
                    Vec::new()
                }
            },
        }
    }
}

#[async_trait]
impl FrameDecode for BlockDecoder {
    async fn decode_at(&self, frame: &Frame, received_at: DateTime<Utc>) -> Vec<Post> {
        match frame {
            Frame::Binary(data) => self.decode_frame(data, received_at).await,
            Frame::Text(_) => {
                debug!("Skipping text frame in block mode");
                Vec::new()
            }
        }
    }
}

/// The decoder a connector runs, fixed by its [`DecodeMode`].
#[derive(Debug, Clone)]
pub enum FrameDecoder {
    Envelope(EnvelopeDecoder),
    Block(BlockDecoder),
}

impl FrameDecoder {
    pub fn from_config(config: &FirehoseConfig) -> Self {
        match config.mode {
            DecodeMode::Envelope => Self::Envelope(EnvelopeDecoder::new(
                config.collection.clone(),
                config.cdn_base.clone(),
            )),
            DecodeMode::Block => Self::Block(BlockDecoder::new(
                config.collection.clone(),
                config.cdn_base.clone(),
            )),
        }
    }

    pub fn mode(&self) -> DecodeMode {
        match self {
            Self::Envelope(_) => DecodeMode::Envelope,
            Self::Block(_) => DecodeMode::Block,
        }
    }
}

#[async_trait]
impl FrameDecode for FrameDecoder {
    async fn decode_at(&self, frame: &Frame, received_at: DateTime<Utc>) -> Vec<Post> {
        match self {
            Self::Envelope(decoder) => decoder.decode_at(frame, received_at).await,
            Self::Block(decoder) => decoder.decode_at(frame, received_at).await,
        }
    }
}
