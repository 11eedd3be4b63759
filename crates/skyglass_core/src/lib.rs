//! Skyglass Core - live image gallery over the Bluesky firehose
//!
//! This crate provides the firehose connector and frame decoders, the
//! bounded post store with its filters and notification bus, and the
//! render reconciler that front ends use to patch their views.

pub mod config;
pub mod error;
pub mod filter;
pub mod firehose;
pub mod media;
pub mod post;
pub mod reconcile;
pub mod status;
pub mod store;

pub use config::{
    load_config, load_config_from_standard_locations, DecodeMode, FirehoseConfig, GalleryConfig,
    StoreConfig,
};
pub use error::{ConfigError, CoreError, Result};
pub use filter::{FilterConfig, NsfwMode, SensitivityPolicy};
pub use firehose::{
    ConnectorStats, FirehoseConnector, Frame, FrameDecode, FrameDecoder, Transport,
    TransportEvent, WebSocketTransport,
};
pub use media::{ImageFormat, ImageSize};
pub use post::{AspectRatio, ImageRef, ModerationLabels, Post, PostId};
pub use reconcile::{Reconciler, RenderPatch};
pub use status::{ConnectionState, ConnectionStatus};
pub use store::{
    InsertOutcome, LayoutMode, SharedStore, Store, StoreSnapshot, SubscriptionId,
};
