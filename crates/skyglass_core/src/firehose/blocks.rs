//! Binary repo frames: DAG-CBOR blocks in a CAR container.
//!
//! Relays send event-stream frames, a DAG-CBOR header `{op, t}` followed by
//! a body. A `#commit` body names the repo, lists its ops with
//! `collection/rkey` paths and carries the touched blocks as a CAR. Frames
//! without such a header are read as a bare CAR, where a signed commit block
//! names the author and MST nodes map record CIDs to paths. Each block is
//! decoded on its own so a corrupt block costs only itself.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use cid::Cid;
use ipld_core::ipld::Ipld;
use iroh_car::CarReader;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::record::{PostRecord, RecordContext};
use crate::error::{CoreError, Result};
use crate::post::Post;

/// Author of records in a bare CAR that carries no commit block
pub const UNKNOWN_AUTHOR: &str = "unknown";

const COMMIT_EVENT: &str = "#commit";

/// Decodes binary frames into one post per embedded image.
#[derive(Debug, Clone)]
pub struct BlockDecoder {
    collection: String,
    cdn_base: String,
}

#[derive(Debug)]
enum EventFrame {
    Commit(CommitEvent),
    /// Any other event type, or an error frame
    Other(String),
}

#[derive(Debug)]
struct CommitEvent {
    repo: String,
    /// Record CID to `collection/rkey`, create ops only
    creates: HashMap<Cid, String>,
    blocks: Vec<u8>,
}

#[derive(Debug, Default)]
struct FrameBlocks {
    author: Option<String>,
    paths: HashMap<Cid, String>,
    /// Records without a known path are skipped
    require_path: bool,
    records: Vec<(Cid, Value)>,
}

impl BlockDecoder {
    pub fn new(collection: impl Into<String>, cdn_base: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            cdn_base: cdn_base.into(),
        }
    }

    /// Decode a relay event frame, falling back to a bare CAR when the frame
    /// has no event header. Never fails.
    pub async fn decode_frame(&self, bytes: &[u8], received_at: DateTime<Utc>) -> Vec<Post> {
        match parse_event(bytes) {
            Ok(Some(EventFrame::Commit(commit))) => self.decode_commit(commit, received_at).await,
            Ok(Some(EventFrame::Other(kind))) => {
                trace!("ignoring {} frame", kind);
                Vec::new()
            }
            Ok(None) => self.decode_car(bytes, received_at).await,
            Err(e) => {
                debug!("Skipping event frame: {}", e);
                Vec::new()
            }
        }
    }

    /// Decode a bare CAR. Never fails; unreadable containers and blocks are
    /// logged and skipped.
    pub async fn decode_car(&self, bytes: &[u8], received_at: DateTime<Utc>) -> Vec<Post> {
        match read_frame(bytes).await {
            Some(frame) => self.posts_from(frame, received_at),
            None => Vec::new(),
        }
    }

    async fn decode_commit(&self, commit: CommitEvent, received_at: DateTime<Utc>) -> Vec<Post> {
        if commit.creates.is_empty() {
            return Vec::new();
        }
        let Some(mut frame) = read_frame(&commit.blocks).await else {
            return Vec::new();
        };

        // the event header is authoritative; MST paths would also cover updates
        frame.author = Some(commit.repo);
        frame.paths = commit.creates;
        frame.require_path = true;
        self.posts_from(frame, received_at)
    }

    fn posts_from(&self, frame: FrameBlocks, received_at: DateTime<Utc>) -> Vec<Post> {
        let author = match frame.author.as_deref() {
            Some(author) => author,
            None => {
                if !frame.records.is_empty() {
                    debug!(
                        "CAR frame has {} records but no commit block, author unknown",
                        frame.records.len()
                    );
                }
                UNKNOWN_AUTHOR
            }
        };

        let mut posts = Vec::new();
        for (cid, value) in frame.records {
            let rkey = match frame.paths.get(&cid) {
                Some(path) => match path.split_once('/') {
                    Some((collection, rkey)) if collection == self.collection => Some(rkey),
                    _ => continue,
                },
                None if frame.require_path => continue,
                None => None,
            };

            let record = match PostRecord::from_value(value) {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping record {}: {}", cid, e);
                    continue;
                }
            };
            if !record.has_type(&self.collection) {
                continue;
            }

            let fallback_key = cid.to_string();
            let ctx = RecordContext {
                author_id: author,
                rkey,
                fallback_key: &fallback_key,
                received_at,
                cdn_base: &self.cdn_base,
            };
            posts.extend(record.single_image_posts(&ctx));
        }

        posts
    }
}

impl FrameBlocks {
    fn absorb(&mut self, cid: Cid, node: Ipld) {
        let Ipld::Map(map) = node else {
            return;
        };

        if matches!(map.get("$type"), Some(Ipld::String(_))) {
            self.records.push((cid, ipld_to_json(Ipld::Map(map))));
        } else if let (Some(Ipld::String(did)), Some(Ipld::Link(_))) =
            (map.get("did"), map.get("data"))
        {
            self.author.get_or_insert_with(|| did.clone());
        } else if let Some(Ipld::List(entries)) = map.get("e") {
            self.absorb_mst_entries(entries);
        }
    }

    /// MST keys are prefix-compressed against the previous entry.
    fn absorb_mst_entries(&mut self, entries: &[Ipld]) {
        let mut prev_key: Vec<u8> = Vec::new();

        for entry in entries {
            let Ipld::Map(entry) = entry else {
                continue;
            };
            let Some(Ipld::Bytes(suffix)) = entry.get("k") else {
                continue;
            };
            let prefix = match entry.get("p") {
                Some(Ipld::Integer(p)) => usize::try_from(*p).unwrap_or(0),
                _ => 0,
            };

            let mut key = prev_key[..prefix.min(prev_key.len())].to_vec();
            key.extend_from_slice(suffix);

            if let Some(Ipld::Link(value)) = entry.get("v") {
                self.paths
                    .insert(*value, String::from_utf8_lossy(&key).into_owned());
            }
            prev_key = key;
        }
    }
}

/// Split an event-stream frame into header and body.
///
/// `Ok(None)` means the frame does not start with an event header.
fn parse_event(bytes: &[u8]) -> Result<Option<EventFrame>> {
    let mut rest = bytes;
    let Ok(Ipld::Map(header)) = serde_ipld_dagcbor::de::from_reader_once::<Ipld, _>(&mut rest) else {
        return Ok(None);
    };
    let Some(Ipld::Integer(op)) = header.get("op") else {
        return Ok(None);
    };

    if *op != 1 {
        return Ok(Some(EventFrame::Other(format!("error (op {})", op))));
    }
    let kind = match header.get("t") {
        Some(Ipld::String(t)) => t.as_str(),
        _ => "untyped",
    };
    if kind != COMMIT_EVENT {
        return Ok(Some(EventFrame::Other(kind.to_string())));
    }

    let body: Ipld = serde_ipld_dagcbor::from_slice(rest).map_err(|e| CoreError::DagCbor {
        data_type: "commit event body".to_string(),
        details: e.to_string(),
    })?;
    commit_event(body).map(|commit| Some(EventFrame::Commit(commit)))
}

fn commit_event(body: Ipld) -> Result<CommitEvent> {
    let Ipld::Map(mut body) = body else {
        return Err(CoreError::skipped("commit event body is not a map"));
    };
    let Some(Ipld::String(repo)) = body.remove("repo") else {
        return Err(CoreError::skipped("commit event without repo"));
    };
    let Some(Ipld::Bytes(blocks)) = body.remove("blocks") else {
        return Err(CoreError::skipped(format!("commit event from {} without blocks", repo)));
    };

    let mut creates = HashMap::new();
    if let Some(Ipld::List(ops)) = body.remove("ops") {
        for op in ops {
            let Ipld::Map(op) = op else {
                continue;
            };
            if let (Some(Ipld::String(action)), Some(Ipld::String(path)), Some(Ipld::Link(cid))) =
                (op.get("action"), op.get("path"), op.get("cid"))
            {
                if action == "create" {
                    creates.insert(*cid, path.clone());
                }
            }
        }
    }

    Ok(CommitEvent {
        repo,
        creates,
        blocks,
    })
}

async fn read_frame(car: &[u8]) -> Option<FrameBlocks> {
    let blocks = match read_blocks(car).await {
        Ok(blocks) => blocks,
        Err(e) => {
            debug!("Skipping unreadable CAR frame: {}", e);
            return None;
        }
    };

    let mut frame = FrameBlocks::default();
    for (cid, data) in blocks {
        match serde_ipld_dagcbor::from_slice::<Ipld>(&data) {
            Ok(node) => frame.absorb(cid, node),
            Err(e) => {
                let err = CoreError::DagCbor {
                    data_type: format!("block {}", cid),
                    details: e.to_string(),
                };
                debug!("Skipping block: {}", err);
            }
        }
    }
    Some(frame)
}

async fn read_blocks(bytes: &[u8]) -> Result<Vec<(Cid, Vec<u8>)>> {
    let mut reader = CarReader::new(bytes).await.map_err(|e| CoreError::Car {
        operation: "opening CAR".to_string(),
        cause: e,
    })?;

    let mut blocks = Vec::new();
    loop {
        match reader.next_block().await {
            Ok(Some(block)) => blocks.push(block),
            Ok(None) => break,
            Err(e) => {
                // keep what was readable
                debug!(
                    "Stopping at unreadable block after {} blocks: {}",
                    blocks.len(),
                    e
                );
                break;
            }
        }
    }

    Ok(blocks)
}

/// Project a DAG-CBOR node into the JSON data model: links become
/// `{"$link": cid}` and byte strings become `{"$bytes": base64}`.
fn ipld_to_json(node: Ipld) -> Value {
    match node {
        Ipld::Null => Value::Null,
        Ipld::Bool(b) => Value::Bool(b),
        Ipld::Integer(i) => i64::try_from(i)
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(i.to_string())),
        Ipld::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ipld::String(s) => Value::String(s),
        Ipld::Bytes(bytes) => json!({ "$bytes": STANDARD_NO_PAD.encode(bytes) }),
        Ipld::List(items) => Value::Array(items.into_iter().map(ipld_to_json).collect()),
        Ipld::Map(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, ipld_to_json(value)))
                .collect(),
        ),
        Ipld::Link(cid) => json!({ "$link": cid.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_POST_COLLECTION;
    use crate::media::DEFAULT_CDN_BASE;
    use chrono::TimeZone;
    use iroh_car::{CarHeader, CarWriter};
    use multihash_codetable::{Code, MultihashDigest};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const DAG_CBOR: u64 = 0x71;
    const RAW: u64 = 0x55;

    fn map(entries: Vec<(&str, Ipld)>) -> Ipld {
        Ipld::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect::<BTreeMap<_, _>>(),
        )
    }

    fn text(s: &str) -> Ipld {
        Ipld::String(s.to_string())
    }

    fn block(node: &Ipld) -> (Cid, Vec<u8>) {
        let data = serde_ipld_dagcbor::to_vec(node).unwrap();
        (Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(&data)), data)
    }

    fn blob_cid(seed: &[u8]) -> Cid {
        Cid::new_v1(RAW, Code::Sha2_256.digest(seed))
    }

    fn image(cid: Cid, alt: &str) -> Ipld {
        map(vec![
            ("alt", text(alt)),
            (
                "image",
                map(vec![
                    ("$type", text("blob")),
                    ("ref", Ipld::Link(cid)),
                    ("mimeType", text("image/jpeg")),
                    ("size", Ipld::Integer(1024)),
                ]),
            ),
            (
                "aspectRatio",
                map(vec![("width", Ipld::Integer(3)), ("height", Ipld::Integer(2))]),
            ),
        ])
    }

    fn post_record(images: Vec<Ipld>) -> Ipld {
        map(vec![
            ("$type", text("app.bsky.feed.post")),
            ("text", text("from the relay")),
            ("createdAt", text("2024-05-01T12:00:00Z")),
            (
                "embed",
                map(vec![
                    ("$type", text("app.bsky.embed.images")),
                    ("images", Ipld::List(images)),
                ]),
            ),
        ])
    }

    fn mst_node(path: &str, record: Cid) -> Ipld {
        map(vec![
            ("l", Ipld::Null),
            (
                "e",
                Ipld::List(vec![map(vec![
                    ("p", Ipld::Integer(0)),
                    ("k", Ipld::Bytes(path.as_bytes().to_vec())),
                    ("v", Ipld::Link(record)),
                    ("t", Ipld::Null),
                ])]),
            ),
        ])
    }

    fn commit(did: &str, data: Cid) -> Ipld {
        map(vec![
            ("did", text(did)),
            ("version", Ipld::Integer(3)),
            ("data", Ipld::Link(data)),
            ("rev", text("3kznmn7xqxl22")),
            ("prev", Ipld::Null),
            ("sig", Ipld::Bytes(vec![1, 2, 3])),
        ])
    }

    async fn car(blocks: &[(Cid, Vec<u8>)]) -> Vec<u8> {
        let mut buffer = Vec::new();
        let header = CarHeader::new_v1(vec![blocks[0].0]);
        let mut writer = CarWriter::new(header, &mut buffer);
        for (cid, data) in blocks {
            writer.write(*cid, data).await.unwrap();
        }
        writer.finish().await.unwrap();
        buffer
    }

    fn decoder() -> BlockDecoder {
        BlockDecoder::new(DEFAULT_POST_COLLECTION, DEFAULT_CDN_BASE)
    }

    fn received() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn commit_header() -> Ipld {
        map(vec![("op", Ipld::Integer(1)), ("t", text("#commit"))])
    }

    fn commit_body(repo: &str, action: &str, path: &str, record: Cid, blocks: Vec<u8>) -> Ipld {
        map(vec![
            ("seq", Ipld::Integer(42)),
            ("repo", text(repo)),
            ("rev", text("3kznmn7xqxl22")),
            ("time", text("2024-05-01T12:00:01Z")),
            ("tooBig", Ipld::Bool(false)),
            (
                "ops",
                Ipld::List(vec![map(vec![
                    ("action", text(action)),
                    ("path", text(path)),
                    ("cid", Ipld::Link(record)),
                ])]),
            ),
            ("blocks", Ipld::Bytes(blocks)),
        ])
    }

    fn event_frame(header: &Ipld, body: &Ipld) -> Vec<u8> {
        let mut bytes = serde_ipld_dagcbor::to_vec(header).unwrap();
        bytes.extend(serde_ipld_dagcbor::to_vec(body).unwrap());
        bytes
    }

    fn repo_frame(path: &str, record: &Ipld) -> Vec<(Cid, Vec<u8>)> {
        let record_block = block(record);
        let mst_block = block(&mst_node(path, record_block.0));
        let commit_block = block(&commit("did:plc:relay", mst_block.0));
        vec![commit_block, mst_block, record_block]
    }

    #[tokio::test]
    async fn test_each_image_becomes_a_post() {
        let first = blob_cid(b"first");
        let second = blob_cid(b"second");
        let record = post_record(vec![image(first, "one"), image(second, "two")]);
        let bytes = car(&repo_frame("app.bsky.feed.post/3kabc", &record)).await;

        let posts = decoder().decode_car(&bytes, received()).await;
        assert_eq!(posts.len(), 2);

        assert_eq!(
            posts[0].id.as_str(),
            format!("did:plc:relay-3kabc-{}-1700000000000", first)
        );
        assert_eq!(posts[0].images().len(), 1);
        assert_eq!(posts[0].images()[0].content_id, first.to_string());
        assert_eq!(posts[0].images()[0].alt_text, "one");
        assert_eq!(posts[1].images()[0].content_id, second.to_string());
        assert_eq!(
            posts[1].source_url,
            "https://bsky.app/profile/did:plc:relay/post/3kabc"
        );
        assert_eq!(
            posts[1].images()[0].thumbnail_url,
            format!(
                "https://cdn.bsky.app/img/feed_thumbnail/plain/did:plc:relay/{}@jpeg",
                second
            )
        );
    }

    #[tokio::test]
    async fn test_corrupt_block_is_skipped() {
        let record = post_record(vec![image(blob_cid(b"only"), "")]);
        let mut blocks = repo_frame("app.bsky.feed.post/3kabc", &record);

        let garbage = vec![0xff, 0x00, 0x13, 0x37];
        blocks.insert(1, (Cid::new_v1(DAG_CBOR, Code::Sha2_256.digest(&garbage)), garbage));

        let bytes = car(&blocks).await;
        let posts = decoder().decode_car(&bytes, received()).await;
        assert_eq!(posts.len(), 1);
    }

    #[tokio::test]
    async fn test_other_collections_skipped() {
        let record = post_record(vec![image(blob_cid(b"x"), "")]);
        let bytes = car(&repo_frame("app.bsky.feed.repost/3kabc", &record)).await;
        assert!(decoder().decode_car(&bytes, received()).await.is_empty());

        let like = map(vec![
            ("$type", text("app.bsky.feed.like")),
            ("createdAt", text("2024-05-01T12:00:00Z")),
        ]);
        let bytes = car(&repo_frame("app.bsky.feed.post/3kabc", &like)).await;
        assert!(decoder().decode_car(&bytes, received()).await.is_empty());
    }

    #[tokio::test]
    async fn test_single_record_block_yields_post_per_image() {
        let record = post_record(vec![
            image(blob_cid(b"left"), "left"),
            image(blob_cid(b"right"), "right"),
        ]);
        let bytes = car(&[block(&record)]).await;

        let posts = decoder().decode_frame(&bytes, received()).await;
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|post| post.images().len() == 1));
        assert!(posts.iter().all(|post| post.author_id == UNKNOWN_AUTHOR));
        assert_eq!(posts[0].images()[0].alt_text, "left");
        assert_eq!(posts[1].images()[0].alt_text, "right");
    }

    #[tokio::test]
    async fn test_commit_event_frame() {
        let first = blob_cid(b"first");
        let second = blob_cid(b"second");
        let record = post_record(vec![image(first, "one"), image(second, "two")]);
        let record_block = block(&record);
        let blocks = car(&[record_block.clone()]).await;
        let frame = event_frame(
            &commit_header(),
            &commit_body(
                "did:plc:event",
                "create",
                "app.bsky.feed.post/3kevt",
                record_block.0,
                blocks,
            ),
        );

        let posts = decoder().decode_frame(&frame, received()).await;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0].author_id, "did:plc:event");
        assert_eq!(
            posts[0].id.as_str(),
            format!("did:plc:event-3kevt-{}-1700000000000", first)
        );
        assert_eq!(
            posts[1].source_url,
            "https://bsky.app/profile/did:plc:event/post/3kevt"
        );
        assert_eq!(posts[1].images()[0].content_id, second.to_string());
    }

    #[tokio::test]
    async fn test_commit_event_repo_wins_over_commit_block() {
        let record = post_record(vec![image(blob_cid(b"x"), "")]);
        let blocks = repo_frame("app.bsky.feed.post/3kabc", &record);
        let record_cid = blocks[2].0;
        let frame = event_frame(
            &commit_header(),
            &commit_body(
                "did:plc:event",
                "create",
                "app.bsky.feed.post/3kabc",
                record_cid,
                car(&blocks).await,
            ),
        );

        let posts = decoder().decode_frame(&frame, received()).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author_id, "did:plc:event");
    }

    #[tokio::test]
    async fn test_commit_event_only_emits_creates() {
        let record = post_record(vec![image(blob_cid(b"x"), "")]);
        let record_block = block(&record);

        let update = event_frame(
            &commit_header(),
            &commit_body(
                "did:plc:event",
                "update",
                "app.bsky.feed.post/3kevt",
                record_block.0,
                car(&[record_block.clone()]).await,
            ),
        );
        assert!(decoder().decode_frame(&update, received()).await.is_empty());

        let repost = event_frame(
            &commit_header(),
            &commit_body(
                "did:plc:event",
                "create",
                "app.bsky.feed.repost/3kevt",
                record_block.0,
                car(&[record_block]).await,
            ),
        );
        assert!(decoder().decode_frame(&repost, received()).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_commit_frames_ignored() {
        let identity = event_frame(
            &map(vec![("op", Ipld::Integer(1)), ("t", text("#identity"))]),
            &map(vec![("did", text("did:plc:event")), ("seq", Ipld::Integer(7))]),
        );
        assert!(decoder().decode_frame(&identity, received()).await.is_empty());

        let error = event_frame(
            &map(vec![("op", Ipld::Integer(-1))]),
            &map(vec![("error", text("FutureCursor"))]),
        );
        assert!(decoder().decode_frame(&error, received()).await.is_empty());

        let truncated = serde_ipld_dagcbor::to_vec(&commit_header()).unwrap();
        assert!(decoder().decode_frame(&truncated, received()).await.is_empty());
    }

    #[tokio::test]
    async fn test_bare_car_frame_falls_back() {
        let record = post_record(vec![image(blob_cid(b"x"), "")]);
        let bytes = car(&repo_frame("app.bsky.feed.post/3kabc", &record)).await;

        let posts = decoder().decode_frame(&bytes, received()).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].author_id, "did:plc:relay");
    }

    #[tokio::test]
    async fn test_record_without_path_uses_profile_url() {
        let record = post_record(vec![image(blob_cid(b"x"), "")]);
        let record_block = block(&record);
        let commit_block = block(&commit("did:plc:relay", record_block.0));
        let bytes = car(&[commit_block, record_block.clone()]).await;

        let posts = decoder().decode_car(&bytes, received()).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].source_url, "https://bsky.app/profile/did:plc:relay");
        assert!(posts[0].id.as_str().contains(&record_block.0.to_string()));
    }

    #[tokio::test]
    async fn test_not_a_car() {
        assert!(decoder()
            .decode_car(b"definitely not a car", received())
            .await
            .is_empty());
        assert!(decoder().decode_car(&[], received()).await.is_empty());
    }

    #[test]
    fn test_ipld_projection() {
        let link = blob_cid(b"l");
        let node = map(vec![
            ("bytes", Ipld::Bytes(vec![0, 1, 2])),
            ("link", Ipld::Link(link)),
            ("list", Ipld::List(vec![Ipld::Integer(7), Ipld::Bool(true)])),
        ]);
        assert_eq!(
            ipld_to_json(node),
            json!({
                "bytes": {"$bytes": "AAEC"},
                "link": {"$link": link.to_string()},
                "list": [7, true]
            })
        );
    }

    #[test]
    fn test_mst_prefix_compression() {
        let a = blob_cid(b"a");
        let b = blob_cid(b"b");
        let entries = vec![
            map(vec![
                ("p", Ipld::Integer(0)),
                ("k", Ipld::Bytes(b"app.bsky.feed.post/3kaaa".to_vec())),
                ("v", Ipld::Link(a)),
            ]),
            map(vec![
                ("p", Ipld::Integer(22)),
                ("k", Ipld::Bytes(b"bb".to_vec())),
                ("v", Ipld::Link(b)),
            ]),
        ];

        let mut frame = FrameBlocks::default();
        frame.absorb_mst_entries(&entries);
        assert_eq!(frame.paths[&a], "app.bsky.feed.post/3kaaa");
        assert_eq!(frame.paths[&b], "app.bsky.feed.post/3kabb");
    }
}
