//! Terminal renderer driven by store notifications.
//!
//! The store observer runs with the store locked, so it only reconciles the
//! view and forwards the result over a channel; printing happens on the main
//! task.

use std::sync::Arc;

use owo_colors::OwoColorize;
use skyglass_core::{
    ConnectionState, ConnectionStatus, NsfwMode, Post, Reconciler, RenderPatch, SharedStore,
    SubscriptionId,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::output::Output;

/// Longest post text shown on one line
const MAX_TEXT_CHARS: usize = 80;

#[derive(Debug, Clone)]
pub enum RenderEvent {
    Patch {
        patch: RenderPatch,
        nsfw_mode: NsfwMode,
    },
    Connection {
        status: ConnectionStatus,
        state: ConnectionState,
    },
}

/// Subscribe a reconciling observer to the store.
pub fn attach(store: &SharedStore) -> (SubscriptionId, mpsc::UnboundedReceiver<RenderEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut reconciler = Reconciler::new();
    let mut last_connection: Option<(ConnectionStatus, ConnectionState)> = None;

    let id = store.lock().subscribe(move |snapshot| {
        let connection = (snapshot.status, snapshot.connection);
        if last_connection != Some(connection) {
            last_connection = Some(connection);
            forward(
                &tx,
                RenderEvent::Connection {
                    status: snapshot.status,
                    state: snapshot.connection,
                },
            );
        }

        if !reconciler.is_current(&snapshot.posts) {
            forward(
                &tx,
                RenderEvent::Patch {
                    patch: reconciler.reconcile(&snapshot.posts),
                    nsfw_mode: snapshot.filter.nsfw_mode,
                },
            );
        }
    });

    (id, rx)
}

/// Send to the render loop. Returns false once it has stopped listening.
fn forward(tx: &mpsc::UnboundedSender<RenderEvent>, event: RenderEvent) -> bool {
    match tx.send(event) {
        Ok(()) => true,
        Err(mpsc::error::SendError(event)) => {
            debug!("Render loop has stopped, dropping {:?}", event);
            false
        }
    }
}

/// Whether the main loop should keep going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    LimitReached,
    GaveUp,
}

#[derive(Debug)]
pub struct TerminalRenderer {
    output: Output,
    limit: Option<usize>,
    rendered: usize,
}

impl TerminalRenderer {
    pub fn new(output: Output, limit: Option<usize>) -> Self {
        Self {
            output,
            limit,
            rendered: 0,
        }
    }

    /// Posts printed by incremental appends so far
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    pub fn render(&mut self, event: &RenderEvent) -> Flow {
        match event {
            RenderEvent::Connection { status, state } => {
                let line = format!("firehose {} ({})", status, state);
                match status {
                    ConnectionStatus::Error => self.output.warning(&line),
                    _ => self.output.status(&line),
                }
                if state.is_terminal() {
                    self.output
                        .error("Gave up reconnecting to the firehose; restart to try again");
                    return Flow::GaveUp;
                }
            }
            RenderEvent::Patch { patch, nsfw_mode } => {
                for line in patch_lines(patch, *nsfw_mode) {
                    self.output.print(&line);
                }
                if let RenderPatch::Incremental { append, .. } = patch {
                    self.rendered += append.len();
                }
            }
        }

        match self.limit {
            Some(limit) if self.rendered >= limit => Flow::LimitReached,
            _ => Flow::Continue,
        }
    }
}

/// Lines describing one patch. Oldest appended post first, so the newest
/// ends up at the bottom of the terminal.
pub fn patch_lines(patch: &RenderPatch, nsfw_mode: NsfwMode) -> Vec<String> {
    match patch {
        RenderPatch::Incremental { append, remove } => {
            let mut lines: Vec<String> = append
                .iter()
                .rev()
                .map(|post| post_line(post, nsfw_mode))
                .collect();
            if !remove.is_empty() {
                lines.push(format!("  - {} older posts left the view", remove.len()));
            }
            lines
        }
        RenderPatch::Rebuild { posts } => {
            vec![format!("↻ view rebuilt: {} posts", posts.len())]
        }
    }
}

fn post_line(post: &Arc<Post>, nsfw_mode: NsfwMode) -> String {
    let extra = match post.images().len() {
        0 | 1 => String::new(),
        n => format!(" (+{} more)", n - 1),
    };

    let link = match post.first_image() {
        _ if post.is_sensitive() && nsfw_mode == NsfwMode::Blurred => {
            "[sensitive image blurred]".to_string()
        }
        Some(image) => image.thumbnail_url.clone(),
        None => "[no image]".to_string(),
    };

    format!(
        "{} {}: {}{}\n    {}",
        post.timestamp
            .with_timezone(&chrono::Local)
            .format("%H:%M:%S")
            .dimmed(),
        post.author_display.bright_cyan(),
        truncate(&post.text, MAX_TEXT_CHARS),
        extra,
        link
    )
}

fn truncate(text: &str, max_chars: usize) -> String {
    let single_line = text.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let cut: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use skyglass_core::{AspectRatio, ImageFormat, ImageRef, ModerationLabels, PostId};

    fn post(id: &str, labels: ModerationLabels) -> Arc<Post> {
        Arc::new(
            Post::new(
                PostId(id.to_string()),
                "did:plc:cli",
                None,
                "caption",
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                "https://bsky.app/profile/did:plc:cli",
                vec![ImageRef::new(
                    "https://cdn.bsky.app",
                    "did:plc:cli",
                    id,
                    ImageFormat::Jpeg,
                    "",
                    AspectRatio::SQUARE,
                )],
                labels,
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_forward_reports_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        let event = RenderEvent::Connection {
            status: ConnectionStatus::Connected,
            state: ConnectionState::Connected,
        };
        assert!(forward(&tx, event.clone()));

        drop(rx);
        assert!(!forward(&tx, event));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("two\nlines", 10), "two lines");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
    }

    #[test]
    fn test_incremental_lines_oldest_first() {
        let patch = RenderPatch::Incremental {
            append: vec![post("new", ModerationLabels::new()), post("old", ModerationLabels::new())],
            remove: vec![PostId("gone".into())],
        };
        let lines = patch_lines(&patch, NsfwMode::Shown);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("/old@jpeg"));
        assert!(lines[1].contains("/new@jpeg"));
        assert!(lines[2].contains("1 older posts"));
    }

    #[test]
    fn test_blurred_sensitive_post_hides_link() {
        let patch = RenderPatch::Incremental {
            append: vec![post("nsfw", ModerationLabels::new().with("porn", true))],
            remove: vec![],
        };
        let blurred = patch_lines(&patch, NsfwMode::Blurred);
        assert!(blurred[0].contains("[sensitive image blurred]"));

        let shown = patch_lines(&patch, NsfwMode::Shown);
        assert!(shown[0].contains("/nsfw@jpeg"));
    }

    #[test]
    fn test_limit_counts_appended_posts() {
        let mut renderer = TerminalRenderer::new(Output::new(), Some(2));
        let one = RenderEvent::Patch {
            patch: RenderPatch::Incremental {
                append: vec![post("a", ModerationLabels::new())],
                remove: vec![],
            },
            nsfw_mode: NsfwMode::Shown,
        };
        assert_eq!(renderer.render(&one), Flow::Continue);

        let rebuild = RenderEvent::Patch {
            patch: RenderPatch::Rebuild { posts: vec![] },
            nsfw_mode: NsfwMode::Shown,
        };
        assert_eq!(renderer.render(&rebuild), Flow::Continue);
        assert_eq!(renderer.render(&one), Flow::LimitReached);
        assert_eq!(renderer.rendered(), 2);
    }

    #[test]
    fn test_given_up_stops_rendering() {
        let mut renderer = TerminalRenderer::new(Output::new(), None);
        let event = RenderEvent::Connection {
            status: ConnectionStatus::Disconnected,
            state: ConnectionState::GivenUp,
        };
        assert_eq!(renderer.render(&event), Flow::GaveUp);
    }
}
