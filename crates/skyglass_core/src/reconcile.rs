//! Decide whether a rendering surface can be patched or must be rebuilt.
//!
//! Pure growth and tail eviction produce a patch; anything else (a filter
//! change that removes or reorders posts) produces a full rebuild.

use std::collections::HashSet;
use std::sync::Arc;

use crate::post::{Post, PostId};

/// Instructions for the rendering surface.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderPatch {
    Incremental {
        /// Newly visible posts, newest first
        append: Vec<Arc<Post>>,
        /// Ids no longer visible, in previous render order
        remove: Vec<PostId>,
    },
    Rebuild {
        /// Complete view, newest first
        posts: Vec<Arc<Post>>,
    },
}

impl RenderPatch {
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental { .. })
    }

    pub fn appended_ids(&self) -> Vec<&PostId> {
        match self {
            Self::Incremental { append, .. } => append.iter().map(|p| &p.id).collect(),
            Self::Rebuild { .. } => Vec::new(),
        }
    }
}

/// Tracks the identifier sequence last handed to the rendering surface.
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    rendered: Vec<PostId>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers of the last emitted render, newest first.
    pub fn rendered(&self) -> &[PostId] {
        &self.rendered
    }

    /// True when `view` has exactly the identifiers last rendered, in order.
    pub fn is_current(&self, view: &[Arc<Post>]) -> bool {
        self.rendered.len() == view.len()
            && self.rendered.iter().zip(view).all(|(id, post)| *id == post.id)
    }

    pub fn reconcile(&mut self, view: &[Arc<Post>]) -> RenderPatch {
        let new_ids: Vec<PostId> = view.iter().map(|p| p.id.clone()).collect();

        let patch = {
            let old_set: HashSet<&PostId> = self.rendered.iter().collect();
            let new_set: HashSet<&PostId> = new_ids.iter().collect();

            let added: Vec<Arc<Post>> = view
                .iter()
                .filter(|p| !old_set.contains(&p.id))
                .cloned()
                .collect();
            let removed: Vec<PostId> = self
                .rendered
                .iter()
                .filter(|id| !new_set.contains(id))
                .cloned()
                .collect();

            if !added.is_empty() && added.len() >= removed.len() {
                RenderPatch::Incremental {
                    append: added,
                    remove: removed,
                }
            } else {
                RenderPatch::Rebuild {
                    posts: view.to_vec(),
                }
            }
        };

        self.rendered = new_ids;
        patch
    }

    /// Forget the previous render, forcing the next call to rebuild or append
    /// everything.
    pub fn reset(&mut self) {
        self.rendered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ImageFormat, DEFAULT_CDN_BASE};
    use crate::post::{AspectRatio, ImageRef, ModerationLabels};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn post(id: &str) -> Arc<Post> {
        Arc::new(
            Post::new(
                PostId(id.to_string()),
                "did:plc:author",
                None,
                "",
                Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                "https://bsky.app/profile/did:plc:author",
                vec![ImageRef::new(
                    DEFAULT_CDN_BASE,
                    "did:plc:author",
                    id,
                    ImageFormat::Jpeg,
                    "",
                    AspectRatio::SQUARE,
                )],
                ModerationLabels::new(),
            )
            .unwrap(),
        )
    }

    fn view(ids: &[&str]) -> Vec<Arc<Post>> {
        ids.iter().map(|id| post(id)).collect()
    }

    fn id_strings(posts: &[Arc<Post>]) -> Vec<String> {
        posts.iter().map(|p| p.id.0.clone()).collect()
    }

    fn primed(ids: &[&str]) -> Reconciler {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(&view(ids));
        reconciler
    }

    #[test]
    fn test_new_post_is_appended() {
        let mut reconciler = primed(&["A", "B", "C"]);
        let patch = reconciler.reconcile(&view(&["D", "A", "B", "C"]));

        match patch {
            RenderPatch::Incremental { append, remove } => {
                assert_eq!(id_strings(&append), vec!["D"]);
                assert!(remove.is_empty());
            }
            other => panic!("expected incremental patch, got {:?}", other),
        }
    }

    #[test]
    fn test_pure_removal_rebuilds() {
        let mut reconciler = primed(&["A", "B", "C"]);
        let patch = reconciler.reconcile(&view(&["A", "C"]));

        match patch {
            RenderPatch::Rebuild { posts } => assert_eq!(id_strings(&posts), vec!["A", "C"]),
            other => panic!("expected rebuild, got {:?}", other),
        }
        assert_eq!(
            reconciler.rendered(),
            &[PostId("A".into()), PostId("C".into())]
        );
    }

    #[test]
    fn test_tail_eviction_is_incremental() {
        let mut reconciler = primed(&["C", "B", "A"]);
        let patch = reconciler.reconcile(&view(&["E", "D", "C"]));

        assert_eq!(
            patch,
            RenderPatch::Incremental {
                append: view(&["E", "D"]),
                remove: vec![PostId("B".into()), PostId("A".into())],
            }
        );
    }

    #[test]
    fn test_more_removed_than_added_rebuilds() {
        let mut reconciler = primed(&["C", "B", "A"]);
        let patch = reconciler.reconcile(&view(&["D"]));
        assert!(!patch.is_incremental());
    }

    #[test]
    fn test_first_render_appends_everything() {
        let mut reconciler = Reconciler::new();
        let patch = reconciler.reconcile(&view(&["B", "A"]));
        let appended: Vec<_> = patch.appended_ids().into_iter().map(|id| id.0.clone()).collect();
        assert_eq!(appended, vec!["B", "A"]);
    }

    #[test]
    fn test_unchanged_view_rebuilds() {
        let mut reconciler = primed(&["A"]);
        let patch = reconciler.reconcile(&view(&["A"]));
        assert_eq!(patch, RenderPatch::Rebuild { posts: view(&["A"]) });
    }

    #[test]
    fn test_is_current() {
        let reconciler = primed(&["B", "A"]);
        assert!(reconciler.is_current(&view(&["B", "A"])));
        assert!(!reconciler.is_current(&view(&["A", "B"])));
        assert!(!reconciler.is_current(&view(&["C", "B", "A"])));
        assert!(Reconciler::new().is_current(&[]));
    }

    #[test]
    fn test_reset_forgets_previous_render() {
        let mut reconciler = primed(&["A"]);
        reconciler.reset();
        assert!(reconciler.rendered().is_empty());
        assert!(reconciler.reconcile(&view(&["A"])).is_incremental());
    }
}
