//! Bounded, newest-first post store with its notification bus.
//!
//! The store is the hub the connector reports to and the rendering layer
//! reads from. It is mutated only through `&mut self`; the composition root
//! shares it as a [`SharedStore`] so every mutation is serialized.

mod subscription;

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::filter::{passes_with_policy, FilterConfig, NsfwMode, SensitivityPolicy};
use crate::post::{Post, PostId};
use crate::status::{ConnectionState, ConnectionStatus};

pub use subscription::{Observer, SubscriptionId};
use subscription::SubscriptionRegistry;

/// Store handle shared between the connector and consumers.
pub type SharedStore = Arc<Mutex<Store>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMode {
    #[default]
    Masonry,
    Grid,
}

impl LayoutMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Masonry => Self::Grid,
            Self::Grid => Self::Masonry,
        }
    }
}

/// Consistent view handed to observers after each mutation.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    /// Filtered posts, newest first
    pub posts: Vec<Arc<Post>>,
    pub status: ConnectionStatus,
    pub connection: ConnectionState,
    pub paused: bool,
    pub layout: LayoutMode,
    pub filter: FilterConfig,
    /// Unfiltered post count
    pub total: usize,
}

impl StoreSnapshot {
    pub fn ids(&self) -> Vec<PostId> {
        self.posts.iter().map(|p| p.id.clone()).collect()
    }

    /// The connector exhausted its reconnect budget.
    pub fn has_given_up(&self) -> bool {
        self.connection.is_terminal()
    }
}

/// What happened to a post handed to [`Store::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted { evicted: usize },
    Paused,
    Duplicate,
}

#[derive(Debug)]
pub struct Store {
    posts: VecDeque<Arc<Post>>,
    ids: HashSet<PostId>,
    capacity: usize,
    column_count: usize,
    sensitivity: SensitivityPolicy,
    filter: FilterConfig,
    paused: bool,
    layout: LayoutMode,
    status: ConnectionStatus,
    connection: ConnectionState,
    subscribers: SubscriptionRegistry,
}

impl Store {
    /// Create an empty store. Misconfigured capacity is rejected here and
    /// nowhere else.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            posts: VecDeque::with_capacity(config.capacity + config.column_count),
            ids: HashSet::with_capacity(config.capacity + config.column_count),
            capacity: config.capacity,
            column_count: config.column_count,
            sensitivity: config.sensitivity,
            filter: FilterConfig::default(),
            paused: false,
            layout: LayoutMode::default(),
            status: ConnectionStatus::Disconnected,
            connection: ConnectionState::Idle,
            subscribers: SubscriptionRegistry::default(),
        })
    }

    pub fn shared(config: StoreConfig) -> Result<SharedStore> {
        Ok(Arc::new(Mutex::new(Self::new(config)?)))
    }

    /// Builder-style initial filter, applied without notifying anyone.
    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_layout(mut self, layout: LayoutMode) -> Self {
        self.layout = layout;
        self
    }

    /// Prepend a post, evicting from the tail once the surplus reaches a
    /// whole eviction quantum.
    pub fn insert(&mut self, post: Post) -> InsertOutcome {
        if self.paused {
            return InsertOutcome::Paused;
        }
        if self.ids.contains(&post.id) {
            debug!("Store ignoring duplicate post {}", post.id);
            return InsertOutcome::Duplicate;
        }

        self.ids.insert(post.id.clone());
        self.posts.push_front(Arc::new(post));

        let evicted = self.evict();
        self.notify();
        InsertOutcome::Inserted { evicted }
    }

    fn evict(&mut self) -> usize {
        if self.posts.len() < self.capacity + self.column_count {
            return 0;
        }

        let surplus = self.posts.len() - self.capacity;
        let count = (surplus / self.column_count) * self.column_count;
        for _ in 0..count {
            if let Some(oldest) = self.posts.pop_back() {
                self.ids.remove(&oldest.id);
            }
        }
        debug!("Store evicted {} oldest posts", count);
        count
    }

    pub fn set_filter(&mut self, filter: FilterConfig) {
        self.filter = filter;
        self.notify();
    }

    pub fn set_search_text(&mut self, search_text: impl Into<String>) {
        let filter = FilterConfig {
            search_text: search_text.into(),
            ..self.filter.clone()
        };
        self.set_filter(filter);
    }

    pub fn set_nsfw_mode(&mut self, nsfw_mode: NsfwMode) {
        let filter = FilterConfig {
            nsfw_mode,
            ..self.filter.clone()
        };
        self.set_filter(filter);
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
        self.notify();
    }

    pub fn set_layout(&mut self, layout: LayoutMode) {
        self.layout = layout;
        self.notify();
    }

    pub fn toggle_layout(&mut self) {
        self.set_layout(self.layout.toggled());
    }

    /// Record a connector transition and fan it out like any other mutation.
    pub fn set_connection(&mut self, status: ConnectionStatus, connection: ConnectionState) {
        self.status = status;
        self.connection = connection;
        self.notify();
    }

    /// Posts passing the active filter, newest first. Recomputed on every call.
    pub fn filtered_view(&self) -> Vec<Arc<Post>> {
        self.posts
            .iter()
            .filter(|post| passes_with_policy(post, &self.filter, self.sensitivity))
            .cloned()
            .collect()
    }

    /// All stored posts, newest first.
    pub fn posts(&self) -> impl Iterator<Item = &Arc<Post>> {
        self.posts.iter()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn filter(&self) -> &FilterConfig {
        &self.filter
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            posts: self.filtered_view(),
            status: self.status,
            connection: self.connection,
            paused: self.paused,
            layout: self.layout,
            filter: self.filter.clone(),
            total: self.posts.len(),
        }
    }

    /// Register an observer. It runs synchronously, with the store locked,
    /// after every mutation; it must not call back into the store.
    pub fn subscribe<F>(&mut self, observer: F) -> SubscriptionId
    where
        F: FnMut(&StoreSnapshot) + Send + 'static,
    {
        self.subscribers.add(Box::new(observer))
    }

    /// Remove one observer. Safe to call more than once.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn notify(&mut self) {
        if self.subscribers.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        self.subscribers.notify(&snapshot);
    }
}
