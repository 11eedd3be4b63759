//! Filter pipeline: pure predicates over a post and the active filter config.

use serde::{Deserialize, Serialize};

use crate::post::Post;

/// How sensitive posts are treated.
///
/// Only `Hidden` removes posts at the store level; blurring and click-through
/// are presentation concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NsfwMode {
    Hidden,
    #[default]
    Blurred,
    Shown,
}

impl std::str::FromStr for NsfwMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hidden" | "hide" => Ok(Self::Hidden),
            "blurred" | "blur" => Ok(Self::Blurred),
            "shown" | "show" => Ok(Self::Shown),
            other => Err(format!(
                "unknown nsfw mode '{}', expected hidden, blurred or shown",
                other
            )),
        }
    }
}

/// Whether the store applies the sensitivity predicate at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensitivityPolicy {
    /// Sensitive posts are dropped from the view when the mode is `Hidden`
    #[default]
    Hide,
    /// The store never filters on sensitivity
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub search_text: String,
    pub nsfw_mode: NsfwMode,
}

impl FilterConfig {
    pub fn new(search_text: impl Into<String>, nsfw_mode: NsfwMode) -> Self {
        Self {
            search_text: search_text.into(),
            nsfw_mode,
        }
    }
}

/// Case-insensitive substring match against text, alt texts and author.
pub fn matches_text(post: &Post, search_text: &str) -> bool {
    if search_text.trim().is_empty() {
        return true;
    }

    let query = search_text.to_lowercase();
    let mut searchable = String::with_capacity(post.text.len() + 64);
    searchable.push_str(&post.text);
    for image in post.images() {
        searchable.push(' ');
        searchable.push_str(&image.alt_text);
    }
    searchable.push(' ');
    searchable.push_str(&post.author_display);

    searchable.to_lowercase().contains(&query)
}

pub fn passes_sensitivity(post: &Post, nsfw_mode: NsfwMode) -> bool {
    !(nsfw_mode == NsfwMode::Hidden && post.is_sensitive())
}

/// Both predicates, conjoined.
pub fn passes(post: &Post, config: &FilterConfig) -> bool {
    passes_with_policy(post, config, SensitivityPolicy::Hide)
}

pub fn passes_with_policy(post: &Post, config: &FilterConfig, policy: SensitivityPolicy) -> bool {
    let sensitive_ok = match policy {
        SensitivityPolicy::Hide => passes_sensitivity(post, config.nsfw_mode),
        SensitivityPolicy::Ignore => true,
    };
    sensitive_ok && matches_text(post, &config.search_text)
}
