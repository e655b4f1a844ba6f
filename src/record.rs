use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vote::Transition;

static FUNNY_KEYWORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(funny|lol|lmao|(?:ha){2,}|hilarious|comedy|prank|meme|joke|fail|laugh)\b")
        .expect("keyword pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Funny,
    #[default]
    Regular,
}

impl Category {
    pub fn classify(title: &str, description: &str) -> Self {
        if FUNNY_KEYWORDS.is_match(title) || FUNNY_KEYWORDS.is_match(description) {
            Category::Funny
        } else {
            Category::Regular
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Funny => "funny",
            Category::Regular => "regular",
        }
    }
}

/// A shared video. Everything but the vote counters is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRecord {
    id: String,
    owner: String,
    title: String,
    media_url: String,
    description: String,
    is_private: bool,
    upvotes: u64,
    downvotes: u64,
    category: Category,
}

impl VideoRecord {
    pub fn new(
        id: impl Into<String>,
        owner: impl Into<String>,
        title: impl Into<String>,
        media_url: impl Into<String>,
        description: impl Into<String>,
        is_private: bool,
    ) -> Self {
        let title = title.into();
        let description = description.into();
        let category = Category::classify(&title, &description);
        Self {
            id: id.into(),
            owner: owner.into(),
            title,
            media_url: media_url.into(),
            description,
            is_private,
            upvotes: 0,
            downvotes: 0,
            category,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn media_url(&self) -> &str {
        &self.media_url
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn upvotes(&self) -> u64 {
        self.upvotes
    }

    pub fn downvotes(&self) -> u64 {
        self.downvotes
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "(untitled)"
        } else {
            self.title.trim()
        }
    }

    pub(crate) fn apply_vote(&mut self, transition: Transition) {
        self.upvotes = self.upvotes.saturating_add_signed(transition.up_delta);
        self.downvotes = self.downvotes.saturating_add_signed(transition.down_delta);
    }
}
