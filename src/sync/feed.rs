use crate::store::{ChangeKind, ChangeNotice};
use regex::Regex;
use std::sync::LazyLock;

static EVENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^databases\.([^.]+)\.collections\.([^.]+)\.documents\.([^.]+)\.(create|update|delete)$",
    )
    .expect("valid change event pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEvent {
    pub database_id: String,
    pub collection: String,
    pub document_id: String,
    pub kind: ChangeKind,
}

pub fn parse_event(name: &str) -> Option<FeedEvent> {
    let captures = EVENT_PATTERN.captures(name)?;
    let kind = match &captures[4] {
        "create" => ChangeKind::Create,
        "update" => ChangeKind::Update,
        "delete" => ChangeKind::Delete,
        _ => return None,
    };

    Some(FeedEvent {
        database_id: captures[1].to_string(),
        collection: captures[2].to_string(),
        document_id: captures[3].to_string(),
        kind,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Habits,
    Completions,
}

impl Feed {
    pub fn name(self) -> &'static str {
        match self {
            Self::Habits => "habits",
            Self::Completions => "completions",
        }
    }

    pub fn watches(self, kind: ChangeKind) -> bool {
        match self {
            Self::Habits => true,
            Self::Completions => kind == ChangeKind::Create,
        }
    }

    pub fn trigger(self, notice: &ChangeNotice) -> Option<FeedEvent> {
        notice
            .events
            .iter()
            .filter_map(|name| parse_event(name))
            .find(|event| self.watches(event.kind))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Changed {
        feed: Feed,
        kind: ChangeKind,
        document_id: String,
    },
    Lagged { feed: Feed, skipped: u64 },
}

impl SyncEvent {
    pub fn feed(&self) -> Feed {
        match self {
            Self::Changed { feed, .. } | Self::Lagged { feed, .. } => *feed,
        }
    }
}
