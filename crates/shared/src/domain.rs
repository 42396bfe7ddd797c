use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(ListId);
id_newtype!(UserId);
id_newtype!(ItemId);
id_newtype!(SessionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    Movie,
    Tv,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Tv => "tv",
        }
    }

    /// `None` for anything but the two stored spellings.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "movie" => Some(ItemKind::Movie),
            "tv" => Some(ItemKind::Tv),
            _ => None,
        }
    }
}

/// Coarse bucket of an item's numeric priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLabel {
    High,
    Normal,
    Low,
}

impl PriorityLabel {
    pub fn from_priority(priority: i64) -> Self {
        match priority {
            p if p > 0 => PriorityLabel::High,
            0 => PriorityLabel::Normal,
            _ => PriorityLabel::Low,
        }
    }
}
