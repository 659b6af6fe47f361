//! Speaker role tagging.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Closed set of speaker labels for a two-party call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Operator,
    Customer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Operator => "operator",
            Role::Customer => "customer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps the text of one utterance to a [`Role`].
///
/// Implementations must be pure: the same text always yields the same role.
pub trait RoleClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Role;
}

static OPERATOR_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(how (can|may) i (help|assist)|thank you for (calling|contacting|waiting)|my name is|speaking|let me check|one moment|is there anything else|have a (nice|good) day|support|department)\b|чем (могу|можем) помочь|оператор|меня зовут|спасибо за обращение|ожидайте|одну минуту|уточн[юи]|компани[яи]",
    )
    .expect("operator cue pattern is valid")
});

static CUSTOMER_CUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(i (want|need|would like)|my (order|account|card|bill|phone)|i have a (problem|question)|doesn't work|does not work|can you|could you|why (is|was|did))\b|хочу|мне нужно|у меня|проблем[аы]|не работает|подскажите|можно ли|почему",
    )
    .expect("customer cue pattern is valid")
});

/// Scores operator cues against customer cues; ties go to `fallback`.
#[derive(Debug, Clone)]
pub struct KeywordRoleClassifier {
    fallback: Role,
}

impl KeywordRoleClassifier {
    pub fn new(fallback: Role) -> Self {
        Self { fallback }
    }
}

impl Default for KeywordRoleClassifier {
    fn default() -> Self {
        Self::new(Role::Customer)
    }
}

impl RoleClassifier for KeywordRoleClassifier {
    fn classify(&self, text: &str) -> Role {
        let operator = OPERATOR_CUES.find_iter(text).count();
        let customer = CUSTOMER_CUES.find_iter(text).count();

        match operator.cmp(&customer) {
            std::cmp::Ordering::Greater => Role::Operator,
            std::cmp::Ordering::Less => Role::Customer,
            std::cmp::Ordering::Equal => self.fallback,
        }
    }
}
