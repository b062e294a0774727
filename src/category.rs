use serde::{Deserialize, Serialize};

use crate::decimal::Money;

/// a named risk tier with an overdue-count range and issuance limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientCategory {
    pub code: String,
    pub name: String,
    pub min_overdue_count: u32,
    /// None means open-ended
    pub max_overdue_count: Option<u32>,
    pub max_credit_amount: Option<Money>,
    pub max_active_credits: Option<u32>,
    pub allows_new_credit: bool,
}

impl ClientCategory {
    /// whether this tier's range contains the overdue count
    pub fn matches(&self, overdue_count: u32) -> bool {
        overdue_count >= self.min_overdue_count
            && self.max_overdue_count.map_or(true, |max| overdue_count <= max)
    }

    pub fn can_create_new_credit(&self) -> bool {
        self.allows_new_credit
    }

    /// human-readable reason shown when the tier blocks issuance
    pub fn block_reason(&self) -> String {
        format!(
            "clients in category {} ({}) cannot take new credits",
            self.code, self.name
        )
    }
}

/// pick the tier whose range contains the overdue count; among matching
/// ranges the lowest minimum wins
pub fn select_category(categories: &[ClientCategory], overdue_count: u32) -> Option<&ClientCategory> {
    categories
        .iter()
        .filter(|c| c.matches(overdue_count))
        .min_by_key(|c| c.min_overdue_count)
}

/// the conventional three-tier setup
pub fn default_categories() -> Vec<ClientCategory> {
    vec![
        ClientCategory {
            code: "A".to_string(),
            name: "reliable".to_string(),
            min_overdue_count: 0,
            max_overdue_count: Some(0),
            max_credit_amount: None,
            max_active_credits: Some(3),
            allows_new_credit: true,
        },
        ClientCategory {
            code: "B".to_string(),
            name: "watch".to_string(),
            min_overdue_count: 1,
            max_overdue_count: Some(3),
            max_credit_amount: Some(Money::from_major(2_000)),
            max_active_credits: Some(1),
            allows_new_credit: true,
        },
        ClientCategory {
            code: "C".to_string(),
            name: "delinquent".to_string(),
            min_overdue_count: 4,
            max_overdue_count: None,
            max_credit_amount: Some(Money::ZERO),
            max_active_credits: Some(0),
            allows_new_credit: false,
        },
    ]
}
