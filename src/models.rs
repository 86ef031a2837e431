use std::fmt;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub category_type: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub date: String,
    pub description: String,
    /// Grouping key for batch review. Matched exactly, case-sensitive.
    pub merchant: String,
    pub amount: f64,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: Option<i64>,
    pub pattern: String,
    pub category: String,
    pub match_type: String,
    pub priority: i64,
    pub hit_count: i64,
    pub is_active: bool,
}

/// A (category, score) pair suggested by a classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub category: String,
    pub score: f64,
    /// The rule behind the score, when a rule produced it.
    #[serde(default)]
    pub rule_id: Option<i64>,
}

impl Ranking {
    pub fn new(category: impl Into<String>, score: f64) -> Self {
        Self {
            category: category.into(),
            score,
            rule_id: None,
        }
    }

    pub fn from_rule(category: impl Into<String>, score: f64, rule_id: Option<i64>) -> Self {
        Self {
            rule_id,
            ..Self::new(category, score)
        }
    }
}

/// A transaction awaiting a category decision. Immutable once submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingClassification {
    pub transaction: Transaction,
    pub suggested_category: String,
    pub category_rankings: Vec<Ranking>,
    pub confidence: f64,
    pub check_patterns: Vec<String>,
    pub category_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationStatus {
    Unclassified,
    ClassifiedByAi,
    UserModified,
}

impl ClassificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationStatus::Unclassified => "unclassified",
            ClassificationStatus::ClassifiedByAi => "classified_by_ai",
            ClassificationStatus::UserModified => "user_modified",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "unclassified" => Some(ClassificationStatus::Unclassified),
            "classified_by_ai" => Some(ClassificationStatus::ClassifiedByAi),
            "user_modified" => Some(ClassificationStatus::UserModified),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub transaction: Transaction,
    pub category: String,
    pub status: ClassificationStatus,
    pub confidence: f64,
    pub classified_at: DateTime<Local>,
    pub notes: String,
}

impl Classification {
    pub fn accepted(transaction: Transaction, category: &str, confidence: f64) -> Self {
        Self {
            transaction,
            category: category.to_string(),
            status: ClassificationStatus::ClassifiedByAi,
            confidence,
            classified_at: Local::now(),
            notes: String::new(),
        }
    }

    pub fn custom(transaction: Transaction, category: &str, notes: &str) -> Self {
        Self {
            transaction,
            category: category.to_string(),
            status: ClassificationStatus::UserModified,
            confidence: 1.0,
            classified_at: Local::now(),
            notes: notes.to_string(),
        }
    }

    pub fn skipped(transaction: Transaction) -> Self {
        Self {
            transaction,
            category: String::new(),
            status: ClassificationStatus::Unclassified,
            confidence: 0.0,
            classified_at: Local::now(),
            notes: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Expense,
    Income,
    Transfer,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Expense, Direction::Income, Direction::Transfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Expense => "expense",
            Direction::Income => "income",
            Direction::Transfer => "transfer",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Direction::Expense => 0,
            Direction::Income => 1,
            Direction::Transfer => 2,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Direction::Expense => "Expense",
            Direction::Income => "Income",
            Direction::Transfer => "Transfer",
        };
        f.write_str(label)
    }
}

/// A merchant whose money-flow direction needs a human decision.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDirection {
    pub merchant: String,
    pub suggested: Direction,
    pub confidence: f64,
    pub reasoning: String,
    pub sample_transactions: Vec<Transaction>,
}

/// Running totals kept by the bridge for the engine side.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionStats {
    pub total: usize,
    pub classified_by_ai: usize,
    pub user_modified: usize,
    pub skipped: usize,
    pub directions_confirmed: usize,
}

impl CompletionStats {
    pub fn record(&mut self, classification: &Classification) {
        self.total += 1;
        match classification.status {
            ClassificationStatus::ClassifiedByAi => self.classified_by_ai += 1,
            ClassificationStatus::UserModified => self.user_modified += 1,
            ClassificationStatus::Unclassified => self.skipped += 1,
        }
    }

    pub fn completion_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.classified_by_ai + self.user_modified) as f64 / self.total as f64
    }
}

/// Intermediate representation from the CSV parser before DB insert.
#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub date: String,
    pub description: String,
    pub merchant: Option<String>,
    pub amount: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn() -> Transaction {
        Transaction {
            id: 1,
            date: "2025-01-15".into(),
            description: "WALMART #123".into(),
            merchant: "Walmart".into(),
            amount: -42.0,
        }
    }

    #[test]
    fn test_status_roundtrips_through_str() {
        for status in [
            ClassificationStatus::Unclassified,
            ClassificationStatus::ClassifiedByAi,
            ClassificationStatus::UserModified,
        ] {
            assert_eq!(ClassificationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ClassificationStatus::parse("bogus"), None);
    }

    #[test]
    fn test_custom_classification_is_full_confidence() {
        let c = Classification::custom(txn(), "Pets", "Custom category");
        assert_eq!(c.status, ClassificationStatus::UserModified);
        assert_eq!(c.confidence, 1.0);
        assert_eq!(c.notes, "Custom category");
    }

    #[test]
    fn test_stats_completion_rate() {
        let mut stats = CompletionStats::default();
        assert_eq!(stats.completion_rate(), 0.0);
        stats.record(&Classification::accepted(txn(), "Groceries", 0.9));
        stats.record(&Classification::skipped(txn()));
        assert_eq!(stats.total, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.completion_rate(), 0.5);
    }
}
