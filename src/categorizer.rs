use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

use crate::error::Result;
use crate::models::{Category, Direction, Ranking, Rule, Transaction};

/// Upstream source of category and direction suggestions.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn suggest_categories(
        &self,
        transaction: &Transaction,
        categories: &[Category],
    ) -> Result<Vec<Ranking>>;

    async fn suggest_direction(&self, transaction: &Transaction) -> Result<(Direction, f64)>;
}

const TRANSFER_KEYWORDS: &[&str] = &["TRANSFER", "XFER", "ZELLE", "VENMO", "PAYMENT THANK YOU"];

fn matches(description: &str, pattern: &str, match_type: &str) -> bool {
    let desc_upper = description.to_uppercase();
    let pat_upper = pattern.to_uppercase();
    match match_type {
        "contains" => desc_upper.contains(&pat_upper),
        "starts_with" => desc_upper.starts_with(&pat_upper),
        "regex" => Regex::new(pattern)
            .map(|re| re.is_match(description))
            .unwrap_or(false),
        _ => false,
    }
}

fn base_score(match_type: &str) -> f64 {
    match match_type {
        "regex" => 0.90,
        "starts_with" => 0.85,
        _ => 0.80,
    }
}

/// Scores transactions against the user's categorization rules. Rules that
/// have matched often score a little higher.
pub struct RuleClassifier {
    rules: Vec<Rule>,
}

impl RuleClassifier {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn rank(&self, transaction: &Transaction, categories: &[Category]) -> Vec<Ranking> {
        let mut best: HashMap<&str, (f64, Option<i64>)> = HashMap::new();
        for rule in self.rules.iter().filter(|r| r.is_active) {
            if !categories.is_empty() && !categories.iter().any(|c| c.name == rule.category) {
                continue;
            }
            if !matches(&transaction.description, &rule.pattern, &rule.match_type)
                && !matches(&transaction.merchant, &rule.pattern, &rule.match_type)
            {
                continue;
            }
            let bonus = (rule.hit_count.min(10) as f64) * 0.005
                + (rule.priority.clamp(0, 10) as f64) * 0.004;
            let score = (base_score(&rule.match_type) + bonus).min(0.99);
            let entry = best.entry(rule.category.as_str()).or_insert((0.0, None));
            if score > entry.0 {
                *entry = (score, rule.id);
            }
        }
        let mut rankings: Vec<Ranking> = best
            .into_iter()
            .map(|(category, (score, rule_id))| Ranking::from_rule(category, score, rule_id))
            .collect();
        rankings.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });
        rankings
    }

    pub fn direction(&self, transaction: &Transaction) -> (Direction, f64) {
        let desc_upper = transaction.description.to_uppercase();
        if TRANSFER_KEYWORDS.iter().any(|k| desc_upper.contains(k)) {
            return (Direction::Transfer, 0.6);
        }
        if transaction.amount > 0.0 {
            (Direction::Income, 0.8)
        } else {
            (Direction::Expense, 0.9)
        }
    }
}

#[async_trait]
impl Classifier for RuleClassifier {
    async fn suggest_categories(
        &self,
        transaction: &Transaction,
        categories: &[Category],
    ) -> Result<Vec<Ranking>> {
        Ok(self.rank(transaction, categories))
    }

    async fn suggest_direction(&self, transaction: &Transaction) -> Result<(Direction, f64)> {
        Ok(self.direction(transaction))
    }
}
