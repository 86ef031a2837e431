use std::collections::HashMap;

use ratatui::{
    layout::{Constraint, Layout, Rect},
    style::{Color, Style},
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::models::{Classification, PendingClassification};
use crate::review::keys::Key;
use crate::tui::{money_span, FOOTER_STYLE, HEADER_STYLE, SELECTED_STYLE};

/// Pending items that share a merchant name.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGroup {
    pub key: String,
    pub transactions: Vec<PendingClassification>,
    /// The first member's suggestion.
    pub suggested_category: String,
    /// Mean of member confidences.
    pub confidence: f64,
}

/// Partition by exact merchant name, in order of first appearance.
pub fn group_by_merchant(pending: &[PendingClassification]) -> Vec<BatchGroup> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut members: Vec<Vec<PendingClassification>> = Vec::new();
    for item in pending {
        let key = item.transaction.merchant.as_str();
        let slot = *index.entry(key).or_insert_with(|| {
            members.push(Vec::new());
            members.len() - 1
        });
        members[slot].push(item.clone());
    }
    members
        .into_iter()
        .map(|transactions| {
            let first = &transactions[0];
            let confidence =
                transactions.iter().map(|t| t.confidence).sum::<f64>() / transactions.len() as f64;
            BatchGroup {
                key: first.transaction.merchant.clone(),
                suggested_category: first.suggested_category.clone(),
                confidence,
                transactions,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    AcceptAll,
    SkipAll,
    ReviewEach,
    /// Listed in the menu but has no bulk behavior yet.
    ApplyCategory,
}

impl BatchAction {
    fn label(&self) -> &'static str {
        match self {
            BatchAction::AcceptAll => "accept every suggestion",
            BatchAction::SkipAll => "skip every item",
            BatchAction::ReviewEach => "review each item",
            BatchAction::ApplyCategory => "apply one category to all",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    Review,
    Apply(BatchAction),
    Confirm(BatchAction),
    ReviewEach { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchView {
    Groups,
    Items,
}

/// Bulk review of many pending items. Complete only once every item has a
/// result, so the requester always gets one result per item.
pub struct BatchFlow {
    pending: Vec<PendingClassification>,
    groups: Vec<BatchGroup>,
    results: Vec<Option<Classification>>,
    mode: BatchMode,
    view: BatchView,
    cursor: usize,
    notice: Option<String>,
}

impl BatchFlow {
    pub fn new(pending: Vec<PendingClassification>) -> Self {
        let groups = group_by_merchant(&pending);
        let results = vec![None; pending.len()];
        Self {
            pending,
            groups,
            results,
            mode: BatchMode::Review,
            view: BatchView::Groups,
            cursor: 0,
            notice: None,
        }
    }

    #[cfg(test)]
    pub fn groups(&self) -> &[BatchGroup] {
        &self.groups
    }

    #[cfg(test)]
    pub fn mode(&self) -> BatchMode {
        self.mode
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn resolved(&self) -> usize {
        self.results.iter().filter(|r| r.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.resolved() == self.pending.len()
    }

    /// All results, in submission order, once the batch is complete.
    pub fn results(&self) -> Option<Vec<Classification>> {
        if !self.is_complete() {
            return None;
        }
        self.results.iter().cloned().collect()
    }

    pub fn handle_key(&mut self, key: Key) {
        if self.is_complete() {
            return;
        }
        match self.mode {
            BatchMode::Review => self.handle_review_key(key),
            BatchMode::Confirm(action) => match key {
                Key::Char('y') | Key::Char('Y') | Key::Enter => self.apply(action),
                Key::Char('n') | Key::Char('N') | Key::Esc => self.mode = BatchMode::Review,
                _ => {}
            },
            BatchMode::ReviewEach { index } => self.handle_review_each_key(index, key),
            // Apply finishes synchronously; keys never arrive here.
            BatchMode::Apply(_) => {}
        }
    }

    fn handle_review_key(&mut self, key: Key) {
        self.notice = None;
        let rows = match self.view {
            BatchView::Groups => self.groups.len(),
            BatchView::Items => self.pending.len(),
        };
        match key {
            Key::Up | Key::Char('k') => self.cursor = self.cursor.saturating_sub(1),
            Key::Down | Key::Char('j') => {
                if rows > 0 {
                    self.cursor = (self.cursor + 1).min(rows - 1);
                }
            }
            Key::Tab | Key::Left | Key::Right => {
                self.view = match self.view {
                    BatchView::Groups => BatchView::Items,
                    BatchView::Items => BatchView::Groups,
                };
                self.cursor = 0;
            }
            Key::Char('a') => self.mode = BatchMode::Confirm(BatchAction::AcceptAll),
            Key::Char('s') => self.mode = BatchMode::Confirm(BatchAction::SkipAll),
            Key::Char('r') => self.apply(BatchAction::ReviewEach),
            Key::Char('c') => self.apply(BatchAction::ApplyCategory),
            Key::Esc => self.abandon(),
            _ => {}
        }
    }

    fn handle_review_each_key(&mut self, index: usize, key: Key) {
        let item = &self.pending[index];
        let resolved = match key {
            Key::Char('a') | Key::Enter => Classification::accepted(
                item.transaction.clone(),
                &item.suggested_category,
                item.confidence,
            ),
            Key::Char('s') => Classification::skipped(item.transaction.clone()),
            Key::Esc => {
                self.mode = BatchMode::Review;
                return;
            }
            _ => return,
        };
        self.results[index] = Some(resolved);
        self.mode = match self.next_open(index + 1) {
            Some(next) => BatchMode::ReviewEach { index: next },
            None => BatchMode::Review,
        };
    }

    /// First unresolved item at or after `from`.
    fn next_open(&self, from: usize) -> Option<usize> {
        (from..self.results.len()).find(|&i| self.results[i].is_none())
    }

    fn apply(&mut self, action: BatchAction) {
        self.mode = BatchMode::Apply(action);
        match action {
            BatchAction::AcceptAll => {
                // Each item keeps its own suggestion, never the group's.
                self.results = self
                    .pending
                    .iter()
                    .map(|p| {
                        Some(Classification::accepted(
                            p.transaction.clone(),
                            &p.suggested_category,
                            p.confidence,
                        ))
                    })
                    .collect();
                self.mode = BatchMode::Review;
            }
            BatchAction::SkipAll => {
                self.results = self
                    .pending
                    .iter()
                    .map(|p| Some(Classification::skipped(p.transaction.clone())))
                    .collect();
                self.mode = BatchMode::Review;
            }
            BatchAction::ReviewEach => {
                self.mode = match self.next_open(0) {
                    Some(index) => BatchMode::ReviewEach { index },
                    None => BatchMode::Review,
                };
            }
            BatchAction::ApplyCategory => {
                self.notice =
                    Some("Applying one category to the whole batch is not available yet".into());
                self.mode = BatchMode::Review;
            }
        }
        tracing::info!(
            action = action.label(),
            resolved = self.resolved(),
            total = self.pending.len(),
            "batch action applied"
        );
    }

    /// Leaving the batch resolves whatever is still open as unclassified.
    fn abandon(&mut self) {
        for (slot, p) in self.results.iter_mut().zip(&self.pending) {
            if slot.is_none() {
                *slot = Some(Classification::skipped(p.transaction.clone()));
            }
        }
        tracing::info!(total = self.pending.len(), "batch abandoned, open items skipped");
    }

    pub fn draw(&self, frame: &mut Frame, area: Rect) {
        let [title_area, list_area, action_area, hints_area] = Layout::vertical([
            Constraint::Length(2),
            Constraint::Fill(1),
            Constraint::Length(2),
            Constraint::Length(1),
        ])
        .areas(area);

        frame.render_widget(
            Paragraph::new(format!(
                "  Batch review: {} items in {} merchant groups ({} resolved)",
                self.pending.len(),
                self.groups.len(),
                self.resolved()
            ))
            .style(HEADER_STYLE),
            title_area,
        );

        let visible = list_area.height.max(1) as usize;
        let lines: Vec<Line> = match (self.mode, self.view) {
            (BatchMode::ReviewEach { index }, _) => {
                let item = &self.pending[index];
                vec![
                    Line::from(format!("  Item {} of {}", index + 1, self.pending.len())),
                    Line::from(format!(
                        "  {}  {}",
                        item.transaction.date, item.transaction.description
                    )),
                    Line::from(vec![Span::raw("  "), money_span(item.transaction.amount)]),
                    Line::from(format!(
                        "  Suggested: {} ({:.0}%)",
                        item.suggested_category,
                        item.confidence * 100.0
                    )),
                ]
            }
            (_, BatchView::Groups) => self
                .groups
                .iter()
                .enumerate()
                .skip(self.cursor.saturating_sub(visible.saturating_sub(1)))
                .take(visible)
                .map(|(i, g)| {
                    let text = format!(
                        "  {:<28} {:>3} items  {:<24} {:>4.0}%",
                        g.key,
                        g.transactions.len(),
                        g.suggested_category,
                        g.confidence * 100.0
                    );
                    if i == self.cursor {
                        Line::from(Span::styled(text, SELECTED_STYLE))
                    } else {
                        Line::from(text)
                    }
                })
                .collect(),
            (_, BatchView::Items) => self
                .pending
                .iter()
                .enumerate()
                .skip(self.cursor.saturating_sub(visible.saturating_sub(1)))
                .take(visible)
                .map(|(i, p)| {
                    let mark = if self.results[i].is_some() { "\u{2713}" } else { " " };
                    let text = format!(
                        "  {mark} {}  {:<36} {:<24} {:>4.0}%",
                        p.transaction.date,
                        p.transaction.description,
                        p.suggested_category,
                        p.confidence * 100.0
                    );
                    if i == self.cursor {
                        Line::from(Span::styled(text, SELECTED_STYLE))
                    } else {
                        Line::from(text)
                    }
                })
                .collect(),
        };
        frame.render_widget(Paragraph::new(lines), list_area);

        let action_line = match self.mode {
            BatchMode::Confirm(action) => Line::from(Span::styled(
                format!("  Really {}? (y/n)", action.label()),
                Style::default().fg(Color::Yellow),
            )),
            _ => match &self.notice {
                Some(n) => Line::from(Span::styled(
                    format!("  {n}"),
                    Style::default().fg(Color::Yellow),
                )),
                None => Line::from(""),
            },
        };
        frame.render_widget(Paragraph::new(action_line), action_area);

        let hints = match self.mode {
            BatchMode::ReviewEach { .. } => "a/Enter=accept  s=skip  Esc=back to batch",
            BatchMode::Confirm(_) => "y=confirm  n=cancel",
            _ => concat!(
                "a=accept all  s=skip all  r=review each  c=apply category  ",
                "Tab=groups/items  Esc=leave (skips open items)"
            ),
        };
        frame.render_widget(Paragraph::new(hints).style(FOOTER_STYLE), hints_area);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClassificationStatus;
    use crate::review::classifier::tests::pending;

    fn four() -> Vec<PendingClassification> {
        vec![
            pending(1, "Walmart", "Groceries", 0.92),
            pending(2, "Walmart", "Shopping", 0.88),
            pending(3, "Target", "Shopping", 0.85),
            pending(4, "Netflix", "Entertainment", 0.70),
        ]
    }

    #[test]
    fn test_grouping_by_merchant() {
        let items = vec![
            pending(1, "Walmart", "Groceries", 0.92),
            pending(2, "Walmart", "Shopping", 0.88),
            pending(3, "Target", "Shopping", 0.85),
        ];
        let groups = group_by_merchant(&items);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].key, "Walmart");
        assert!((groups[0].confidence - 0.90).abs() < 1e-9);
        assert_eq!(groups[0].suggested_category, "Groceries");
        assert_eq!(groups[1].key, "Target");
        assert!((groups[1].confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn test_grouping_is_case_sensitive() {
        let items = vec![
            pending(1, "Walmart", "Groceries", 0.9),
            pending(2, "WALMART", "Groceries", 0.9),
        ];
        assert_eq!(group_by_merchant(&items).len(), 2);
    }

    #[test]
    fn test_accept_all_uses_item_suggestions() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('a'));
        assert_eq!(flow.mode(), BatchMode::Confirm(BatchAction::AcceptAll));
        assert!(!flow.is_complete());
        flow.handle_key(Key::Char('y'));
        let results = flow.results().unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == ClassificationStatus::ClassifiedByAi));
        // Second Walmart item keeps its own suggestion, not the group's.
        assert_eq!(results[1].category, "Shopping");
        assert_eq!(results[1].confidence, 0.88);
    }

    #[test]
    fn test_confirm_can_be_declined() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Char('n'));
        assert_eq!(flow.mode(), BatchMode::Review);
        assert_eq!(flow.resolved(), 0);
    }

    #[test]
    fn test_skip_all() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Enter);
        let results = flow.results().unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == ClassificationStatus::Unclassified));
    }

    #[test]
    fn test_review_each_walks_all_items() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('r'));
        assert_eq!(flow.mode(), BatchMode::ReviewEach { index: 0 });
        flow.handle_key(Key::Char('a'));
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Enter);
        assert!(!flow.is_complete());
        flow.handle_key(Key::Char('s'));
        assert_eq!(flow.mode(), BatchMode::Review);
        let results = flow.results().unwrap();
        assert_eq!(results[0].status, ClassificationStatus::ClassifiedByAi);
        assert_eq!(results[1].status, ClassificationStatus::Unclassified);
        assert_eq!(results[2].category, "Shopping");
        assert_eq!(results[3].status, ClassificationStatus::Unclassified);
    }

    #[test]
    fn test_partial_review_then_abandon_keeps_parity() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('r'));
        flow.handle_key(Key::Char('a'));
        flow.handle_key(Key::Esc);
        assert_eq!(flow.mode(), BatchMode::Review);
        assert_eq!(flow.resolved(), 1);
        flow.handle_key(Key::Esc);
        let results = flow.results().unwrap();
        assert_eq!(results.len(), 4);
        assert_eq!(results[0].status, ClassificationStatus::ClassifiedByAi);
        assert!(results[1..].iter().all(|r| r.status == ClassificationStatus::Unclassified));
    }

    #[test]
    fn test_review_each_resumes_at_first_open_item() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('r'));
        flow.handle_key(Key::Char('a'));
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Esc);

        flow.handle_key(Key::Char('r'));
        assert_eq!(flow.mode(), BatchMode::ReviewEach { index: 2 });
        flow.handle_key(Key::Enter);
        flow.handle_key(Key::Enter);
        let results = flow.results().unwrap();
        assert_eq!(results[0].status, ClassificationStatus::ClassifiedByAi);
        assert_eq!(results[1].status, ClassificationStatus::Unclassified);
        assert_eq!(results[3].category, "Entertainment");
    }

    #[test]
    fn test_accept_all_after_partial_review_covers_everything() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('r'));
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Esc);
        flow.handle_key(Key::Char('a'));
        flow.handle_key(Key::Char('y'));
        let results = flow.results().unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.status == ClassificationStatus::ClassifiedByAi));
    }

    #[test]
    fn test_apply_category_is_a_no_op() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('c'));
        assert_eq!(flow.mode(), BatchMode::Review);
        assert_eq!(flow.resolved(), 0);
        assert!(flow.results().is_none());
    }

    #[test]
    fn test_results_frozen_once_complete() {
        let mut flow = BatchFlow::new(four());
        flow.handle_key(Key::Char('a'));
        flow.handle_key(Key::Char('y'));
        let before = flow.results();
        flow.handle_key(Key::Char('s'));
        flow.handle_key(Key::Char('y'));
        flow.handle_key(Key::Esc);
        assert_eq!(flow.results(), before);
    }

    #[test]
    fn test_empty_batch_is_complete() {
        let flow = BatchFlow::new(vec![]);
        assert!(flow.is_complete());
        assert_eq!(flow.results(), Some(vec![]));
    }
}
