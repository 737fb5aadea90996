use crate::event::RuleName;

/// Default character budget of the active rules label
pub const DEFAULT_LABEL_BUDGET: usize = 10;

const ELLIPSIS: &str = "...";

/// Progress of the rules currently in flight.
///
/// `max` and `value` drive the progress bar and fall back to zero whenever
/// no rule is active. `completed` keeps counting across idle periods until
/// the next [`ProgressModel::clear_completed`].
#[derive(Clone, Debug)]
pub struct ProgressModel {
    pub max: usize,
    pub value: usize,
    pub completed: usize,
    active: Vec<RuleName>,
    label: String,
    label_budget: usize,
}

impl Default for ProgressModel {
    fn default() -> Self {
        Self::new(DEFAULT_LABEL_BUDGET)
    }
}

impl ProgressModel {
    pub fn new(label_budget: usize) -> Self {
        Self {
            max: 0,
            value: 0,
            completed: 0,
            active: Vec::new(),
            label: String::new(),
            label_budget,
        }
    }

    pub fn start_rule(&mut self, rule: &str, out_of: usize) {
        self.max = out_of;
        if self.value > self.max {
            self.max = self.value;
        }
        self.active.push(rule.to_string());
        self.update_label();
    }

    /// Returns `false` when the rule was not in flight; progress is then untouched.
    pub fn stop_rule(&mut self, rule: &str) -> bool {
        let Some(pos) = self.active.iter().position(|r| r == rule) else {
            return false;
        };
        self.active.remove(pos);
        self.value += 1;
        self.completed += 1;
        if self.value > self.max {
            tracing::debug!(value = self.value, max = self.max, "raising progress bound");
            self.max = self.value;
        }

        self.update_label();
        if self.active.is_empty() {
            self.max = 0;
            self.value = 0;
        }
        true
    }

    /// Restart the `completed` count; rules in flight are kept.
    pub fn clear_completed(&mut self) {
        self.completed = 0;
    }

    pub fn active(&self) -> &[RuleName] {
        &self.active
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_empty()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Ratio for gauge widgets, 0.0 when idle
    pub fn ratio(&self) -> f64 {
        if self.max == 0 {
            0.0
        } else {
            (self.value as f64 / self.max as f64).min(1.0)
        }
    }

    fn update_label(&mut self) {
        self.label = truncate_label(&self.active.join(", "), self.label_budget);
    }
}

/// Keep the trailing part of `content` so the result fits in `budget`
/// characters, prefixed by an ellipsis when something was cut.
pub fn truncate_label(content: &str, budget: usize) -> String {
    let len = content.chars().count();
    if len <= budget {
        return content.to_string();
    }
    let keep = budget.saturating_sub(ELLIPSIS.len());
    let tail: String = content.chars().skip(len - keep).collect();
    format!("{ELLIPSIS}{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_tracks_stops_and_resets_when_idle() {
        let mut p = ProgressModel::default();
        p.start_rule("a", 3);
        p.start_rule("b", 3);
        assert_eq!((p.max, p.value), (3, 0));

        assert!(p.stop_rule("a"));
        assert_eq!((p.max, p.value, p.completed), (3, 1, 1));

        assert!(p.stop_rule("b"));
        assert_eq!((p.max, p.value, p.completed), (0, 0, 2));
        assert!(p.is_idle());
        assert_eq!(p.label(), "");
    }

    #[test]
    fn test_clear_completed_keeps_rules_in_flight() {
        let mut p = ProgressModel::default();
        p.start_rule("a", 2);
        p.start_rule("b", 2);
        assert!(p.stop_rule("a"));

        p.clear_completed();
        assert_eq!((p.max, p.value, p.completed), (2, 1, 0));
        assert_eq!(p.active(), ["b".to_string()]);

        assert!(p.stop_rule("b"));
        assert_eq!(p.completed, 1);
    }

    #[test]
    fn test_unknown_stop_is_ignored() {
        let mut p = ProgressModel::default();
        p.start_rule("a", 2);
        assert!(!p.stop_rule("zzz"));
        assert_eq!(p.active(), ["a".to_string()]);
        assert_eq!(p.value, 0);
    }

    #[test]
    fn test_value_never_exceeds_max() {
        let mut p = ProgressModel::default();
        p.start_rule("a", 1);
        p.start_rule("b", 1);
        p.stop_rule("a");
        assert!(p.value <= p.max);
        p.start_rule("c", 1);
        assert!(p.value <= p.max);
    }

    #[test]
    fn test_label_truncation() {
        assert_eq!(truncate_label("abc", 10), "abc");
        assert_eq!(truncate_label("alpha, beta", 10), "...a, beta");
        assert_eq!(truncate_label("alpha, beta", 10).chars().count(), 10);

        let mut p = ProgressModel::new(10);
        p.start_rule("alpha", 2);
        p.start_rule("beta", 2);
        assert_eq!(p.label(), "...a, beta");
    }
}
