use serde::{Deserialize, Serialize};

/// How enforcement treats a grant that carries a condition.
///
/// Conditions are stored with their grant but no expression language is evaluated,
/// so a conditional grant is either refused outright or treated as unconditional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionPolicy {
    #[default]
    Deny,
    Ignore,
}

impl ConditionPolicy {
    pub fn honors(&self, condition: Option<&str>) -> bool {
        match (self, condition) {
            (_, None) => true,
            (ConditionPolicy::Ignore, Some(_)) => true,
            (ConditionPolicy::Deny, Some(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconditional_grants_are_always_honored() {
        assert!(ConditionPolicy::Deny.honors(None));
        assert!(ConditionPolicy::Ignore.honors(None));
    }

    #[test]
    fn test_conditional_grants_follow_policy() {
        assert!(!ConditionPolicy::default().honors(Some("weekday")));
        assert!(ConditionPolicy::Ignore.honors(Some("weekday")));
    }
}
