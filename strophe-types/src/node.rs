use serde::{Deserialize, Serialize};

/// Where a new node is placed relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddAction {
    #[default]
    AddToHead,
    AddToTail,
    AddBefore,
    AddAfter,
    Replace,
}

impl AddAction {
    pub fn as_i32(self) -> i32 {
        match self {
            AddAction::AddToHead => 0,
            AddAction::AddToTail => 1,
            AddAction::AddBefore => 2,
            AddAction::AddAfter => 3,
            AddAction::Replace => 4,
        }
    }

    /// Head/tail actions place the node inside the target, so the target must be a group.
    pub fn targets_group(self) -> bool {
        matches!(self, AddAction::AddToHead | AddAction::AddToTail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_action_codes() {
        assert_eq!(AddAction::default().as_i32(), 0);
        assert_eq!(AddAction::AddToTail.as_i32(), 1);
        assert_eq!(AddAction::Replace.as_i32(), 4);
        assert!(AddAction::AddToTail.targets_group());
        assert!(!AddAction::AddAfter.targets_group());
    }
}
