use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a message owned by a [`MessageQueue`](crate::queue::MessageQueue).
    pub struct MessageId;

    /// Identifies a scheduled timer. Stale handles are harmless: the slot
    /// version changes when a timer is removed, so a cancelled or fired
    /// handle never aliases a newer timer.
    pub struct TimerHandle;
}

/// Identifies a consumer within a scenario. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConsumerId(pub u32);

impl ConsumerId {
    /// Display label used by the widgets: `A`, `B`, `C`, ... then `#26`, `#27`.
    pub fn label(self) -> String {
        match u8::try_from(self.0) {
            Ok(n) if n < 26 => char::from(b'A' + n).to_string(),
            _ => format!("#{}", self.0),
        }
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Consumer {}", self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumer_id_equality() {
        assert_eq!(ConsumerId(0), ConsumerId(0));
        assert_ne!(ConsumerId(0), ConsumerId(1));
    }

    #[test]
    fn consumer_labels() {
        assert_eq!(ConsumerId(0).label(), "A");
        assert_eq!(ConsumerId(2).label(), "C");
        assert_eq!(ConsumerId(25).label(), "Z");
        assert_eq!(ConsumerId(26).label(), "#26");
        assert_eq!(ConsumerId(1).to_string(), "Consumer B");
    }

    #[test]
    fn ids_are_hashable() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ConsumerId(0), "email");
        map.insert(ConsumerId(1), "analytics");
        assert_eq!(map[&ConsumerId(1)], "analytics");
    }

    #[test]
    fn message_ids_are_unique_after_removal() {
        use slotmap::SlotMap;
        let mut sm = SlotMap::<MessageId, ()>::with_key();
        let a = sm.insert(());
        sm.remove(a);
        let b = sm.insert(());
        assert_ne!(a, b);
    }
}
