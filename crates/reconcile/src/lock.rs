use std::collections::HashMap;
use std::sync::Arc;

use kitty_core::MemberId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-member serialization point for invoice allocation and the reconciled
/// transaction set. `None` is the slot for credits with no known owner.
///
/// Always take member locks before opening a database transaction.
#[derive(Debug, Clone, Default)]
pub struct MemberLocks {
    slots: Arc<Mutex<HashMap<Option<MemberId>, Arc<Mutex<()>>>>>,
}

/// Guards held for the duration of one unit of work.
#[derive(Debug)]
pub struct MemberGuard {
    members: Vec<Option<MemberId>>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl MemberGuard {
    pub fn covers(&self, member: Option<MemberId>) -> bool {
        self.members.contains(&member)
    }
}

impl MemberLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, member: Option<MemberId>) -> MemberGuard {
        self.lock_all([member]).await
    }

    /// Locks several members in a fixed order so two callers can never
    /// wait on each other.
    pub async fn lock_all(&self, members: impl IntoIterator<Item = Option<MemberId>>) -> MemberGuard {
        let mut members: Vec<Option<MemberId>> = members.into_iter().collect();
        members.sort();
        members.dedup();

        let slots: Vec<Arc<Mutex<()>>> = {
            let mut map = self.slots.lock().await;
            members
                .iter()
                .map(|m| map.entry(*m).or_default().clone())
                .collect()
        };

        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(slot.lock_owned().await);
        }

        MemberGuard { members, _guards: guards }
    }
}
