use rtccore::types::UserId;
use serde::Serialize;
use std::collections::BTreeMap;

/// A remote member of a push-to-talk channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: UserId,
    pub is_talking: bool,
}

/// Remote members of the group channel. The local participant is never listed.
#[derive(Debug, Default)]
pub(crate) struct Roster {
    self_id: UserId,
    members: BTreeMap<UserId, bool>,
}

impl Roster {
    pub(crate) fn new(self_id: UserId) -> Self {
        Self {
            self_id,
            members: BTreeMap::new(),
        }
    }

    /// Replace the roster with the initial member list.
    pub(crate) fn seed(&mut self, members: impl IntoIterator<Item = UserId>) {
        self.members.clear();
        for member in members {
            self.add(member);
        }
    }

    /// Returns `true` if `member` was not already listed.
    pub(crate) fn add(&mut self, member: UserId) -> bool {
        if member == self.self_id || self.members.contains_key(&member) {
            return false;
        }
        self.members.insert(member, false);
        true
    }

    pub(crate) fn remove(&mut self, member: &UserId) -> bool {
        self.members.remove(member).is_some()
    }

    pub(crate) fn contains(&self, member: &UserId) -> bool {
        self.members.contains_key(member)
    }

    pub(crate) fn set_talking(&mut self, member: &UserId, talking: bool) {
        if let Some(flag) = self.members.get_mut(member) {
            *flag = talking;
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn ids(&self) -> Vec<UserId> {
        self.members.keys().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
    }

    pub(crate) fn participants(&self) -> Vec<Participant> {
        self.members
            .iter()
            .map(|(id, talking)| Participant {
                id: id.clone(),
                is_talking: *talking,
            })
            .collect()
    }
}
