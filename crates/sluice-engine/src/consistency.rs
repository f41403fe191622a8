//! Per-property consistency policy over a set of transfer sources.
//!
//! A [`ConsistencyGroup`] decides, given one newly-delivered update,
//! whether the whole member set is mutually consistent enough for the
//! owning property to refresh its buffer.

use std::sync::Arc;

use indexmap::IndexMap;

use sluice_core::{SourceId, TransferVariable, VersionNumber};

/// The matching policy of a consistency group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MatchingMode {
    /// No consistency check: any update fires the property immediately,
    /// membership is irrelevant.
    None,
    /// Every member update is accepted as it arrives, without
    /// cross-member version comparison.
    #[default]
    NewestWins,
    /// The group is matched only when every member's current version
    /// number is identical; members never observed keep the group
    /// unmatched.
    ExactVersion,
}

impl std::fmt::Display for MatchingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::NewestWins => write!(f, "newest-wins"),
            Self::ExactVersion => write!(f, "exact-version"),
        }
    }
}

struct Member {
    variable: Arc<TransferVariable>,
    last_seen: VersionNumber,
}

/// Tracks a set of member sources and a matching policy.
///
/// Membership is registered single-threaded at startup (plus the one
/// permitted late addition of a correlating field, still before the
/// dispatcher starts); `update` runs exclusively on the dispatch thread.
pub struct ConsistencyGroup {
    mode: MatchingMode,
    members: IndexMap<SourceId, Member>,
}

impl ConsistencyGroup {
    /// Create an empty group with the given policy.
    pub fn new(mode: MatchingMode) -> Self {
        Self {
            mode,
            members: IndexMap::new(),
        }
    }

    /// The configured matching policy.
    pub fn mode(&self) -> MatchingMode {
        self.mode
    }

    /// Register a member source. Re-adding an id is a no-op.
    pub fn add(&mut self, variable: Arc<TransferVariable>) {
        self.members.entry(variable.id()).or_insert(Member {
            variable,
            last_seen: VersionNumber::UNSET,
        });
    }

    /// Whether the id belongs to this group.
    pub fn is_member(&self, id: SourceId) -> bool {
        self.members.contains_key(&id)
    }

    /// Number of registered members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Record one delivered update and decide whether the group matched.
    ///
    /// Updates whose source is not a member skip the check entirely and
    /// fire unconditionally; this is how sibling propagation stays
    /// consistent without re-deriving consistency from scratch.
    pub fn update(&mut self, updated: SourceId) -> bool {
        match self.mode {
            MatchingMode::None => true,
            MatchingMode::NewestWins => {
                self.record(updated);
                true
            }
            MatchingMode::ExactVersion => {
                let Some(version) = self.record(updated) else {
                    // Not a member: skip the check (sibling rule).
                    return true;
                };
                version.is_set()
                    && self
                        .members
                        .values()
                        .all(|member| member.last_seen == version)
            }
        }
    }

    /// The version every member agrees on, if the group is matched.
    pub fn matched_version(&self) -> Option<VersionNumber> {
        let mut versions = self.members.values().map(|m| m.last_seen);
        let first = versions.next()?;
        if first.is_set() && versions.all(|v| v == first) {
            Some(first)
        } else {
            None
        }
    }

    /// Record the member's current version; `None` for non-members.
    fn record(&mut self, updated: SourceId) -> Option<VersionNumber> {
        let member = self.members.get_mut(&updated)?;
        member.last_seen = member.variable.version();
        Some(member.last_seen)
    }
}
