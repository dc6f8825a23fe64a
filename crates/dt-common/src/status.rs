use serde::{Deserialize, Serialize};

/// The module status lattice (spec.md §3).
///
/// Ordering mirrors the original `IntEnum` values only in spirit -- callers
/// should match on variants, not rely on a numeric ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Unknown,
    Updated,
    Behind,
    Ahead,
    NotFound,
    Updating,
    Error,
}

impl Status {
    /// A classification backed by a successful remote probe.
    pub fn is_solid(self) -> bool {
        matches!(self, Status::Updated | Status::Behind | Status::Ahead)
    }

    /// Under exclusive custody of a module updater.
    pub fn is_frozen(self) -> bool {
        matches!(self, Status::Updating)
    }

    /// Solid or frozen: the checker must not clobber these on a transient failure.
    pub fn is_solid_or_frozen(self) -> bool {
        self.is_solid() || self.is_frozen()
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Unknown => "UNKNOWN",
            Status::Updated => "UPDATED",
            Status::Behind => "BEHIND",
            Status::Ahead => "AHEAD",
            Status::NotFound => "NOT_FOUND",
            Status::Updating => "UPDATING",
            Status::Error => "ERROR",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_and_frozen_are_disjoint() {
        for s in [
            Status::Unknown,
            Status::Updated,
            Status::Behind,
            Status::Ahead,
            Status::NotFound,
            Status::Updating,
            Status::Error,
        ] {
            assert!(!(s.is_solid() && s.is_frozen()));
        }
        assert!(Status::Updated.is_solid());
        assert!(Status::Behind.is_solid());
        assert!(Status::Ahead.is_solid());
        assert!(Status::Updating.is_frozen());
        assert!(!Status::Unknown.is_solid_or_frozen());
    }
}
