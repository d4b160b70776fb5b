use std::fmt;

/// Every replica publishes itself under this prefix followed by its id.
const REPLICA_NAME_PREFIX: &str = "replica";

/// Registry name of a replica, e.g. `replica3`.
///
/// The name is the replica's identity everywhere: discovery dedups candidates
/// by name, failover drops candidates by name, and two handles resolved from
/// the same name at different times count as the same replica.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ReplicaName(String);

impl ReplicaName {
    pub fn new(id: u64) -> Self {
        ReplicaName(format!("{}{}", REPLICA_NAME_PREFIX, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `name` follows the replica naming convention: the fixed
    /// prefix followed by a non-empty run of decimal digits, nothing else.
    /// Registry entries that fail this test are invisible to discovery.
    pub fn matches_convention(name: &str) -> bool {
        match name.strip_prefix(REPLICA_NAME_PREFIX) {
            Some(suffix) => !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()),
            None => false,
        }
    }
}

impl fmt::Display for ReplicaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_formats_prefix_and_id() {
        assert_eq!("replica1", ReplicaName::new(1).as_str());
        assert_eq!("replica42", ReplicaName::new(42).as_str());
    }

    #[test]
    fn convention_accepts_prefixed_decimal_ids() {
        assert!(ReplicaName::matches_convention("replica1"));
        assert!(ReplicaName::matches_convention("replica007"));
        assert!(ReplicaName::matches_convention("replica1234567890"));
    }

    #[test]
    fn convention_rejects_everything_else() {
        assert!(!ReplicaName::matches_convention(""));
        assert!(!ReplicaName::matches_convention("replica"));
        assert!(!ReplicaName::matches_convention("replicaX"));
        assert!(!ReplicaName::matches_convention("replica1x"));
        assert!(!ReplicaName::matches_convention("replica 1"));
        assert!(!ReplicaName::matches_convention("Replica1"));
        assert!(!ReplicaName::matches_convention("dispatcher"));
        assert!(!ReplicaName::matches_convention("primary1"));
    }

    #[test]
    fn display_matches_registry_form() {
        assert_eq!("replica9", format!("{}", ReplicaName::new(9)));
    }
}
