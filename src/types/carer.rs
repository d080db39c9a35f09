//! Care workers and their capabilities.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a carer moves between visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Foot,
    Vehicle,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foot => "foot",
            Self::Vehicle => "vehicle",
        }
    }
}

/// A care worker identified by a payroll (SAP) number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Carer {
    sap_number: String,
    transport: Transport,
    skills: Vec<i64>,
}

impl Carer {
    /// Create a carer. Skills are kept sorted so that subset and
    /// intersection checks can rely on the ordering.
    pub fn new(sap_number: impl Into<String>, transport: Transport, mut skills: Vec<i64>) -> Self {
        skills.sort_unstable();
        skills.dedup();
        Self {
            sap_number: sap_number.into(),
            transport,
            skills,
        }
    }

    pub fn sap_number(&self) -> &str {
        &self.sap_number
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn skills(&self) -> &[i64] {
        &self.skills
    }

    /// True when every requested skill is held by this carer.
    pub fn has_skills(&self, required: &[i64]) -> bool {
        required
            .iter()
            .all(|skill| self.skills.binary_search(skill).is_ok())
    }

    /// Skills held both by this carer and listed in `other`.
    pub fn shared_skills(&self, other: &[i64]) -> Vec<i64> {
        self.skills
            .iter()
            .copied()
            .filter(|skill| other.contains(skill))
            .collect()
    }
}

impl fmt::Display for Carer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "carer {}", self.sap_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn carer(skills: Vec<i64>) -> Carer {
        Carer::new("100001", Transport::Foot, skills)
    }

    #[test]
    fn test_has_skills_subset() {
        let c = carer(vec![3, 1, 2]);
        assert!(c.has_skills(&[]));
        assert!(c.has_skills(&[1]));
        assert!(c.has_skills(&[1, 3]));
        assert!(!c.has_skills(&[4]));
        assert!(!c.has_skills(&[1, 4]));
    }

    #[test]
    fn test_skills_sorted_and_deduplicated() {
        let c = carer(vec![5, 2, 5, 1]);
        assert_eq!(c.skills(), &[1, 2, 5]);
    }

    #[test]
    fn test_shared_skills() {
        let c = carer(vec![1, 2, 3]);
        assert_eq!(c.shared_skills(&[2, 3, 4]), vec![2, 3]);
        assert!(c.shared_skills(&[7]).is_empty());
    }

    #[test]
    fn test_transport_as_str() {
        assert_eq!(Transport::Foot.as_str(), "foot");
        assert_eq!(Transport::Vehicle.as_str(), "vehicle");
        assert_eq!(carer(vec![]).transport(), Transport::Foot);
    }
}
