//! Collection payload — a card that describes a multi-character package
//! (typically a multi-character Voxta import) rather than a single character.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CollectionData {
    pub name: String,
    pub description: String,
    pub creator: String,
    /// Summary count; must equal `members.len()` (checked at construction).
    pub member_count: usize,
    pub members: Vec<CollectionMember>,
    pub scenarios: Vec<CollectionScenario>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CollectionMember {
    /// Id of the member's own card in the store.
    pub card_id: String,
    /// External character id from the source package.
    pub external_id: String,
    pub display_name: String,
    /// Stable presentation order within the collection.
    pub order: u32,
    /// External scenario ids this member participates in.
    pub scenario_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CollectionScenario {
    pub external_id: String,
    pub name: String,
    pub description: String,
    /// External character ids bound to scenario roles, in role order.
    pub character_ids: Vec<String>,
    pub order: u32,
}

impl CollectionData {
    /// Builds a collection, fixing `member_count` to the actual member list.
    pub fn new(
        name: String,
        description: String,
        creator: String,
        members: Vec<CollectionMember>,
        scenarios: Vec<CollectionScenario>,
    ) -> Self {
        let member_count = members.len();
        Self { name, description, creator, member_count, members, scenarios }
    }

    /// Checks the member-count invariant on data that came from the wire.
    pub fn check(&self) -> Result<()> {
        if self.member_count != self.members.len() {
            return Err(EngineError::InvariantViolation(format!(
                "collection member_count {} != members.len() {}",
                self.member_count,
                self.members.len()
            )));
        }
        Ok(())
    }

    pub fn member_by_external_id(&self, external_id: &str) -> Option<&CollectionMember> {
        self.members.iter().find(|m| m.external_id == external_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_count_invariant() {
        let c = CollectionData::new(
            "Pack".into(),
            String::new(),
            String::new(),
            vec![CollectionMember { card_id: "c1".into(), ..Default::default() }],
            vec![],
        );
        assert_eq!(c.member_count, 1);
        assert!(c.check().is_ok());

        let mut broken = c.clone();
        broken.member_count = 3;
        assert!(matches!(broken.check(), Err(EngineError::InvariantViolation(_))));
    }
}
