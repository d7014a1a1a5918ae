//! Family directory and guardian authority

use async_trait::async_trait;
use hearth_config::{ChildPolicy, MemberRole, OversightConfig};
use hearth_util::{ChildId, FamilyId, Result, UserId};
use std::collections::HashMap;

/// What a guardian-authority check is asked about
#[derive(Debug, Clone, Copy)]
pub enum AuthorityScope<'a> {
    Child(&'a ChildId),
    Family(&'a FamilyId),
}

/// Answers whether a user may act as a guardian over a child or family.
///
/// Identity issuance lives outside hearthd; implementations only decide
/// authority for an already-authenticated user.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_guardian_authority(&self, user_id: &UserId, scope: AuthorityScope<'_>)
        -> Result<bool>;
}

/// Everything the engine needs to know about one child
#[derive(Debug, Clone, PartialEq)]
pub struct ChildProfile {
    pub child_id: ChildId,
    pub family_id: FamilyId,
    pub display_name: String,
    pub policy: ChildPolicy,
}

/// In-memory index over the configured families
#[derive(Debug, Default)]
pub struct FamilyDirectory {
    children: HashMap<ChildId, ChildProfile>,
    /// Child IDs per family, in config order
    family_children: HashMap<FamilyId, Vec<ChildId>>,
    guardians: HashMap<UserId, FamilyId>,
}

impl FamilyDirectory {
    pub fn from_config(config: &OversightConfig) -> Self {
        let mut directory = Self::default();

        for family in &config.families {
            let mut child_ids = Vec::new();
            for member in &family.members {
                match &member.role {
                    MemberRole::Guardian => {
                        directory
                            .guardians
                            .insert(member.id.clone(), family.id.clone());
                    }
                    MemberRole::Child { policy } => {
                        let child_id = ChildId::new(member.id.as_str());
                        child_ids.push(child_id.clone());
                        directory.children.insert(
                            child_id.clone(),
                            ChildProfile {
                                child_id,
                                family_id: family.id.clone(),
                                display_name: member.display_name.clone(),
                                policy: policy.clone(),
                            },
                        );
                    }
                }
            }
            directory.family_children.insert(family.id.clone(), child_ids);
        }

        directory
    }

    pub fn child(&self, child_id: &ChildId) -> Option<&ChildProfile> {
        self.children.get(child_id)
    }

    pub fn family_of(&self, child_id: &ChildId) -> Option<&FamilyId> {
        self.children.get(child_id).map(|c| &c.family_id)
    }

    pub fn has_family(&self, family_id: &FamilyId) -> bool {
        self.family_children.contains_key(family_id)
    }

    /// Children of a family in config order, `None` for an unknown family
    pub fn children_of(&self, family_id: &FamilyId) -> Option<Vec<&ChildProfile>> {
        let ids = self.family_children.get(family_id)?;
        Some(ids.iter().filter_map(|id| self.children.get(id)).collect())
    }

    /// Guardian authority is membership of the family with the guardian role
    fn guardian_of(&self, user_id: &UserId, family_id: &FamilyId) -> bool {
        self.guardians.get(user_id) == Some(family_id)
    }
}

#[async_trait]
impl Authorizer for FamilyDirectory {
    async fn has_guardian_authority(
        &self,
        user_id: &UserId,
        scope: AuthorityScope<'_>,
    ) -> Result<bool> {
        let family_id = match scope {
            AuthorityScope::Family(family_id) => Some(family_id),
            AuthorityScope::Child(child_id) => self.family_of(child_id),
        };
        Ok(family_id.is_some_and(|f| self.guardian_of(user_id, f)))
    }
}
