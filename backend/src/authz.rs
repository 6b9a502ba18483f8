use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::AuthError,
    models::{Account, GlobalRole, Role},
    repository::RepositoryState,
};

/// Action
///
/// Every operation the authorization engine knows how to guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateCommunity,
    JoinCommunity,
    CreatePost,
    EditPost,
    DeletePost,
    BanMember,
    AssignMemberRole,
    ManageAccounts,
}

/// Requirement
///
/// What an action demands of the caller once the disabled and admin checks
/// have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Effective community role must be at least this.
    Role(Role),
    /// Only a global admin may perform the action.
    Admin,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::CreateCommunity,
        Action::JoinCommunity,
        Action::CreatePost,
        Action::EditPost,
        Action::DeletePost,
        Action::BanMember,
        Action::AssignMemberRole,
        Action::ManageAccounts,
    ];

    pub fn requirement(&self) -> Requirement {
        match self {
            Action::CreateCommunity | Action::JoinCommunity => Requirement::Role(Role::None),
            Action::CreatePost => Requirement::Role(Role::Member),
            Action::EditPost | Action::DeletePost | Action::BanMember => {
                Requirement::Role(Role::Moderator)
            }
            Action::AssignMemberRole => Requirement::Role(Role::Owner),
            Action::ManageAccounts => Requirement::Admin,
        }
    }

    /// Actions an author may perform on their own post regardless of role.
    pub fn author_may(&self) -> bool {
        matches!(self, Action::EditPost | Action::DeletePost)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Resource
///
/// What an action targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Platform,
    Community(Uuid),
    Post(Uuid),
}

/// Facts
///
/// Everything the pure evaluation needs to know about the caller's standing
/// on the resource, gathered from the repository beforehand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Facts {
    pub effective_role: Role,
    /// The caller wrote the targeted post.
    pub authored: bool,
    /// The caller is banned from the community the resource belongs to.
    pub banned: bool,
}

/// DenyReason
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    InsufficientRole,
    AccountDisabled,
}

impl From<DenyReason> for AuthError {
    fn from(reason: DenyReason) -> Self {
        match reason {
            DenyReason::InsufficientRole => AuthError::InsufficientRole,
            DenyReason::AccountDisabled => AuthError::AccountDisabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn into_result(self) -> Result<(), AuthError> {
        match self {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason.into()),
        }
    }
}

/// evaluate
///
/// The pure permission decision. Order: disabled accounts fail everything,
/// then global admins pass everything, then the effective community role is
/// compared against the action's minimum, and finally an author may edit or
/// delete their own post unless banned.
pub fn evaluate(account: &Account, action: Action, facts: &Facts) -> Decision {
    if !account.active {
        return Decision::Deny(DenyReason::AccountDisabled);
    }
    if account.global_role == GlobalRole::Admin {
        return Decision::Allow;
    }

    let required = match action.requirement() {
        Requirement::Admin => return Decision::Deny(DenyReason::InsufficientRole),
        Requirement::Role(required) => required,
    };
    if facts.banned {
        return Decision::Deny(DenyReason::InsufficientRole);
    }
    if facts.effective_role >= required || (facts.authored && action.author_may()) {
        Decision::Allow
    } else {
        Decision::Deny(DenyReason::InsufficientRole)
    }
}

/// outranks
///
/// Member management is only allowed downwards: the actor must hold a
/// strictly higher role than the member being changed.
pub fn outranks(actor: Role, target: Role) -> bool {
    actor > target
}

/// AuthorizationEngine
///
/// Resolves the caller's standing on a resource from the repository and runs
/// `evaluate` on it.
pub struct AuthorizationEngine {
    repo: RepositoryState,
}

impl AuthorizationEngine {
    pub fn new(repo: RepositoryState) -> Self {
        Self { repo }
    }

    /// can_perform
    ///
    /// Missing (or soft-deleted) targets are `NotFound`; a mismatched
    /// action/resource pairing is an internal error.
    pub async fn can_perform(
        &self,
        account: &Account,
        action: Action,
        resource: Resource,
    ) -> Result<Decision, AuthError> {
        // Skip the lookups entirely when the outcome cannot depend on them.
        if !account.active {
            return Ok(Decision::Deny(DenyReason::AccountDisabled));
        }

        let facts = match (action, resource) {
            (Action::CreateCommunity | Action::ManageAccounts, Resource::Platform) => {
                Facts::default()
            }
            (
                Action::JoinCommunity
                | Action::CreatePost
                | Action::BanMember
                | Action::AssignMemberRole,
                Resource::Community(community_id),
            ) => {
                self.repo
                    .get_community(community_id)
                    .await?
                    .ok_or(AuthError::NotFound)?;
                self.community_facts(account.id, community_id).await?
            }
            (Action::EditPost | Action::DeletePost, Resource::Post(post_id)) => {
                let post = self
                    .repo
                    .get_post(post_id)
                    .await?
                    .filter(|p| !p.deleted)
                    .ok_or(AuthError::NotFound)?;
                Facts {
                    authored: post.author_id == account.id,
                    ..self.community_facts(account.id, post.community_id).await?
                }
            }
            (action, resource) => {
                return Err(AuthError::Internal(format!(
                    "action {action} does not apply to {resource:?}"
                )));
            }
        };

        let decision = evaluate(account, action, &facts);
        debug!(
            account_id = %account.id,
            %action,
            ?resource,
            ?decision,
            "permission evaluated"
        );
        Ok(decision)
    }

    /// effective_role
    ///
    /// The caller's role in a community, `Role::None` without a membership.
    pub async fn effective_role(&self, account_id: Uuid, community_id: Uuid) -> Result<Role, AuthError> {
        Ok(self
            .repo
            .get_membership(account_id, community_id)
            .await?
            .map_or(Role::None, |m| m.role))
    }

    async fn community_facts(&self, account_id: Uuid, community_id: Uuid) -> Result<Facts, AuthError> {
        Ok(Facts {
            effective_role: self.effective_role(account_id, community_id).await?,
            authored: false,
            banned: self.repo.is_banned(account_id, community_id).await?,
        })
    }
}
