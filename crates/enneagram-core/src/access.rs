use serde::{Deserialize, Serialize};

use crate::{CoreError, MemberRole, PrincipalId, ResultRecord, Scope, TeamId, TeamRole};

/// Source of team ownership and membership facts.
pub trait TeamMembershipRegistry {
    /// # Errors
    /// Returns [`CoreError::UpstreamUnavailable`] when the lookup cannot be served.
    fn team_owner(&self, team_id: TeamId) -> Result<Option<PrincipalId>, CoreError>;

    /// Role persisted for `principal` on `team_id`, if any.
    ///
    /// # Errors
    /// Returns [`CoreError::UpstreamUnavailable`] when the lookup cannot be served.
    fn role_of(
        &self,
        principal: &PrincipalId,
        team_id: TeamId,
    ) -> Result<Option<MemberRole>, CoreError>;
}

impl<T: TeamMembershipRegistry + ?Sized> TeamMembershipRegistry for &T {
    fn team_owner(&self, team_id: TeamId) -> Result<Option<PrincipalId>, CoreError> {
        (**self).team_owner(team_id)
    }

    fn role_of(
        &self,
        principal: &PrincipalId,
        team_id: TeamId,
    ) -> Result<Option<MemberRole>, CoreError> {
        (**self).role_of(principal, team_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    Respondent,
    TeamOwner,
    TeamManager,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    IndividualScope,
    InsufficientRole,
    NoRelation,
    RegistryUnavailable,
}

impl DenyReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IndividualScope => "individual_scope",
            Self::InsufficientRole => "insufficient_role",
            Self::NoRelation => "no_relation",
            Self::RegistryUnavailable => "registry_unavailable",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum AccessDecision {
    Allow(AllowReason),
    Deny(DenyReason),
}

impl AccessDecision {
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow(_))
    }
}

/// Effective role of `principal` on `team_id`. Ownership wins over any persisted row.
///
/// # Errors
/// Propagates registry failures unchanged.
pub fn resolve_team_role<R: TeamMembershipRegistry + ?Sized>(
    principal: &PrincipalId,
    team_id: TeamId,
    registry: &R,
) -> Result<Option<TeamRole>, CoreError> {
    if registry.team_owner(team_id)?.as_ref() == Some(principal) {
        return Ok(Some(TeamRole::Owner));
    }
    Ok(registry.role_of(principal, team_id)?.map(TeamRole::from))
}

/// Decide whether `requester` may read results of `respondent` in the given team scope.
///
/// The registry is consulted only when the requester is not the respondent and the
/// scope is a team. Lookup failures deny.
pub fn decide_scope_view<R: TeamMembershipRegistry + ?Sized>(
    requester: &PrincipalId,
    respondent: &PrincipalId,
    team_id: Option<TeamId>,
    registry: &R,
) -> AccessDecision {
    if requester == respondent {
        return AccessDecision::Allow(AllowReason::Respondent);
    }
    let Some(team_id) = team_id else {
        tracing::debug!(%requester, reason = "individual_scope", "result view denied");
        return AccessDecision::Deny(DenyReason::IndividualScope);
    };

    let decision = match resolve_team_role(requester, team_id, registry) {
        Ok(Some(TeamRole::Owner)) => AccessDecision::Allow(AllowReason::TeamOwner),
        Ok(Some(TeamRole::Manager)) => AccessDecision::Allow(AllowReason::TeamManager),
        Ok(Some(TeamRole::Member)) => AccessDecision::Deny(DenyReason::InsufficientRole),
        Ok(None) => AccessDecision::Deny(DenyReason::NoRelation),
        Err(err) => {
            tracing::warn!(%requester, %team_id, error = %err, "membership lookup failed");
            AccessDecision::Deny(DenyReason::RegistryUnavailable)
        }
    };
    if let AccessDecision::Deny(reason) = decision {
        tracing::debug!(%requester, %team_id, reason = reason.as_str(), "result view denied");
    }
    decision
}

pub fn decide_view<R: TeamMembershipRegistry + ?Sized>(
    requester: &PrincipalId,
    target: &ResultRecord,
    registry: &R,
) -> AccessDecision {
    decide_scope_view(requester, &target.respondent_id, target.team_id, registry)
}

#[must_use]
pub fn can_view<R: TeamMembershipRegistry + ?Sized>(
    requester: &PrincipalId,
    target: &ResultRecord,
    registry: &R,
) -> bool {
    decide_view(requester, target, registry).is_allowed()
}

#[must_use]
pub fn can_view_scope<R: TeamMembershipRegistry + ?Sized>(
    requester: &PrincipalId,
    respondent: &PrincipalId,
    scope: Scope,
    registry: &R,
) -> bool {
    decide_scope_view(requester, respondent, scope.team_id(), registry).is_allowed()
}

/// Gate for the team-report path: only the owner or a manager may list team results.
///
/// # Errors
/// Returns [`CoreError::AccessDenied`] for members, strangers, unknown teams, and
/// registry failures alike.
pub fn authorize_team_report<R: TeamMembershipRegistry + ?Sized>(
    requester: &PrincipalId,
    team_id: TeamId,
    registry: &R,
) -> Result<TeamRole, CoreError> {
    match resolve_team_role(requester, team_id, registry) {
        Ok(Some(role)) if role.can_read_team_results() => Ok(role),
        Ok(role) => {
            tracing::debug!(
                %requester,
                %team_id,
                role = role.map_or("none", TeamRole::as_str),
                "team report denied"
            );
            Err(CoreError::AccessDenied)
        }
        Err(err) => {
            tracing::warn!(%requester, %team_id, error = %err, "membership lookup failed");
            Err(CoreError::AccessDenied)
        }
    }
}
