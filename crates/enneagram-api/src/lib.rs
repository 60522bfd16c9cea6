use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use enneagram_core::{
    authorize_team_report, can_view, can_view_scope, resolve_team_role, AnswerSet, CoreError,
    JoinCode, MemberRole, PrincipalId, Questionnaire, ResultId, ResultRecord, Scope, Team, TeamId,
    TeamRole, JOIN_CODE_ALPHABET, JOIN_CODE_SYMBOLS,
};
use enneagram_store_sqlite::{SchemaStatus, SqliteStore};
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod questionnaire_file;

pub use questionnaire_file::QuestionnaireFile;

pub const API_CONTRACT_VERSION: &str = "api.v1";

const JOIN_CODE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_unversioned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitRequest {
    pub answers: AnswerSet,
    #[serde(default)]
    pub team_id: Option<TeamId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateTeamRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinTeamRequest {
    pub join_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetMemberRoleRequest {
    pub role: MemberRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinTeamResult {
    pub team: Team,
    pub role: TeamRole,
    pub created: bool,
}

/// A team as seen by one principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamSummary {
    pub team: Team,
    pub role: TeamRole,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamMemberView {
    pub user_id: PrincipalId,
    pub role: TeamRole,
    #[serde(with = "time::serde::rfc3339::option")]
    pub joined_at: Option<OffsetDateTime>,
    /// `true` for the owner entry when no membership row backs it.
    pub derived: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamMembersView {
    pub team: Team,
    pub requester_role: TeamRole,
    pub members: Vec<TeamMemberView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TeamResultsView {
    pub team: Team,
    pub requester_role: TeamRole,
    pub results: Vec<ResultRecord>,
}

/// Facade over scoring, the access gate, and the `SQLite` store.
///
/// Every operation takes the acting principal explicitly; there is no ambient session.
#[derive(Debug, Clone)]
pub struct EnneagramApi {
    db_path: PathBuf,
    questionnaire: Arc<Questionnaire>,
}

impl EnneagramApi {
    /// Build an API over the built-in questionnaire.
    ///
    /// # Errors
    /// Returns an error only if the embedded questionnaire tables are inconsistent.
    pub fn new(db_path: PathBuf) -> Result<Self> {
        Ok(Self::with_questionnaire(db_path, Questionnaire::builtin()?))
    }

    #[must_use]
    pub fn with_questionnaire(db_path: PathBuf, questionnaire: Questionnaire) -> Self {
        Self { db_path, questionnaire: Arc::new(questionnaire) }
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    #[must_use]
    pub fn questionnaire(&self) -> &Questionnaire {
        &self.questionnaire
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_unversioned: before.inferred_from_unversioned,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_unversioned: before.inferred_from_unversioned,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Score and persist one questionnaire submission.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedInput`] for incomplete or unknown answers,
    /// [`CoreError::AccessDenied`] when submitting into a team the principal does not
    /// belong to, or a store error when persistence fails. Nothing is written on error.
    pub fn submit(&self, principal: &PrincipalId, request: SubmitRequest) -> Result<ResultRecord> {
        let outcome = self.questionnaire.score(&request.answers)?;
        let mut store = self.open_migrated_store()?;

        if let Some(team_id) = request.team_id {
            let role = resolve_team_role(principal, team_id, &store)?;
            if role.is_none() {
                tracing::debug!(%principal, %team_id, "team submission denied");
                return Err(CoreError::AccessDenied.into());
            }
        }

        let record = ResultRecord {
            result_id: ResultId::new(),
            respondent_id: principal.clone(),
            team_id: request.team_id,
            created_at: OffsetDateTime::now_utc(),
            answers: request.answers,
            outcome,
        };
        store.insert_result(&record)?;
        tracing::info!(
            result_id = %record.result_id,
            team_id = ?record.team_id,
            type_slot = record.outcome.type_slot.get(),
            "assessment result stored"
        );
        Ok(record)
    }

    /// Latest result of the principal's own submissions in `scope`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn my_latest(&self, principal: &PrincipalId, scope: Scope) -> Result<Option<ResultRecord>> {
        let store = self.open_migrated_store()?;
        store.latest_by_scope(principal, scope)
    }

    /// Latest result of `respondent` in `scope`, as visible to `requester`.
    ///
    /// The gate runs before the lookup, so a denial does not reveal whether a result
    /// exists.
    ///
    /// # Errors
    /// Returns [`CoreError::AccessDenied`] both when the gate denies and when no
    /// result exists.
    pub fn view_result(
        &self,
        requester: &PrincipalId,
        respondent: &PrincipalId,
        scope: Scope,
    ) -> Result<ResultRecord> {
        let store = self.open_migrated_store()?;
        if !can_view_scope(requester, respondent, scope, &store) {
            return Err(CoreError::AccessDenied.into());
        }
        store.latest_by_scope(respondent, scope)?.ok_or_else(|| CoreError::AccessDenied.into())
    }

    /// Latest result per respondent in a team, for its owner or managers.
    ///
    /// # Errors
    /// Returns [`CoreError::AccessDenied`] for members, strangers, and unknown teams.
    pub fn team_results(
        &self,
        requester: &PrincipalId,
        team_id: TeamId,
    ) -> Result<TeamResultsView> {
        let store = self.open_migrated_store()?;
        let requester_role = authorize_team_report(requester, team_id, &store)?;
        let team = store.get_team(team_id)?.ok_or(CoreError::AccessDenied)?;
        let results = store
            .latest_per_respondent_in_team(team_id)?
            .into_iter()
            .filter(|record| can_view(requester, record, &store))
            .collect();
        Ok(TeamResultsView { team, requester_role, results })
    }

    /// Create a team owned by `owner` with a fresh join code.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] for a blank name, or an error when no unused
    /// join code was found within the attempt budget.
    pub fn create_team(&self, owner: &PrincipalId, request: CreateTeamRequest) -> Result<Team> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("team name MUST be non-empty".to_string()).into());
        }
        let mut store = self.open_migrated_store()?;
        let mut rng = rand::thread_rng();

        for attempt in 1..=JOIN_CODE_ATTEMPTS {
            let team = Team {
                team_id: TeamId::new(),
                name: name.to_string(),
                join_code: generate_join_code(&mut rng),
                owner_id: owner.clone(),
                created_at: OffsetDateTime::now_utc(),
            };
            if store.insert_team(&team)? {
                tracing::info!(team_id = %team.team_id, %owner, "team created");
                return Ok(team);
            }
            tracing::debug!(attempt, "join code collision; regenerating");
        }

        Err(anyhow!("failed to allocate a unique join code after {JOIN_CODE_ATTEMPTS} attempts"))
    }

    /// Join a team by code. Joining twice, or joining a team you own, changes nothing.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] for malformed or unknown codes.
    pub fn join_team(
        &self,
        principal: &PrincipalId,
        request: JoinTeamRequest,
    ) -> Result<JoinTeamResult> {
        let join_code = JoinCode::parse(&request.join_code)?;
        let mut store = self.open_migrated_store()?;
        let team = store.find_team_by_join_code(&join_code)?.ok_or_else(|| {
            CoreError::Validation(format!("no team uses join code {join_code}"))
        })?;

        if team.is_owner(principal) {
            return Ok(JoinTeamResult { team, role: TeamRole::Owner, created: false });
        }

        let created = store.join_team(team.team_id, principal, OffsetDateTime::now_utc())?;
        let role = store
            .membership(team.team_id, principal)?
            .map_or(TeamRole::Member, |membership| TeamRole::from(membership.role));
        if created {
            tracing::info!(team_id = %team.team_id, %principal, "team joined");
        }
        Ok(JoinTeamResult { team, role, created })
    }

    /// Owned teams plus joined teams, each listed once, ordered by name then id.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn list_my_teams(&self, principal: &PrincipalId) -> Result<Vec<TeamSummary>> {
        let store = self.open_migrated_store()?;
        let mut teams = store
            .teams_owned_by(principal)?
            .into_iter()
            .map(|team| TeamSummary { team, role: TeamRole::Owner })
            .collect::<Vec<_>>();
        for joined in store.teams_joined_by(principal)? {
            if joined.team.is_owner(principal) {
                continue;
            }
            teams.push(TeamSummary { team: joined.team, role: TeamRole::from(joined.role) });
        }
        teams.sort_by(|left, right| {
            left.team.name.cmp(&right.team.name).then(left.team.team_id.cmp(&right.team.team_id))
        });
        Ok(teams)
    }

    /// Roster of a team for anyone related to it. The owner is listed first.
    ///
    /// # Errors
    /// Returns [`CoreError::AccessDenied`] for strangers and unknown teams.
    pub fn team_members(
        &self,
        requester: &PrincipalId,
        team_id: TeamId,
    ) -> Result<TeamMembersView> {
        let store = self.open_migrated_store()?;
        let Some(requester_role) = resolve_team_role(requester, team_id, &store)? else {
            return Err(CoreError::AccessDenied.into());
        };
        let team = store.get_team(team_id)?.ok_or(CoreError::AccessDenied)?;

        let rows = store.list_memberships(team_id)?;
        let mut members = Vec::with_capacity(rows.len() + 1);
        match rows.iter().find(|row| row.user_id == team.owner_id) {
            Some(row) => members.push(TeamMemberView {
                user_id: row.user_id.clone(),
                role: TeamRole::Owner,
                joined_at: Some(row.joined_at),
                derived: false,
            }),
            None => members.push(TeamMemberView {
                user_id: team.owner_id.clone(),
                role: TeamRole::Owner,
                joined_at: None,
                derived: true,
            }),
        }
        members.extend(rows.into_iter().filter(|row| row.user_id != team.owner_id).map(|row| {
            TeamMemberView {
                user_id: row.user_id,
                role: TeamRole::from(row.role),
                joined_at: Some(row.joined_at),
                derived: false,
            }
        }));

        Ok(TeamMembersView { team, requester_role, members })
    }

    /// Promote or demote an existing member. Only the owner may do this.
    ///
    /// # Errors
    /// Returns [`CoreError::AccessDenied`] for anyone but the owner,
    /// [`CoreError::Validation`] when targeting the owner or a non-member.
    pub fn set_member_role(
        &self,
        requester: &PrincipalId,
        team_id: TeamId,
        user: &PrincipalId,
        request: SetMemberRoleRequest,
    ) -> Result<TeamMemberView> {
        let mut store = self.open_migrated_store()?;
        let team = store.get_team(team_id)?.ok_or(CoreError::AccessDenied)?;
        if !team.is_owner(requester) {
            tracing::debug!(%requester, %team_id, "role change denied");
            return Err(CoreError::AccessDenied.into());
        }
        if team.is_owner(user) {
            return Err(
                CoreError::Validation("the team owner's role cannot be changed".to_string()).into()
            );
        }
        if !store.set_member_role(team_id, user, request.role)? {
            return Err(
                CoreError::Validation(format!("{user} is not a member of team {team_id}")).into()
            );
        }
        let membership = store
            .membership(team_id, user)?
            .ok_or_else(|| anyhow!("membership disappeared after role update"))?;
        tracing::info!(%team_id, %user, role = request.role.as_str(), "member role updated");
        Ok(TeamMemberView {
            user_id: membership.user_id,
            role: TeamRole::from(membership.role),
            joined_at: Some(membership.joined_at),
            derived: false,
        })
    }
}

/// Draw a join code uniformly from the code alphabet.
pub fn generate_join_code<R: Rng + ?Sized>(rng: &mut R) -> JoinCode {
    let mut indexes = [0_usize; JOIN_CODE_SYMBOLS];
    for index in &mut indexes {
        *index = rng.gen_range(0..JOIN_CODE_ALPHABET.len());
    }
    JoinCode::from_indexes(indexes)
}
