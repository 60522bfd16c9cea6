use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

mod access;
mod questionnaire;
mod scoring;

pub use access::{
    authorize_team_report, can_view, can_view_scope, decide_scope_view, decide_view,
    resolve_team_role, AccessDecision, AllowReason, DenyReason, TeamMembershipRegistry,
};
pub use questionnaire::{ArchetypeTable, Questionnaire, QuestionnaireItem, TypeProfile};
pub use scoring::{affinity_percent, score, ResultFragment, ScoreVector, Wing};

pub const LIKERT_MIN: u8 = 1;
pub const LIKERT_MAX: u8 = 5;
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const JOIN_CODE_SYMBOLS: usize = 6;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum CoreError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("access denied")]
    AccessDenied,
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Opaque identifier of an already-authenticated actor.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct PrincipalId(pub String);

impl PrincipalId {
    /// Wrap a raw principal string supplied by the identity layer.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the value is blank.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation("principal id MUST be non-empty".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PrincipalId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TeamId(pub Ulid);

impl TeamId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TeamId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TeamId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ResultId(pub Ulid);

impl ResultId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ResultId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ResultId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One of the nine personality categories, always within `1..=9`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct TypeSlot(u8);

impl TypeSlot {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 9;

    /// # Errors
    /// Returns [`CoreError::MalformedInput`] when `value` is outside `1..=9`.
    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::MalformedInput(format!("type slot {value} is outside 1..=9")))
        }
    }

    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// All slots in scan order `1..=9`.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN..=Self::MAX).map(Self)
    }

    /// Adjacent slot below, wrapping 1 to 9.
    #[must_use]
    pub fn left_wing(self) -> Self {
        if self.0 == Self::MIN {
            Self(Self::MAX)
        } else {
            Self(self.0 - 1)
        }
    }

    /// Adjacent slot above, wrapping 9 to 1.
    #[must_use]
    pub fn right_wing(self) -> Self {
        if self.0 == Self::MAX {
            Self(Self::MIN)
        } else {
            Self(self.0 + 1)
        }
    }
}

impl TryFrom<u8> for TypeSlot {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TypeSlot> for u8 {
    fn from(value: TypeSlot) -> Self {
        value.0
    }
}

impl Display for TypeSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Submitted Likert answers keyed by questionnaire item id.
///
/// Values are range-checked on every entry path, including deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(try_from = "BTreeMap<u32, u8>", into = "BTreeMap<u32, u8>")]
pub struct AnswerSet(BTreeMap<u32, u8>);

impl AnswerSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the answer for one item.
    ///
    /// # Errors
    /// Returns [`CoreError::MalformedInput`] when `value` is outside the Likert range.
    pub fn insert(&mut self, item_id: u32, value: u8) -> Result<(), CoreError> {
        if !(LIKERT_MIN..=LIKERT_MAX).contains(&value) {
            return Err(CoreError::MalformedInput(format!(
                "answer for item {item_id} MUST be in {LIKERT_MIN}..={LIKERT_MAX}, got {value}"
            )));
        }
        self.0.insert(item_id, value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, item_id: u32) -> Option<u8> {
        self.0.get(&item_id).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn item_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.keys().copied()
    }
}

impl TryFrom<BTreeMap<u32, u8>> for AnswerSet {
    type Error = CoreError;

    fn try_from(value: BTreeMap<u32, u8>) -> Result<Self, Self::Error> {
        let mut answers = Self::new();
        for (item_id, answer) in value {
            answers.insert(item_id, answer)?;
        }
        Ok(answers)
    }
}

impl From<AnswerSet> for BTreeMap<u32, u8> {
    fn from(value: AnswerSet) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Individual,
    Team(TeamId),
}

impl Scope {
    #[must_use]
    pub fn from_team(team_id: Option<TeamId>) -> Self {
        team_id.map_or(Self::Individual, Self::Team)
    }

    #[must_use]
    pub fn team_id(self) -> Option<TeamId> {
        match self {
            Self::Individual => None,
            Self::Team(team_id) => Some(team_id),
        }
    }
}

/// Role persisted on a membership row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Manager,
    Member,
}

impl MemberRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manager => "manager",
            Self::Member => "member",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manager" => Some(Self::Manager),
            "member" => Some(Self::Member),
            _ => None,
        }
    }
}

/// Effective role of a principal on a team, with ownership derived from the team itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Owner,
    Manager,
    Member,
}

impl TeamRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Manager => "manager",
            Self::Member => "member",
        }
    }

    #[must_use]
    pub fn can_read_team_results(self) -> bool {
        matches!(self, Self::Owner | Self::Manager)
    }
}

impl From<MemberRole> for TeamRole {
    fn from(value: MemberRole) -> Self {
        match value {
            MemberRole::Manager => Self::Manager,
            MemberRole::Member => Self::Member,
        }
    }
}

/// Human-shareable team code shaped `XXX-XXX`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct JoinCode(String);

impl JoinCode {
    /// Build a code from alphabet indexes, taken modulo the alphabet length.
    #[must_use]
    pub fn from_indexes(indexes: [usize; JOIN_CODE_SYMBOLS]) -> Self {
        let mut code = String::with_capacity(JOIN_CODE_SYMBOLS + 1);
        for (position, index) in indexes.iter().enumerate() {
            if position == JOIN_CODE_SYMBOLS / 2 {
                code.push('-');
            }
            code.push(char::from(JOIN_CODE_ALPHABET[index % JOIN_CODE_ALPHABET.len()]));
        }
        Self(code)
    }

    /// Normalize user input (trim, uppercase) and check the code shape.
    ///
    /// # Errors
    /// Returns [`CoreError::Validation`] when the input is not a well-formed join code.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let normalized = raw.trim().to_ascii_uppercase();
        let bytes = normalized.as_bytes();
        let well_formed = bytes.len() == JOIN_CODE_SYMBOLS + 1
            && bytes.iter().enumerate().all(|(position, byte)| {
                if position == JOIN_CODE_SYMBOLS / 2 {
                    *byte == b'-'
                } else {
                    JOIN_CODE_ALPHABET.contains(byte)
                }
            });
        if !well_formed {
            return Err(CoreError::Validation(format!("invalid join code: {raw}")));
        }
        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JoinCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Team {
    pub team_id: TeamId,
    pub name: String,
    pub join_code: JoinCode,
    pub owner_id: PrincipalId,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl Team {
    /// # Errors
    /// Returns [`CoreError::Validation`] when the team name is blank.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("team name MUST be non-empty".to_string()));
        }
        Ok(())
    }

    #[must_use]
    pub fn is_owner(&self, principal: &PrincipalId) -> bool {
        &self.owner_id == principal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Membership {
    pub team_id: TeamId,
    pub user_id: PrincipalId,
    pub role: MemberRole,
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
}

/// One persisted questionnaire submission. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultRecord {
    pub result_id: ResultId,
    pub respondent_id: PrincipalId,
    pub team_id: Option<TeamId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub answers: AnswerSet,
    pub outcome: ResultFragment,
}

impl ResultRecord {
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::from_team(self.team_id)
    }
}
