use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use enneagram_core::{
    AnswerSet, CoreError, JoinCode, MemberRole, Membership, PrincipalId, ResultFragment, ResultId,
    ResultRecord, Scope, Team, TeamId, TeamMembershipRegistry,
};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS teams (
  team_id TEXT PRIMARY KEY,
  name TEXT NOT NULL CHECK (length(trim(name)) > 0),
  join_code TEXT NOT NULL UNIQUE,
  owner_id TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS team_members (
  team_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  role TEXT NOT NULL CHECK (role IN ('manager', 'member')),
  joined_at TEXT NOT NULL,
  PRIMARY KEY (team_id, user_id),
  FOREIGN KEY (team_id) REFERENCES teams(team_id)
);

CREATE TABLE IF NOT EXISTS assessment_results (
  result_id TEXT PRIMARY KEY,
  respondent_id TEXT NOT NULL,
  team_id TEXT NULL,
  type_slot INTEGER NOT NULL CHECK (type_slot BETWEEN 1 AND 9),
  archetype TEXT NOT NULL,
  affinity_percent INTEGER NOT NULL CHECK (affinity_percent BETWEEN 0 AND 100),
  raw_score INTEGER NOT NULL CHECK (raw_score >= 0),
  created_at TEXT NOT NULL,
  created_at_ns INTEGER NOT NULL,
  answers_json TEXT NOT NULL,
  outcome_json TEXT NOT NULL,
  FOREIGN KEY (team_id) REFERENCES teams(team_id)
);

CREATE INDEX IF NOT EXISTS idx_teams_owner ON teams(owner_id);
CREATE INDEX IF NOT EXISTS idx_team_members_user ON team_members(user_id);
CREATE INDEX IF NOT EXISTS idx_results_scope
  ON assessment_results(respondent_id, team_id, created_at_ns);
CREATE INDEX IF NOT EXISTS idx_results_team
  ON assessment_results(team_id, respondent_id, created_at_ns);
";

const MIGRATION_002_SQL: &str = r"
CREATE TRIGGER IF NOT EXISTS assessment_results_no_update
BEFORE UPDATE ON assessment_results
BEGIN
  SELECT RAISE(ABORT, 'assessment_results is append-only');
END;

CREATE TRIGGER IF NOT EXISTS assessment_results_no_delete
BEFORE DELETE ON assessment_results
BEGIN
  SELECT RAISE(ABORT, 'assessment_results is append-only');
END;
";

const RESULT_COLUMNS: &str =
    "result_id, respondent_id, team_id, created_at, answers_json, outcome_json";
const TEAM_COLUMNS: &str = "team_id, name, join_code, owner_id, created_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_unversioned: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

/// A team together with a membership row held by some principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinedTeam {
    pub team: Team,
    pub role: MemberRole,
}

impl SqliteStore {
    /// Open a SQLite-backed result store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_unversioned) =
            detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_unversioned,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            let tx = self.conn.transaction().context("failed to start migration v2")?;
            tx.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
            record_schema_version(&tx, 2)?;
            tx.commit().context("failed to commit migration v2")?;
            tracing::info!(version = 2, "applied schema migration");
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&mut self) -> Result<i64> {
        if table_exists(&self.conn, "assessment_results")? {
            if !table_has_column(&self.conn, "assessment_results", "created_at_ns")? {
                return Err(anyhow!(
                    "database schema is invalid: assessment_results has no created_at_ns column"
                ));
            }
            // Tables exist but were created without migration bookkeeping.
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        let tx = self.conn.transaction().context("failed to start migration v1")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        tracing::info!(version = 1, "applied schema migration");
        Ok(1)
    }

    /// Append one scored submission. Rows are never updated or deleted afterwards.
    ///
    /// # Errors
    /// Returns an error when serialization or the insert fails, including foreign-key
    /// failures for unknown teams.
    pub fn insert_result(&mut self, record: &ResultRecord) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start transaction")?;
        tx.execute(
            "INSERT INTO assessment_results(
                result_id, respondent_id, team_id, type_slot, archetype,
                affinity_percent, raw_score, created_at, created_at_ns,
                answers_json, outcome_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.result_id.to_string(),
                record.respondent_id.as_str(),
                record.team_id.map(|team_id| team_id.to_string()),
                i64::from(record.outcome.type_slot.get()),
                record.outcome.archetype,
                i64::from(record.outcome.affinity_percent),
                i64::from(record.outcome.raw_score),
                rfc3339(record.created_at)?,
                unix_nanos(record.created_at)?,
                serde_json::to_string(&record.answers).context("failed to serialize answers")?,
                serde_json::to_string(&record.outcome).context("failed to serialize outcome")?,
            ],
        )
        .context("failed to insert assessment result")?;
        tx.commit().context("failed to commit result insert")?;
        Ok(())
    }

    /// Most recent result for `respondent` in `scope`, if any.
    ///
    /// # Errors
    /// Returns an error when the query fails or the stored row cannot be decoded.
    pub fn latest_by_scope(
        &self,
        respondent: &PrincipalId,
        scope: Scope,
    ) -> Result<Option<ResultRecord>> {
        let team_id = scope.team_id().map(|team_id| team_id.to_string());
        self.conn
            .query_row(
                &format!(
                    "SELECT {RESULT_COLUMNS} FROM assessment_results
                     WHERE respondent_id = ?1 AND team_id IS ?2
                     ORDER BY created_at_ns DESC, rowid DESC
                     LIMIT 1"
                ),
                params![respondent.as_str(), team_id],
                RawResultRow::from_row,
            )
            .optional()
            .context("failed to query latest result by scope")?
            .map(RawResultRow::decode)
            .transpose()
    }

    /// One latest result per respondent within a team scope, newest first.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored row cannot be decoded.
    pub fn latest_per_respondent_in_team(&self, team_id: TeamId) -> Result<Vec<ResultRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM assessment_results r
             WHERE r.team_id = ?1
               AND r.rowid = (
                 SELECT latest.rowid FROM assessment_results latest
                 WHERE latest.team_id = r.team_id AND latest.respondent_id = r.respondent_id
                 ORDER BY latest.created_at_ns DESC, latest.rowid DESC
                 LIMIT 1
               )
             ORDER BY r.created_at_ns DESC, r.respondent_id ASC"
        ))?;
        let rows = stmt.query_map(params![team_id.to_string()], RawResultRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("failed to read team result row")?.decode()?);
        }
        Ok(records)
    }

    /// All stored results, oldest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_results(&self) -> Result<Vec<ResultRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM assessment_results ORDER BY created_at_ns ASC, rowid ASC"
        ))?;
        let rows = stmt.query_map([], RawResultRow::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("failed to read result row")?.decode()?);
        }
        Ok(records)
    }

    /// Insert a new team. Returns `false` without writing when the join code is taken.
    ///
    /// # Errors
    /// Returns an error when the team fails validation or the insert fails.
    pub fn insert_team(&mut self, team: &Team) -> Result<bool> {
        team.validate().map_err(|err| anyhow!("team validation failed: {err}"))?;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO teams(team_id, name, join_code, owner_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(join_code) DO NOTHING",
                params![
                    team.team_id.to_string(),
                    team.name,
                    team.join_code.as_str(),
                    team.owner_id.as_str(),
                    rfc3339(team.created_at)?,
                ],
            )
            .context("failed to insert team")?;
        Ok(inserted == 1)
    }

    /// # Errors
    /// Returns an error when the query fails or the row cannot be decoded.
    pub fn get_team(&self, team_id: TeamId) -> Result<Option<Team>> {
        self.conn
            .query_row(
                &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE team_id = ?1"),
                params![team_id.to_string()],
                RawTeamRow::from_row,
            )
            .optional()
            .context("failed to query team")?
            .map(RawTeamRow::decode)
            .transpose()
    }

    /// # Errors
    /// Returns an error when the query fails or the row cannot be decoded.
    pub fn find_team_by_join_code(&self, join_code: &JoinCode) -> Result<Option<Team>> {
        self.conn
            .query_row(
                &format!("SELECT {TEAM_COLUMNS} FROM teams WHERE join_code = ?1"),
                params![join_code.as_str()],
                RawTeamRow::from_row,
            )
            .optional()
            .context("failed to query team by join code")?
            .map(RawTeamRow::decode)
            .transpose()
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn teams_owned_by(&self, owner: &PrincipalId) -> Result<Vec<Team>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEAM_COLUMNS} FROM teams WHERE owner_id = ?1 ORDER BY name ASC, team_id ASC"
        ))?;
        let rows = stmt.query_map(params![owner.as_str()], RawTeamRow::from_row)?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row.context("failed to read team row")?.decode()?);
        }
        Ok(teams)
    }

    /// Teams where `user` holds a membership row, with that row's role.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn teams_joined_by(&self, user: &PrincipalId) -> Result<Vec<JoinedTeam>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.team_id, t.name, t.join_code, t.owner_id, t.created_at, m.role
             FROM team_members m
             JOIN teams t ON t.team_id = m.team_id
             WHERE m.user_id = ?1
             ORDER BY t.name ASC, t.team_id ASC",
        )?;
        let rows = stmt.query_map(params![user.as_str()], |row| {
            Ok((RawTeamRow::from_row(row)?, row.get::<_, String>(5)?))
        })?;
        let mut joined = Vec::new();
        for row in rows {
            let (team, role_raw) = row.context("failed to read membership team row")?;
            joined.push(JoinedTeam { team: team.decode()?, role: parse_member_role(&role_raw)? });
        }
        Ok(joined)
    }

    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_teams(&self) -> Result<Vec<Team>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TEAM_COLUMNS} FROM teams ORDER BY team_id ASC"))?;
        let rows = stmt.query_map([], RawTeamRow::from_row)?;
        let mut teams = Vec::new();
        for row in rows {
            teams.push(row.context("failed to read team row")?.decode()?);
        }
        Ok(teams)
    }

    /// Add `user` to the team as a plain member unless a row already exists.
    /// Returns whether a row was created; an existing row keeps its role.
    ///
    /// # Errors
    /// Returns an error when the insert fails, including unknown teams.
    pub fn join_team(
        &mut self,
        team_id: TeamId,
        user: &PrincipalId,
        joined_at: OffsetDateTime,
    ) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO team_members(team_id, user_id, role, joined_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(team_id, user_id) DO NOTHING",
                params![
                    team_id.to_string(),
                    user.as_str(),
                    MemberRole::Member.as_str(),
                    rfc3339(joined_at)?,
                ],
            )
            .context("failed to insert team membership")?;
        Ok(inserted == 1)
    }

    /// # Errors
    /// Returns an error when the query fails or the row cannot be decoded.
    pub fn membership(&self, team_id: TeamId, user: &PrincipalId) -> Result<Option<Membership>> {
        self.conn
            .query_row(
                "SELECT team_id, user_id, role, joined_at FROM team_members
                 WHERE team_id = ?1 AND user_id = ?2",
                params![team_id.to_string(), user.as_str()],
                RawMembershipRow::from_row,
            )
            .optional()
            .context("failed to query team membership")?
            .map(RawMembershipRow::decode)
            .transpose()
    }

    /// Membership rows for one team ordered by join time.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded.
    pub fn list_memberships(&self, team_id: TeamId) -> Result<Vec<Membership>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, user_id, role, joined_at FROM team_members
             WHERE team_id = ?1
             ORDER BY joined_at ASC, user_id ASC",
        )?;
        let rows = stmt.query_map(params![team_id.to_string()], RawMembershipRow::from_row)?;
        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row.context("failed to read membership row")?.decode()?);
        }
        Ok(memberships)
    }

    fn list_all_memberships(&self) -> Result<Vec<Membership>> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, user_id, role, joined_at FROM team_members
             ORDER BY team_id ASC, user_id ASC",
        )?;
        let rows = stmt.query_map([], RawMembershipRow::from_row)?;
        let mut memberships = Vec::new();
        for row in rows {
            memberships.push(row.context("failed to read membership row")?.decode()?);
        }
        Ok(memberships)
    }

    /// Change the role on an existing membership row. Returns `false` when no row exists.
    ///
    /// # Errors
    /// Returns an error when the update fails.
    pub fn set_member_role(
        &mut self,
        team_id: TeamId,
        user: &PrincipalId,
        role: MemberRole,
    ) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE team_members SET role = ?3 WHERE team_id = ?1 AND user_id = ?2",
                params![team_id.to_string(), user.as_str(), role.as_str()],
            )
            .context("failed to update team member role")?;
        Ok(updated == 1)
    }

    /// Export teams, memberships, and results as NDJSON files plus a digest manifest.
    ///
    /// # Errors
    /// Returns an error when export files cannot be created, written, or serialized.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let teams = self.list_teams()?;
        let memberships = self.list_all_memberships()?;
        let results = self.list_results()?;

        let mut files = Vec::new();
        for (name, digest) in [
            ("teams.ndjson", write_ndjson_file(&out_dir.join("teams.ndjson"), &teams)?),
            (
                "team_members.ndjson",
                write_ndjson_file(&out_dir.join("team_members.ndjson"), &memberships)?,
            ),
            (
                "assessment_results.ndjson",
                write_ndjson_file(&out_dir.join("assessment_results.ndjson"), &results)?,
            ),
        ] {
            files.push(ExportFileDigest {
                path: name.to_string(),
                sha256: digest.0,
                records: digest.1,
            });
        }

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files,
        };

        let manifest_path = out_dir.join("manifest.json");
        let manifest_json =
            serde_json::to_vec_pretty(&manifest).context("failed to serialize export manifest")?;
        fs::write(&manifest_path, manifest_json).with_context(|| {
            format!("failed to write export manifest {}", manifest_path.display())
        })?;

        Ok(manifest)
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

impl TeamMembershipRegistry for SqliteStore {
    fn team_owner(&self, team_id: TeamId) -> Result<Option<PrincipalId>, CoreError> {
        self.get_team(team_id)
            .map(|team| team.map(|team| team.owner_id))
            .map_err(|err| CoreError::UpstreamUnavailable(format!("{err:#}")))
    }

    fn role_of(
        &self,
        principal: &PrincipalId,
        team_id: TeamId,
    ) -> Result<Option<MemberRole>, CoreError> {
        self.membership(team_id, principal)
            .map(|membership| membership.map(|membership| membership.role))
            .map_err(|err| CoreError::UpstreamUnavailable(format!("{err:#}")))
    }
}

struct RawResultRow {
    result_id: String,
    respondent_id: String,
    team_id: Option<String>,
    created_at: String,
    answers_json: String,
    outcome_json: String,
}

impl RawResultRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            result_id: row.get(0)?,
            respondent_id: row.get(1)?,
            team_id: row.get(2)?,
            created_at: row.get(3)?,
            answers_json: row.get(4)?,
            outcome_json: row.get(5)?,
        })
    }

    fn decode(self) -> Result<ResultRecord> {
        let answers: AnswerSet = serde_json::from_str(&self.answers_json)
            .with_context(|| format!("invalid answers_json for result {}", self.result_id))?;
        let outcome: ResultFragment = serde_json::from_str(&self.outcome_json)
            .with_context(|| format!("invalid outcome_json for result {}", self.result_id))?;
        Ok(ResultRecord {
            result_id: ResultId(parse_ulid(&self.result_id)?),
            respondent_id: PrincipalId(self.respondent_id),
            team_id: self.team_id.as_deref().map(parse_team_id).transpose()?,
            created_at: parse_rfc3339(&self.created_at)?,
            answers,
            outcome,
        })
    }
}

struct RawTeamRow {
    team_id: String,
    name: String,
    join_code: String,
    owner_id: String,
    created_at: String,
}

impl RawTeamRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            team_id: row.get(0)?,
            name: row.get(1)?,
            join_code: row.get(2)?,
            owner_id: row.get(3)?,
            created_at: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Team> {
        let join_code = JoinCode::parse(&self.join_code)
            .map_err(|err| anyhow!("stored join code is invalid: {err}"))?;
        Ok(Team {
            team_id: parse_team_id(&self.team_id)?,
            name: self.name,
            join_code,
            owner_id: PrincipalId(self.owner_id),
            created_at: parse_rfc3339(&self.created_at)?,
        })
    }
}

struct RawMembershipRow {
    team_id: String,
    user_id: String,
    role: String,
    joined_at: String,
}

impl RawMembershipRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            team_id: row.get(0)?,
            user_id: row.get(1)?,
            role: row.get(2)?,
            joined_at: row.get(3)?,
        })
    }

    fn decode(self) -> Result<Membership> {
        Ok(Membership {
            team_id: parse_team_id(&self.team_id)?,
            user_id: PrincipalId(self.user_id),
            role: parse_member_role(&self.role)?,
            joined_at: parse_rfc3339(&self.joined_at)?,
        })
    }
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if table_has_column(conn, "assessment_results", "created_at_ns")? {
        return Ok((1, true));
    }

    Ok((0, false))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

fn unix_nanos(value: OffsetDateTime) -> Result<i64> {
    i64::try_from(value.unix_timestamp_nanos())
        .with_context(|| format!("timestamp out of storable range: {value}"))
}

fn parse_ulid(raw: &str) -> Result<Ulid> {
    Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))
}

fn parse_team_id(raw: &str) -> Result<TeamId> {
    Ok(TeamId(parse_ulid(raw)?))
}

fn parse_member_role(raw: &str) -> Result<MemberRole> {
    MemberRole::parse(raw).ok_or_else(|| anyhow!("unknown member role: {raw}"))
}

fn write_ndjson_file<T: Serialize>(path: &Path, values: &[T]) -> Result<(String, usize)> {
    let file = File::create(path)
        .with_context(|| format!("failed to create export file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut hasher = Sha256::new();

    for value in values {
        let line = serde_json::to_string(value).context("failed to serialize NDJSON row")?;
        writer
            .write_all(line.as_bytes())
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        writer
            .write_all(b"\n")
            .with_context(|| format!("failed to write export file {}", path.display()))?;
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }

    writer.flush().with_context(|| format!("failed to flush export file {}", path.display()))?;

    Ok((format!("{:x}", hasher.finalize()), values.len()))
}
