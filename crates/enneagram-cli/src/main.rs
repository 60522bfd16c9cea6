use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use enneagram_api::{
    CreateTeamRequest, EnneagramApi, JoinTeamRequest, QuestionnaireFile, SetMemberRoleRequest,
    SubmitRequest,
};
use enneagram_core::{
    AnswerSet, CoreError, MemberRole, PrincipalId, Questionnaire, Scope, TeamId,
};
use enneagram_store_sqlite::SqliteStore;
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use ulid::Ulid;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "eg")]
#[command(about = "Enneagram assessment CLI")]
struct Cli {
    #[arg(long, default_value = "./enneagram.sqlite3")]
    db: PathBuf,

    /// YAML questionnaire definition; the built-in questionnaire is used when omitted.
    #[arg(long)]
    questionnaire: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Questionnaire {
        #[command(subcommand)]
        command: QuestionnaireCommand,
    },
    Result {
        #[command(subcommand)]
        command: ResultCommand,
    },
    Team {
        #[command(subcommand)]
        command: TeamCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Export(DbOutArgs),
    Backup(DbOutArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbOutArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum QuestionnaireCommand {
    Show,
}

#[derive(Debug, Args)]
struct PrincipalArgs {
    /// Already-authenticated principal id of the caller.
    #[arg(long)]
    principal: String,
}

#[derive(Debug, Subcommand)]
enum ResultCommand {
    Submit(SubmitArgs),
    Latest(LatestArgs),
    Show(ShowArgs),
}

#[derive(Debug, Args)]
struct SubmitArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    /// One answer as `ITEM_ID=VALUE`; repeat for every item.
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<(u32, u8)>,
    #[arg(long)]
    team_id: Option<String>,
}

#[derive(Debug, Args)]
struct LatestArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    team_id: Option<String>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    respondent: String,
    #[arg(long)]
    team_id: Option<String>,
}

#[derive(Debug, Subcommand)]
enum TeamCommand {
    Create(TeamCreateArgs),
    Join(TeamJoinArgs),
    List(PrincipalArgs),
    Members(TeamScopedArgs),
    Results(TeamScopedArgs),
    SetRole(TeamSetRoleArgs),
}

#[derive(Debug, Args)]
struct TeamCreateArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Args)]
struct TeamJoinArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    code: String,
}

#[derive(Debug, Args)]
struct TeamScopedArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    team_id: String,
}

#[derive(Debug, Args)]
struct TeamSetRoleArgs {
    #[command(flatten)]
    principal: PrincipalArgs,
    #[arg(long)]
    team_id: String,
    #[arg(long)]
    user: String,
    #[arg(long)]
    role: RoleArg,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Manager,
    Member,
}

impl RoleArg {
    fn into_member_role(self) -> MemberRole {
        match self {
            Self::Manager => MemberRole::Manager,
            Self::Member => MemberRole::Member,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn emit<T: Serialize>(value: &T, what: &str) -> Result<()> {
    emit_json(serde_json::to_value(value).with_context(|| format!("failed to serialize {what}"))?)
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Db { command } => run_db(command, cli.db),
        Command::Questionnaire { command } => {
            let questionnaire = load_questionnaire(cli.questionnaire.as_deref())?;
            run_questionnaire(&command, &questionnaire)
        }
        Command::Result { command } => {
            let api = build_api(cli.db, cli.questionnaire.as_deref())?;
            run_result(command, &api)
        }
        Command::Team { command } => {
            let api = build_api(cli.db, cli.questionnaire.as_deref())?;
            run_team(command, &api)
        }
    };
    result.map_err(conceal_denial)
}

/// Denied reads surface as the same generic message as missing data.
fn conceal_denial(err: anyhow::Error) -> anyhow::Error {
    if matches!(err.downcast_ref::<CoreError>(), Some(CoreError::AccessDenied)) {
        tracing::debug!("access denied; reporting not found");
        return anyhow!("not found");
    }
    err
}

fn load_questionnaire(path: Option<&Path>) -> Result<Questionnaire> {
    match path {
        Some(path) => QuestionnaireFile::from_file(path),
        None => Ok(Questionnaire::builtin()?),
    }
}

fn build_api(db: PathBuf, questionnaire: Option<&Path>) -> Result<EnneagramApi> {
    Ok(EnneagramApi::with_questionnaire(db, load_questionnaire(questionnaire)?))
}

fn run_db(command: DbCommand, db: PathBuf) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = EnneagramApi::new(db)?.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_unversioned": status.inferred_from_unversioned
            }))
        }
        DbCommand::Migrate(args) => {
            let result = EnneagramApi::new(db)?.migrate(args.dry_run)?;
            emit(&result, "migration result")
        }
        DbCommand::Export(args) => {
            let store = open_migrated_store(&db)?;
            let manifest = store.export_snapshot(&args.out)?;
            emit_json(serde_json::json!({
                "out": args.out.display().to_string(),
                "manifest": manifest
            }))
        }
        DbCommand::Backup(args) => {
            let store = open_migrated_store(&db)?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({ "backup": args.out.display().to_string() }))
        }
        DbCommand::IntegrityCheck => {
            let report = open_migrated_store(&db)?.integrity_check()?;
            emit(&report, "integrity report")
        }
    }
}

fn open_migrated_store(db: &Path) -> Result<SqliteStore> {
    let mut store = SqliteStore::open(db)?;
    store.migrate()?;
    Ok(store)
}

fn run_questionnaire(command: &QuestionnaireCommand, questionnaire: &Questionnaire) -> Result<()> {
    match command {
        QuestionnaireCommand::Show => {
            emit(&QuestionnaireFile::from(questionnaire), "questionnaire")
        }
    }
}

fn run_result(command: ResultCommand, api: &EnneagramApi) -> Result<()> {
    match command {
        ResultCommand::Submit(args) => {
            let principal = parse_principal(&args.principal.principal)?;
            let mut answers = AnswerSet::new();
            for (item_id, value) in args.answers {
                answers.insert(item_id, value)?;
            }
            let team_id = args.team_id.as_deref().map(parse_team_id).transpose()?;
            let record = api.submit(&principal, SubmitRequest { answers, team_id })?;
            emit(&record, "result")
        }
        ResultCommand::Latest(args) => {
            let principal = parse_principal(&args.principal.principal)?;
            let scope = parse_scope(args.team_id.as_deref())?;
            let latest = api.my_latest(&principal, scope)?;
            emit_json(serde_json::json!({ "result": latest }))
        }
        ResultCommand::Show(args) => {
            let requester = parse_principal(&args.principal.principal)?;
            let respondent = parse_principal(&args.respondent)?;
            let scope = parse_scope(args.team_id.as_deref())?;
            let record = api.view_result(&requester, &respondent, scope)?;
            emit(&record, "result")
        }
    }
}

fn run_team(command: TeamCommand, api: &EnneagramApi) -> Result<()> {
    match command {
        TeamCommand::Create(args) => {
            let owner = parse_principal(&args.principal.principal)?;
            let team = api.create_team(&owner, CreateTeamRequest { name: args.name })?;
            emit(&team, "team")
        }
        TeamCommand::Join(args) => {
            let principal = parse_principal(&args.principal.principal)?;
            let joined = api.join_team(&principal, JoinTeamRequest { join_code: args.code })?;
            emit(&joined, "join result")
        }
        TeamCommand::List(args) => {
            let principal = parse_principal(&args.principal)?;
            let teams = api.list_my_teams(&principal)?;
            emit_json(serde_json::json!({ "teams": teams }))
        }
        TeamCommand::Members(args) => {
            let requester = parse_principal(&args.principal.principal)?;
            let view = api.team_members(&requester, parse_team_id(&args.team_id)?)?;
            emit(&view, "team members")
        }
        TeamCommand::Results(args) => {
            let requester = parse_principal(&args.principal.principal)?;
            let view = api.team_results(&requester, parse_team_id(&args.team_id)?)?;
            emit(&view, "team results")
        }
        TeamCommand::SetRole(args) => {
            let requester = parse_principal(&args.principal.principal)?;
            let user = parse_principal(&args.user)?;
            let member = api.set_member_role(
                &requester,
                parse_team_id(&args.team_id)?,
                &user,
                SetMemberRoleRequest { role: args.role.into_member_role() },
            )?;
            emit(&member, "team member")
        }
    }
}

fn parse_answer(raw: &str) -> std::result::Result<(u32, u8), String> {
    let Some((item, value)) = raw.split_once('=') else {
        return Err(format!("expected ITEM_ID=VALUE, got `{raw}`"));
    };
    let item =
        item.trim().parse::<u32>().map_err(|err| format!("invalid item id `{item}`: {err}"))?;
    let value =
        value.trim().parse::<u8>().map_err(|err| format!("invalid answer value `{value}`: {err}"))?;
    Ok((item, value))
}

fn parse_principal(raw: &str) -> Result<PrincipalId> {
    Ok(PrincipalId::parse(raw)?)
}

fn parse_team_id(raw: &str) -> Result<TeamId> {
    let parsed = Ulid::from_string(raw).with_context(|| format!("invalid ULID: {raw}"))?;
    Ok(TeamId(parsed))
}

fn parse_scope(team_id: Option<&str>) -> Result<Scope> {
    Ok(Scope::from_team(team_id.map(parse_team_id).transpose()?))
}
