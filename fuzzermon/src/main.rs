use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fuzzermon_sqlite::{Arch, Batch, BatchReport, Db, Entity, NewBatch, NewTestFailure, NewTestFailureState, TestFailure, TestFailureState};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

mod config;

const DEFAULT_DB: &str = "fuzzermon.sqlite3";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum EntityArg { User, Arch, Host, Batch, Opcode, Success, Failure, State }

impl From<EntityArg> for Entity {
    fn from(e: EntityArg) -> Self {
        match e {
            EntityArg::User => Entity::User,
            EntityArg::Arch => Entity::Arch,
            EntityArg::Host => Entity::Host,
            EntityArg::Batch => Entity::Batch,
            EntityArg::Opcode => Entity::Opcode,
            EntityArg::Success => Entity::TestSuccess,
            EntityArg::Failure => Entity::TestFailure,
            EntityArg::State => Entity::TestFailureState,
        }
    }
}

#[derive(Debug, Subcommand)]
enum CreateCmd {
    /// Register a submitter
    User { username: String },
    /// Register an instruction-set architecture
    Arch { name: String },
    /// Register a testing host for an arch (by arch name)
    Host {
        hostname: String,
        #[arg(long)]
        arch: String,
    },
    /// Register an opcode for an arch (by arch name)
    Opcode {
        name: String,
        #[arg(long)]
        arch: String,
    },
    /// Open a batch; the submission time is assigned by the store
    Batch {
        /// Machine that generated the fuzz inputs
        #[arg(long)]
        fuzzer_host: String,
        /// Registered hostname that executed them
        #[arg(long)]
        testing_host: String,
        /// Registered username of the submitter
        #[arg(long)]
        user: String,
    },
    /// Record a success count for an opcode in a batch
    Success {
        #[arg(long)]
        batch: i64,
        #[arg(long)]
        opcode: i64,
        #[arg(long)]
        count: i32,
    },
    /// Record a failing test case
    Failure {
        #[arg(long)]
        batch: i64,
        #[arg(long)]
        opcode: i64,
        #[arg(long)]
        pretty: String,
        /// Serialized instruction operands
        #[arg(long)]
        arguments: String,
    },
    /// Record one diverging location of a failing test case
    State {
        #[arg(long)]
        failure: i64,
        #[arg(long)]
        location: String,
        #[arg(long)]
        expected: String,
        #[arg(long)]
        actual: String,
    },
}

#[derive(Debug, Subcommand)]
enum ShowCmd {
    /// A batch with its successes, failures and failure states
    Batch { id: i64 },
    /// All batches, newest first
    Batches,
}

#[derive(Debug, Parser)]
#[command(name = "fuzzermon", version, about = "Opcode fuzzing results store")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./fuzzermon.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQLite database file. Default: fuzzermon.sqlite3
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[arg(long, global = true, value_enum)]
    format: Option<OutputFormat>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Create the database or bring its schema up to date
    Init,
    /// Insert one row
    Create {
        #[command(subcommand)]
        cmd: CreateCmd,
    },
    /// Print stored rows
    Show {
        #[command(subcommand)]
        cmd: ShowCmd,
    },
    /// Delete a row and everything that depends on it
    Delete {
        #[arg(value_enum)]
        entity: EntityArg,
        id: i64,
    },
    /// Record batch report files (JSON), one transaction per file
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Settings {
    db_path: PathBuf,
    busy_timeout: Duration,
    format: OutputFormat,
}

/// Flags win over the config file, which wins over built-in defaults.
fn resolve(cli: &Cli, cfg: Option<&config::Config>) -> Settings {
    let db_cfg = cfg.and_then(|c| c.database.clone()).unwrap_or_default();
    let cfg_format = cfg.and_then(|c| c.format.as_deref()).map(|f| match f {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Text,
    });
    Settings {
        db_path: cli.db.clone().or(db_cfg.path).unwrap_or_else(|| PathBuf::from(DEFAULT_DB)),
        busy_timeout: Duration::from_millis(db_cfg.busy_timeout_ms.unwrap_or(DEFAULT_BUSY_TIMEOUT_MS)),
        format: cli.format.or(cfg_format).unwrap_or(OutputFormat::Text),
    }
}

fn open(settings: &Settings) -> Result<Db> {
    let db = Db::open_or_create(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db.set_busy_timeout(settings.busy_timeout)?;
    Ok(db)
}

fn emit<T: Serialize>(out: &mut dyn Write, format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    match format {
        OutputFormat::Text => writeln!(out, "{}", text())?,
        OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(value)?)?,
    }
    Ok(())
}

fn timestamp(batch: &Batch) -> String {
    batch.submitted_at.format(&Rfc3339).unwrap_or_else(|_| String::new())
}

#[derive(Serialize)]
struct FailureView {
    #[serde(flatten)]
    failure: TestFailure,
    states: Vec<TestFailureState>,
}

fn create(db: &Db, cmd: CreateCmd, out: &mut dyn Write, format: OutputFormat) -> Result<()> {
    let arch_named = |name: &str| -> Result<Arch> {
        db.find_arch(name)?.ok_or_else(|| anyhow!("unknown arch {name}"))
    };
    match cmd {
        CreateCmd::User { username } => {
            let u = db.create_user(&username)?;
            emit(out, format, &u, || format!("user {} {}", u.id, u.username))
        }
        CreateCmd::Arch { name } => {
            let a = db.create_arch(&name)?;
            emit(out, format, &a, || format!("arch {} {}", a.id, a.name))
        }
        CreateCmd::Host { hostname, arch } => {
            let arch = arch_named(&arch)?;
            let h = db.create_host(&hostname, arch.id)?;
            emit(out, format, &h, || format!("host {} {} ({})", h.id, h.hostname, arch.name))
        }
        CreateCmd::Opcode { name, arch } => {
            let arch = arch_named(&arch)?;
            let o = db.create_opcode(&name, arch.id)?;
            emit(out, format, &o, || format!("opcode {} {} ({})", o.id, o.name, arch.name))
        }
        CreateCmd::Batch { fuzzer_host, testing_host, user } => {
            let host = db.find_host(&testing_host)?.ok_or_else(|| anyhow!("unknown host {testing_host}"))?;
            let user = db.find_user(&user)?.ok_or_else(|| anyhow!("unknown user {user}"))?;
            let b = db.create_batch(&NewBatch { fuzzer_host, testing_host_id: host.id, user_id: user.id })?;
            emit(out, format, &b, || format!("batch {} submitted_at {}", b.id, timestamp(&b)))
        }
        CreateCmd::Success { batch, opcode, count } => {
            let s = db.add_test_success(batch, opcode, count)?;
            emit(out, format, &s, || format!("success {} batch {} opcode {} count {}", s.id, s.batch_id, s.opcode_id, s.count))
        }
        CreateCmd::Failure { batch, opcode, pretty, arguments } => {
            let f = db.add_test_failure(&NewTestFailure { batch_id: batch, opcode_id: opcode, pretty, arguments })?;
            emit(out, format, &f, || format!("failure {} batch {} opcode {}: {}", f.id, f.batch_id, f.opcode_id, f.pretty))
        }
        CreateCmd::State { failure, location, expected, actual } => {
            let s = db.add_test_failure_state(&NewTestFailureState {
                test_failure_id: failure,
                location,
                expected_value: expected,
                actual_value: actual,
            })?;
            emit(out, format, &s, || format!("state {} failure {} {}: expected {} actual {}", s.id, s.test_failure_id, s.location, s.expected_value, s.actual_value))
        }
    }
}

fn show(db: &Db, cmd: ShowCmd, out: &mut dyn Write, format: OutputFormat) -> Result<()> {
    match cmd {
        ShowCmd::Batches => {
            let batches = db.list_batches()?;
            emit(out, format, &batches, || {
                batches
                    .iter()
                    .map(|b| format!("{}\t{}\t{}", b.id, timestamp(b), b.fuzzer_host))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        ShowCmd::Batch { id } => {
            let batch = db.get_batch(id)?;
            let host = db.get_host(batch.testing_host_id)?;
            let user = db.get_user(batch.user_id)?;
            let successes = db.successes_for_batch(id)?;
            let failures = db
                .failures_for_batch(id)?
                .into_iter()
                .map(|failure| -> Result<FailureView> {
                    Ok(FailureView { states: db.states_for_failure(failure.id)?, failure })
                })
                .collect::<Result<Vec<_>>>()?;
            let obj = serde_json::json!({
                "batch": batch,
                "testing_host": host,
                "user": user,
                "successes": successes,
                "failures": failures,
            });
            emit(out, format, &obj, || {
                let mut lines = vec![format!(
                    "batch {} by {} at {}: fuzzer {} -> {}",
                    batch.id, user.username, timestamp(&batch), batch.fuzzer_host, host.hostname
                )];
                for s in &successes {
                    lines.push(format!("  ok   opcode {} x{}", s.opcode_id, s.count));
                }
                for f in &failures {
                    lines.push(format!("  FAIL opcode {} {} {}", f.failure.opcode_id, f.failure.pretty, f.failure.arguments));
                    for st in &f.states {
                        lines.push(format!("       {}: expected {} actual {}", st.location, st.expected_value, st.actual_value));
                    }
                }
                lines.join("\n")
            })
        }
    }
}

fn run(cli: Cli, out: &mut dyn Write) -> Result<()> {
    let loaded_cfg = config::load_config(cli.config.as_deref());
    let settings = resolve(&cli, loaded_cfg.as_ref());
    let format = settings.format;
    match cli.command {
        Commands::Version => {
            writeln!(out, "fuzzermon {} (core {})", env!("CARGO_PKG_VERSION"), fuzzermon_core::version())?;
        }
        Commands::Init => {
            let db = open(&settings)?;
            let obj = serde_json::json!({ "db": settings.db_path, "schema_version": db.schema_version()? });
            emit(out, format, &obj, || format!("{}: schema version {}", settings.db_path.display(), obj["schema_version"]))?;
        }
        Commands::Create { cmd } => create(&open(&settings)?, cmd, out, format)?,
        Commands::Show { cmd } => show(&open(&settings)?, cmd, out, format)?,
        Commands::Delete { entity, id } => {
            let entity = Entity::from(entity);
            let deleted = open(&settings)?.delete(entity, id)?;
            if !deleted {
                return Err(anyhow!("{entity} {id} not found"));
            }
            let obj = serde_json::json!({ "entity": entity, "id": id, "deleted": deleted });
            emit(out, format, &obj, || format!("deleted {entity} {id}"))?;
        }
        Commands::Ingest { files } => {
            let db = open(&settings)?;
            for path in files {
                let s = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
                let report = BatchReport::from_json(&s).with_context(|| format!("parsing {}", path.display()))?;
                let summary = db.record_batch(&report).with_context(|| format!("recording {}", path.display()))?;
                emit(out, format, &summary, || {
                    format!(
                        "{}: batch {} ({} successes, {} failures, {} states)",
                        path.display(), summary.batch_id, summary.successes, summary.failures, summary.states
                    )
                })?;
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    let cli = Cli::parse();
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}
