//! Operator CLI for Sentinel stores: memory, registrations and audit replay.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use sentinel_rs::config::{SentinelConfig, StoreProvider};
use sentinel_rs::core::{
    AllowedTypes, BoundaryManager, DriftThresholds, IncidentRecorder, MemoryController,
    PolicyGate, ReplayEngine, ReplayVerdict, open_stores,
};
use sentinel_rs::protocol::{
    Incident, LoggedIncident, MemoryType, NewMemory, RequestContext, ScopeRegistration,
    SequenceNumber,
};
use sentinel_rs::store::{IncidentLog, RecordStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Command-line options for the Sentinel CLI.
#[derive(Parser, Debug)]
#[command(name = "sentinel", version)]
#[command(about = "Inspect and audit a Sentinel guard store")]
struct Cli {
    /// Path to a sentinel.json5 file; skips layered discovery
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store directory override (forces the file provider)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective config as JSON
    Config,

    /// Register a user on a scope, or revoke the registration
    Register {
        user: String,
        scope: String,
        /// Session allowed on the scope; repeatable
        #[arg(long = "session")]
        sessions: Vec<String>,
        #[arg(long)]
        revoke: bool,
    },

    /// Run the context boundary check for a request
    Check {
        user: String,
        session: String,
        scope: String,
        intent: String,
    },

    /// Memory record commands
    #[command(subcommand)]
    Memory(MemoryCommands),

    /// List logged incidents
    Incidents,

    /// Print one incident as JSON
    Show { sequence: SequenceNumber },

    /// Replay logged decisions under the active policy
    Replay {
        /// Replay a single incident instead of the whole log
        sequence: Option<SequenceNumber>,
    },
}

#[derive(Subcommand, Debug)]
enum MemoryCommands {
    /// Append a memory record
    Add {
        /// FACT, PREFERENCE or DECISION
        #[arg(long = "type")]
        memory_type: MemoryType,
        scope: String,
        key: String,
        content: String,
        /// Restrict the record to one intent
        #[arg(long)]
        intent: Option<String>,
    },

    /// Show what would be injected for a scope and intent
    Select { scope: String, intent: String },
}

/// Stores and config resolved for one invocation.
struct Workspace {
    config: SentinelConfig,
    records: Arc<dyn RecordStore>,
    incidents: Arc<dyn IncidentLog>,
}

impl Workspace {
    fn open(config: SentinelConfig) -> Result<Self> {
        let (records, incidents) = open_stores(&config.store).context("failed to open stores")?;
        Ok(Self {
            config,
            records,
            incidents,
        })
    }

    fn boundary(&self) -> Result<BoundaryManager> {
        let boundary = BoundaryManager::new(self.records.clone());
        let seeded = boundary
            .seed(&self.config.boundary.registrations)
            .context("failed to seed registrations")?;
        debug!("seeded {} registrations from config", seeded);
        Ok(boundary)
    }

    fn memory(&self) -> Result<MemoryController> {
        let allowed = AllowedTypes::from_config(&self.config.memory)?;
        Ok(MemoryController::new(self.records.clone(), allowed))
    }

    fn recorder(&self) -> IncidentRecorder {
        IncidentRecorder::new(self.incidents.clone())
    }

    fn replay_engine(&self) -> Result<ReplayEngine> {
        let gate = PolicyGate::new(&self.config.policy)?;
        Ok(ReplayEngine::new(
            gate,
            DriftThresholds::from_config(&self.config.drift),
            self.recorder(),
        ))
    }
}

fn load_config(cli: &Cli) -> Result<SentinelConfig> {
    let mut config = if let Some(path) = cli.config.as_ref() {
        info!("loading config from path: {}", path.display());
        SentinelConfig::load_from_path(path).context("failed to load config")?
    } else {
        let cwd = std::env::current_dir().context("failed to resolve current directory")?;
        let layered = SentinelConfig::load_layered(&cwd).context("failed to load layered config")?;
        for layer in &layered.layers {
            debug!("config layer {} ({})", layer.source.label(), layer.path.display());
        }
        layered.config
    };
    if let Some(store) = cli.store.as_ref() {
        config.store.provider = StoreProvider::File;
        config.store.path = Some(store.display().to_string());
    }
    Ok(config)
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn summarize(logged: &LoggedIncident) -> String {
    match &logged.incident {
        Incident::Decision(entry) => {
            let reasons: Vec<&str> = entry.decision.reasons.iter().map(|r| r.as_str()).collect();
            format!(
                "{:>6}  decision  {:<11} scope={} intent={} drift={} reasons=[{}]",
                logged.sequence,
                entry.outcome(),
                entry.context.scope,
                entry.context.intent,
                entry.drift.status,
                reasons.join(",")
            )
        }
        Incident::ReplayMismatch(mismatch) => format!(
            "{:>6}  mismatch  source={} logged={} replayed={} policy={}->{}",
            logged.sequence,
            mismatch.source_sequence,
            mismatch.logged_outcome,
            mismatch.replayed_outcome,
            mismatch.logged_policy_version,
            mismatch.active_policy_version
        ),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    if matches!(cli.command, Commands::Config) {
        print_json(&config)?;
        return Ok(ExitCode::SUCCESS);
    }
    let workspace = Workspace::open(config)?;
    match cli.command {
        // printed before the stores are opened
        Commands::Config => {}
        Commands::Register {
            user,
            scope,
            sessions,
            revoke,
        } => {
            let registration = if revoke {
                ScopeRegistration::revoked(user, scope)
            } else {
                ScopeRegistration::active(user, scope, sessions)
            };
            workspace.boundary()?.register(registration.clone())?;
            print_json(&registration)?;
        }
        Commands::Check {
            user,
            session,
            scope,
            intent,
        } => {
            let ctx = RequestContext::new(user, session, scope, intent);
            let result = workspace.boundary()?.evaluate(&ctx)?;
            print_json(&result)?;
            if !result.accepted {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Memory(MemoryCommands::Add {
            memory_type,
            scope,
            key,
            content,
            intent,
        }) => {
            let mut draft = NewMemory::new(memory_type, scope, key, content);
            if let Some(intent) = intent {
                draft = draft.with_intent(intent);
            }
            print_json(&workspace.memory()?.store(draft)?)?;
        }
        Commands::Memory(MemoryCommands::Select { scope, intent }) => {
            let memory = workspace.memory()?;
            let selection = memory.select(&scope, &intent, memory.allowed_types(&scope))?;
            print_json(&selection)?;
        }
        Commands::Incidents => {
            for logged in workspace.recorder().incidents()? {
                println!("{}", summarize(&logged));
            }
        }
        Commands::Show { sequence } => print_json(&workspace.recorder().incident(sequence)?)?,
        Commands::Replay { sequence: Some(sequence) } => {
            match workspace.replay_engine()?.verify_sequence(sequence)? {
                ReplayVerdict::Match(decision) => print_json(&decision)?,
                ReplayVerdict::Mismatch { mismatch, .. } => {
                    print_json(&mismatch)?;
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Commands::Replay { sequence: None } => {
            let report = workspace.replay_engine()?.audit()?;
            print_json(&report)?;
            if !report.is_clean() {
                return Ok(ExitCode::FAILURE);
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    sentinel_rs::init_logging();
    run(Cli::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("sentinel").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn memory_type_is_parsed_case_insensitively() {
        let cli = parse(&["memory", "add", "--type", "preference", "billing", "tone", "formal"]);
        match cli.command {
            Commands::Memory(MemoryCommands::Add { memory_type, .. }) => {
                assert_eq!(memory_type, MemoryType::Preference)
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(
            Cli::try_parse_from(["sentinel", "memory", "add", "--type", "opinion", "a", "b", "c"])
                .is_err()
        );
    }

    #[test]
    fn store_override_forces_file_provider() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("sentinel.json5");
        std::fs::write(&config_path, "{ store: { provider: \"memory\" } }").expect("write");
        let store = temp.path().join("store");
        let cli = parse(&[
            "--config",
            config_path.to_str().expect("utf8"),
            "--store",
            store.to_str().expect("utf8"),
            "incidents",
        ]);
        let config = load_config(&cli).expect("config");
        assert_eq!(config.store.provider, StoreProvider::File);
        assert_eq!(config.store.path, Some(store.display().to_string()));
    }

    #[test]
    fn register_then_check_against_file_store() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("sentinel.json5");
        std::fs::write(&config_path, "{}").expect("write");
        let config = config_path.to_str().expect("utf8").to_string();
        let store = temp.path().join("store").to_str().expect("utf8").to_string();
        let base = ["--config", config.as_str(), "--store", store.as_str()];

        let mut register = base.to_vec();
        register.extend(["register", "u1", "billing", "--session", "s1"]);
        assert_eq!(run(parse(&register)).expect("register"), ExitCode::SUCCESS);

        let mut accepted = base.to_vec();
        accepted.extend(["check", "u1", "s1", "billing", "refunds"]);
        assert_eq!(run(parse(&accepted)).expect("check"), ExitCode::SUCCESS);

        let mut rejected = base.to_vec();
        rejected.extend(["check", "u1", "s2", "billing", "refunds"]);
        assert_eq!(run(parse(&rejected)).expect("check"), ExitCode::from(2));
    }

    #[test]
    fn replay_of_empty_log_is_clean() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("sentinel.json5");
        std::fs::write(&config_path, "{}").expect("write");
        let store = temp.path().join("store");
        let cli = parse(&[
            "--config",
            config_path.to_str().expect("utf8"),
            "--store",
            store.to_str().expect("utf8"),
            "replay",
        ]);
        assert_eq!(run(cli).expect("replay"), ExitCode::SUCCESS);
    }
}
