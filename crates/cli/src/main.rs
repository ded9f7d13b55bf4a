use crate::{
    commands::{Commands, JobCommand, ProcessConfigCommand},
    error::CliError,
};
use clap::Parser;
use engine_config::process::persist::ProcessConfigurationPersistService;
use engine_core::repository::{PersistRepository, sled_repo::SledRepository};
use model::job::{JobDataNodeLine, MigrationJobId, PipelineJobId, parse_job_type};
use std::{path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;

#[derive(Parser)]
#[command(name = "pipeline", version = "0.1.0", about = "Data pipeline job administration")]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "State directory, defaults to ~/.pipeline/state"
    )]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ProcessConfig { command } => {
            let repository = open_state_store(cli.state_dir)?;
            let text = run_process_config(repository, command).await?;
            if let Some(text) = text {
                println!("{text}");
            }
        }
        Commands::Job { command } => println!("{}", run_job(command)?),
    }

    Ok(())
}

fn open_state_store(state_dir: Option<PathBuf>) -> Result<Arc<dyn PersistRepository>, CliError> {
    let path = match state_dir {
        Some(path) => path,
        None => dirs::home_dir()
            .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?
            .join(".pipeline/state"),
    };
    let store = SledRepository::open(&path).map_err(|source| CliError::StateStore {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Arc::new(store))
}

/// Runs a process-config command; returns the text to print, if any.
async fn run_process_config(
    repository: Arc<dyn PersistRepository>,
    command: ProcessConfigCommand,
) -> Result<Option<String>, CliError> {
    let service = ProcessConfigurationPersistService::new(repository);

    match command {
        ProcessConfigCommand::Show { job_type, json } => {
            let config = service.load(job_type).await?;
            Ok(Some(output::render_process_config(&config, json)?))
        }
        ProcessConfigCommand::Set { job_type, file } => {
            let partial = tokio::fs::read_to_string(&file).await?;
            let merged = service.update(job_type, &partial).await?;
            info!(job_type = %job_type, file, "Process configuration updated");
            Ok(Some(output::render_process_config(&merged, false)?))
        }
        ProcessConfigCommand::Reset { job_type } => {
            service.reset(job_type).await?;
            Ok(None)
        }
    }
}

fn run_job(command: JobCommand) -> Result<String, CliError> {
    match command {
        JobCommand::Type { job_id } => Ok(parse_job_type(&job_id)?.to_string()),
        JobCommand::Id { lines, database } => {
            let lines = lines
                .iter()
                .map(|line| line.parse::<JobDataNodeLine>())
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MigrationJobId::new(lines, database).marshal().to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::repository::memory::MemoryClusterRepository;
    use model::job::JobType;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_merges_and_reset_restores_defaults() {
        let repository: Arc<dyn PersistRepository> = Arc::new(MemoryClusterRepository::new());
        let dir = tempdir().unwrap();
        let file = dir.path().join("partial.yaml");
        std::fs::write(&file, "read:\n  shardingSize: 500\n").unwrap();

        let shown = run_process_config(
            repository.clone(),
            ProcessConfigCommand::Set {
                job_type: JobType::Migration,
                file: file.display().to_string(),
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert!(shown.contains("shardingSize: 500"));
        assert!(shown.contains("batchSize: 1000"));

        run_process_config(
            repository.clone(),
            ProcessConfigCommand::Reset {
                job_type: JobType::Migration,
            },
        )
        .await
        .unwrap();

        let json = run_process_config(
            repository,
            ProcessConfigCommand::Show {
                job_type: JobType::Migration,
                json: true,
            },
        )
        .await
        .unwrap()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["read"]["shardingSize"], 10_000_000);
    }

    #[tokio::test]
    async fn state_dir_persists_between_opens() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("partial.yaml");
        std::fs::write(&file, "write:\n  concurrency: 4\n").unwrap();
        let state = dir.path().join("state");

        {
            let repository = open_state_store(Some(state.clone())).unwrap();
            run_process_config(
                repository,
                ProcessConfigCommand::Set {
                    job_type: JobType::Cdc,
                    file: file.display().to_string(),
                },
            )
            .await
            .unwrap();
        }

        let repository = open_state_store(Some(state)).unwrap();
        let shown = run_process_config(
            repository,
            ProcessConfigCommand::Show {
                job_type: JobType::Cdc,
                json: false,
            },
        )
        .await
        .unwrap()
        .unwrap();
        assert!(shown.contains("concurrency: 4"));
    }

    #[test]
    fn job_id_round_trips_through_type() {
        let id = run_job(JobCommand::Id {
            lines: vec!["t_order:ds_0.t_order_0".into()],
            database: "sharding_db".into(),
        })
        .unwrap();

        assert!(id.starts_with("j0102"));
        assert_eq!(run_job(JobCommand::Type { job_id: id }).unwrap(), "MIGRATION");
        assert!(matches!(
            run_job(JobCommand::Type { job_id: "j9902abc".into() }),
            Err(CliError::JobId(_))
        ));
        assert!(matches!(
            run_job(JobCommand::Id {
                lines: vec!["".into()],
                database: "db".into(),
            }),
            Err(CliError::DataNode(_))
        ));
    }

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from([
            "pipeline",
            "--state-dir",
            "/tmp/state",
            "process-config",
            "show",
            "--job-type",
            "cdc",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(matches!(
            cli.command,
            Commands::ProcessConfig {
                command: ProcessConfigCommand::Show {
                    job_type: JobType::Cdc,
                    json: true
                }
            }
        ));
    }
}
