use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Args;
use serde_json::Value;
use tracing::info;

use taskgrid_core::config::OrchestratorConfig;
use taskgrid_core::domain::{Language, Program, Version, VersionFile, VersionStatus};
use taskgrid_core::external::file_store::{FileStore, InMemoryFileStore};
use taskgrid_core::external::repository::{InMemoryExecutionRepository, InMemoryProgramRepository, InMemoryVersionRepository};
use taskgrid_core::program::{ExecuteOptions, ProgramExecutionEngine};
use taskgrid_core::queue::TaskQueue;
use taskgrid_core::runner::RunnerRegistry;
use taskgrid_core::streaming::{HubPayload, StreamingHub};

#[derive(Args)]
pub struct RunProgramArgs {
    /// Path to the program's single entry source file.
    #[arg(long)]
    file: PathBuf,

    /// Language the file is written in.
    #[arg(long, value_enum)]
    language: LanguageArg,

    /// JSON object of parameters passed to the program.
    #[arg(long, default_value = "{}")]
    params: String,

    /// Identity recorded as the execution's user.
    #[arg(long, default_value = "cli")]
    user: String,
}

#[derive(Copy, Clone, clap::ValueEnum)]
enum LanguageArg {
    Python,
    Csharp,
    Java,
    Nodejs,
}

impl From<LanguageArg> for Language {
    fn from(value: LanguageArg) -> Self {
        match value {
            LanguageArg::Python => Language::Python,
            LanguageArg::Csharp => Language::Csharp,
            LanguageArg::Java => Language::Java,
            LanguageArg::Nodejs => Language::Nodejs,
        }
    }
}

fn entry_file_name(language: Language) -> &'static str {
    match language {
        Language::Python => "main.py",
        Language::Nodejs => "main.js",
        Language::Java => "Main.java",
        Language::Csharp => "Program.cs",
    }
}

pub async fn run(config: OrchestratorConfig, args: RunProgramArgs) -> Result<()> {
    let language: Language = args.language.into();
    let parameters: Value = serde_json::from_str(&args.params)?;
    let source = std::fs::read(&args.file)?;

    let file_store = Arc::new(InMemoryFileStore::new());
    let program_repo = Arc::new(InMemoryProgramRepository::new());
    let version_repo = Arc::new(InMemoryVersionRepository::new());
    let execution_repo = Arc::new(InMemoryExecutionRepository::new());
    let runners = Arc::new(RunnerRegistry::with_defaults());
    let hub = Arc::new(StreamingHub::new());
    let (queue, worker) = TaskQueue::new(config.concurrency.queue_depth);
    let worker_handle = tokio::spawn(worker.run());

    let program = Program::new(args.file.display().to_string(), language, "none");
    let entry = entry_file_name(language);
    let version_id = taskgrid_core::ids::VersionId::new();
    let storage_key = file_store.put(program.id, version_id, entry, source.clone(), "text/plain").await?;

    let mut version = Version::new(
        program.id,
        1,
        vec![VersionFile {
            path: entry.to_string(),
            storage_key,
            hash: String::new(),
            size: source.len() as u64,
            file_type: "text/plain".into(),
        }],
    );
    version.id = version_id;
    version.status = VersionStatus::Approved;

    program_repo.put(program.clone(), None).await?;
    version_repo.put(version.clone(), None).await?;

    let engine = ProgramExecutionEngine::new(
        config,
        file_store,
        program_repo,
        version_repo,
        execution_repo,
        runners,
        Arc::clone(&hub),
        Arc::clone(&queue),
    );

    let eid = engine.execute(program.id, version_id, args.user, parameters, ExecuteOptions::default()).await?;
    info!(%eid, "dispatched program execution");

    let mut sub = hub.join(eid).await;
    loop {
        match sub.recv().await {
            Some(event) => match event.payload {
                HubPayload::Stdout(line) => println!("{line}"),
                HubPayload::Stderr(line) => eprintln!("{line}"),
                HubPayload::Error(err) => eprintln!("error: {err}"),
                HubPayload::Completed { exit_code, .. } => {
                    let execution = engine.result(eid).await?;
                    println!("---");
                    println!("exit_code: {exit_code}");
                    println!("output: {}", execution.results.output);
                    if exit_code != 0 {
                        queue.shutdown();
                        worker_handle.await?;
                        bail!("program exited with code {exit_code}");
                    }
                    break;
                }
                HubPayload::Status(s) if s == "cancelled" => bail!("execution was cancelled"),
                _ => continue,
            },
            None => bail!("execution stream ended without a terminal event"),
        }
    }

    queue.shutdown();
    worker_handle.await?;
    Ok(())
}
