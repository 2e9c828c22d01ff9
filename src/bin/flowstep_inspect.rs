use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use flowstep::{
    import_archive, init_logging, ArchiveEnvelope, LogExt, LoggingConfig, Project, RuntimeConfig,
    RuntimeStateMachine,
};

/// flowstep-inspect - read snapshot archives written by a Flowstep session
#[derive(Parser)]
#[command(name = "flowstep-inspect")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize an archive
    Show {
        /// Path to the archive
        archive: PathBuf,

        /// Print the whole envelope as JSON
        #[arg(long)]
        json: bool,

        /// Number of trailing log items to print
        #[arg(long, default_value_t = 10)]
        logs: usize,
    },

    /// Restore an archive against a project and report unresolved entries
    Verify {
        /// Path to the archive
        archive: PathBuf,

        /// Path to the project (JSON)
        #[arg(long)]
        project: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let logging = LoggingConfig {
        enable_json_logging: cli.json_logs,
        ..LoggingConfig::quiet()
    };
    init_logging(&logging)?;

    match cli.command {
        Commands::Show { archive, json, logs } => {
            let envelope = read_archive(&archive)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&envelope)?);
            } else {
                print_summary(&envelope, logs);
            }
        }
        Commands::Verify { archive, project } => {
            let envelope = read_archive(&archive)?;
            let json = std::fs::read_to_string(&project)
                .with_context(|| format!("Failed to read project {}", project.display()))?;
            let project = Project::from_json(&json).context("Invalid project")?;

            let mut machine = RuntimeStateMachine::new(Arc::new(project), RuntimeConfig::default());
            let report = machine.restore(&envelope.record);

            println!(
                "restored {} flow states, {} tasks, {} log items",
                report.flow_states, report.tasks, report.log_items
            );
            if report.is_complete() {
                println!("archive matches project");
            } else {
                for entry in &report.skipped {
                    println!("skipped: {}", entry);
                }
                anyhow::bail!("{} entries did not resolve", report.skipped.len());
            }
        }
    }

    Ok(())
}

fn read_archive(path: &Path) -> Result<ArchiveEnvelope> {
    import_archive(path)
        .log_err("Failed to import archive")
        .with_context(|| format!("Failed to read archive {}", path.display()))
}

fn print_summary(envelope: &ArchiveEnvelope, tail: usize) {
    let record = &envelope.record;

    println!("format:       {} v{}", envelope.format, envelope.version);
    println!("created:      {}", envelope.created_at.to_rfc3339());
    println!("state:        {}", record.state);
    println!("debugger:     {}", if record.debugger_active { "active" } else { "inactive" });
    if let Some(error) = &record.error {
        println!("error:        {}", error);
    }
    println!("flow states:  {}", record.flow_state_count());
    println!("queued tasks: {}", record.queue.len());
    println!("log items:    {}", record.logs.len());

    for task in &record.queue {
        println!("  task {} {} in {}", task.id, task.component, task.flow_state);
    }

    let skip = record.logs.len().saturating_sub(tail);
    for item in record.logs.iter().skip(skip) {
        println!(
            "  [{}] {} {}",
            item.date.format("%H:%M:%S%.3f"),
            item.item_type,
            item.message
        );
    }
}
