use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Local;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use job_triage::config::TriageConfig;
use job_triage::llm::{
    Classifier, LlmClassifier, LlmResponder, Responder, TemplateResponder, create_provider,
};
use job_triage::mailbox::ImapConnector;
use job_triage::pipeline::{KeywordClassifier, Orchestrator, Pipeline};
use job_triage::store::{Ledger, LibSqlBackend};

const USAGE: &str = "usage:
  job-triage [run]
  job-triage add-candidate <name> <address> <credential_ref>
  job-triage counts";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = TriageConfig::from_env().context("invalid configuration")?;

    // Initialize tracing: stderr plus a daily log file
    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("cannot create log dir {}", config.log_dir.display()))?;
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "triage.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    let ledger: Arc<dyn Ledger> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?,
    );

    match args.first().map(String::as_str) {
        None | Some("run") => run(&config, ledger).await,
        Some("add-candidate") => {
            let [name, address, credential_ref] = args.get(1..4).unwrap_or_default() else {
                bail!("{USAGE}");
            };
            let id = ledger.add_candidate(name, address, credential_ref).await?;
            println!("{id}");
            Ok(())
        }
        Some("counts") => {
            let counts = ledger.list_counts().await?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
            Ok(())
        }
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
    }
}

async fn run(config: &TriageConfig, ledger: Arc<dyn Ledger>) -> anyhow::Result<()> {
    let (classifier, responder): (Arc<dyn Classifier>, Arc<dyn Responder>) =
        match config.require_llm()? {
            Some(llm_config) => {
                let llm = create_provider(llm_config);
                (
                    Arc::new(LlmClassifier::new(llm.clone())),
                    Arc::new(LlmResponder::new(llm)),
                )
            }
            None => {
                tracing::info!("Mock AI mode: keyword classifier and reply templates");
                (
                    Arc::new(KeywordClassifier::default_rules()),
                    Arc::new(TemplateResponder),
                )
            }
        };

    let window = config.window.resolve(Local::now().date_naive());
    let pipeline = Pipeline::new(classifier, responder, Arc::clone(&ledger));
    let connector = Arc::new(ImapConnector::new(config.imap.clone()));
    let mut orchestrator =
        Orchestrator::new(pipeline, ledger, connector).with_max_candidates(config.max_candidates);

    let summary = orchestrator.run(&window).await;
    orchestrator.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&summary?)?);
    Ok(())
}
