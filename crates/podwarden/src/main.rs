//! podwarden - in-cluster incident agent.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cron::Schedule;
use kube::Client;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use notify::{FeishuChannel, Notifier, NotifyChannel};
use podwarden::agents::{LogAnalyzer, Orchestrator};
use podwarden::ai::build_chat_model;
use podwarden::config::{
    parse_schedule, Config, EmbeddingProviderKind, KnowledgeBackend, KnowledgeBaseConfig,
    LogSourceKind, WorkingMode,
};
use podwarden::detect::{Detector, KubernetesLogSource, LogSource, LokiLogSource};
use podwarden::knowledge::{
    Embedder, HybridRetriever, InlineStore, KnowledgeStore, MilvusStore, OpenAiCompatibleEmbedder,
    RerankWeights, RetrieverSettings,
};
use podwarden::scheduler::{IncidentRunner, Pipeline, Scheduler};
use podwarden::secrets::{resolve_ref, KubeSecretResolver, SecretResolver};
use podwarden::tools::KubePatchExecutor;

/// Watch a cluster for unhealthy pods and investigate them with a language model.
#[derive(Parser)]
#[command(name = "podwarden")]
#[command(about = "In-cluster incident agent")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(
        long,
        global = true,
        env = "PODWARDEN_CONFIG",
        default_value = "/etc/podwarden/config.yaml"
    )]
    config: PathBuf,

    /// Read the configuration from a ConfigMap instead (namespace/name)
    #[arg(long, global = true, env = "PODWARDEN_CONFIG_MAP")]
    config_map: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "PODWARDEN_LOG_FORMAT")]
    log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection passes on the configured schedule
    Run,

    /// Run a single detection pass and exit
    Once,

    /// Investigate one pod now, healthy or not
    Analyze {
        #[arg(long)]
        namespace: String,

        #[arg(long)]
        pod: String,

        /// Print the report without notifying
        #[arg(long)]
        dry_run: bool,
    },

    /// Check the configuration and exit
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    match &cli.command {
        Commands::Validate => validate(&cli).await,
        Commands::Run => {
            let app = App::build(&cli).await?;
            let shutdown = shutdown_on_ctrl_c();
            app.scheduler().run(shutdown).await;
            Ok(())
        }
        Commands::Once => {
            let app = App::build(&cli).await?;
            let summary = app.scheduler().tick(&shutdown_on_ctrl_c()).await;
            println!(
                "incidents: {}, succeeded: {}, failed: {}, reported: {}",
                summary.incidents, summary.succeeded, summary.failed, summary.reported
            );
            if summary.failed > 0 {
                bail!("{} of {} invocations failed", summary.failed, summary.incidents);
            }
            Ok(())
        }
        Commands::Analyze {
            namespace,
            pod,
            dry_run,
        } => {
            let app = App::build(&cli).await?;
            let incident = app
                .detector
                .inspect(namespace, pod)
                .await
                .with_context(|| format!("failed to inspect {namespace}/{pod}"))?;

            match app.runner.report(&incident, &shutdown_on_ctrl_c()).await? {
                Some(event) => {
                    println!("{}\n\n{}", event.title(), event.body());
                    if !dry_run {
                        app.runner.deliver(&incident, event).await;
                    }
                }
                None => println!("Nothing to report for {namespace}/{pod}"),
            }
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("info,podwarden=debug,notify=debug")
        } else {
            EnvFilter::new("warn,podwarden=info,notify=info")
        }
    });

    match format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT, shutting down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Unable to listen for SIGINT"),
        }
    });
    shutdown
}

async fn load_config(cli: &Cli, client: Option<&Client>) -> Result<Config> {
    match &cli.config_map {
        Some(reference) => {
            let (namespace, name) = reference
                .split_once('/')
                .context("--config-map must be namespace/name")?;
            let client = match client {
                Some(client) => client.clone(),
                None => kube_client().await?,
            };
            Ok(Config::from_configmap(&client, namespace, name).await?)
        }
        None => Ok(Config::from_file(&cli.config)?),
    }
}

async fn kube_client() -> Result<Client> {
    Client::try_default()
        .await
        .context("failed to create Kubernetes client")
}

async fn validate(cli: &Cli) -> Result<()> {
    let config = load_config(cli, None).await?;
    println!(
        "configuration ok: mode={:?} provider={:?} schedule={:?} sinks={} knowledge base={}",
        config.llm.working_mode,
        config.llm.provider,
        config.schedule,
        config.notification.sinks.len(),
        config
            .knowledge_base
            .as_ref()
            .map_or("none".to_string(), |kb| format!("{:?}", kb.backend)),
    );
    Ok(())
}

/// Everything a detection pass needs.
struct App {
    config: Config,
    schedule: Schedule,
    detector: Arc<Detector>,
    runner: Arc<IncidentRunner>,
}

impl App {
    async fn build(cli: &Cli) -> Result<Self> {
        let client = kube_client().await?;
        let config = load_config(cli, Some(&client)).await?;
        let schedule = parse_schedule(&config.schedule)?;
        let secrets = KubeSecretResolver::new(client.clone());
        let namespace = config.secret_namespace.as_str();

        let model = build_chat_model(&config.llm, &secrets, namespace)
            .await
            .context("failed to build chat model")?;

        let retriever = match &config.knowledge_base {
            Some(kb) => Some(Arc::new(build_retriever(kb, &secrets, namespace).await?)),
            None => {
                info!("No knowledge base configured");
                None
            }
        };

        let pipeline = match config.llm.working_mode {
            WorkingMode::Multi => {
                let mut builder = Orchestrator::builder(model)
                    .patch_executor(Arc::new(KubePatchExecutor::new(client.clone())))
                    .max_steps(config.llm.max_steps)
                    .max_tool_rounds(config.llm.max_tool_rounds)
                    .max_tokens(config.llm.max_tokens);
                if let Some(retriever) = retriever {
                    builder = builder.retriever(retriever);
                }
                Pipeline::Multi(Arc::new(builder.build()?))
            }
            WorkingMode::Single => Pipeline::Single(Arc::new(LogAnalyzer::new(
                model,
                retriever,
                config.llm.max_tokens,
            )?)),
        };

        let notifier = Arc::new(build_notifier(&config, &secrets).await?);
        let runner = Arc::new(IncidentRunner::new(
            pipeline,
            notifier,
            config.invocation_timeout(),
        ));

        let log_source: Arc<dyn LogSource> = match config.log_source.kind {
            LogSourceKind::Kubernetes => Arc::new(KubernetesLogSource::new(
                client.clone(),
                config.log_source.tail_lines,
            )),
            LogSourceKind::Loki => {
                let loki = config
                    .log_source
                    .loki
                    .as_ref()
                    .context("logSource.loki is not configured")?;
                let limit = u32::try_from(config.log_source.tail_lines)
                    .context("logSource.tailLines does not fit a Loki limit")?;
                Arc::new(LokiLogSource::new(&loki.address, loki.lookback_hours)?.with_limit(limit))
            }
        };
        let detector = Arc::new(Detector::new(
            client,
            config.selector.clone(),
            log_source,
            config.llm.language,
        ));

        info!(
            mode = ?config.llm.working_mode,
            provider = ?config.llm.provider,
            schedule = %config.schedule,
            "podwarden ready"
        );
        Ok(Self {
            config,
            schedule,
            detector,
            runner,
        })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.schedule.clone(),
            self.detector.clone(),
            self.runner.clone(),
            self.config.max_concurrent_incidents,
        )
    }
}

async fn build_retriever(
    kb: &KnowledgeBaseConfig,
    secrets: &dyn SecretResolver,
    namespace: &str,
) -> Result<HybridRetriever> {
    let api_key = resolve_ref(secrets, &kb.embedding.api_key_secret_ref, namespace)
        .await
        .context("failed to resolve embedding API key")?;
    let mut embedder = match kb.embedding.provider {
        EmbeddingProviderKind::Ark => OpenAiCompatibleEmbedder::ark(api_key, &kb.embedding.model_name)?,
        EmbeddingProviderKind::Openai => {
            OpenAiCompatibleEmbedder::openai(api_key, &kb.embedding.model_name)?
        }
    };
    if let Some(base_url) = &kb.embedding.base_url {
        embedder = embedder.with_base_url(base_url);
    }
    let embedder: Arc<dyn Embedder> = Arc::new(embedder);

    let store: Arc<dyn KnowledgeStore> = match kb.backend {
        KnowledgeBackend::Milvus => {
            let address = kb
                .address
                .as_deref()
                .context("knowledgeBase.address is not configured")?;
            let mut store = MilvusStore::new(address)?;
            if let (Some(user_ref), Some(password_ref)) =
                (&kb.username_secret_ref, &kb.password_secret_ref)
            {
                let username = resolve_ref(secrets, user_ref, namespace)
                    .await
                    .context("failed to resolve Milvus username")?;
                let password = resolve_ref(secrets, password_ref, namespace)
                    .await
                    .context("failed to resolve Milvus password")?;
                store = store.with_credentials(&username, &password);
            }
            Arc::new(store)
        }
        KnowledgeBackend::Inline => {
            let path = kb
                .documents
                .as_deref()
                .context("knowledgeBase.documents is not configured")?;
            Arc::new(InlineStore::from_file(
                kb.collection_name.clone(),
                path,
                Arc::clone(&embedder),
            )?)
        }
    };

    let settings = RetrieverSettings {
        collection: kb.collection_name.clone(),
        top_k: kb.top_k,
        weights: RerankWeights::from(kb.weights),
        load_timeout: kb.load_timeout(),
        ..RetrieverSettings::default()
    };
    HybridRetriever::connect(store, embedder, settings)
        .await
        .context("knowledge base is not ready")
}

async fn build_notifier(config: &Config, secrets: &dyn SecretResolver) -> Result<Notifier> {
    let namespace = config.secret_namespace.as_str();
    let mut channels: Vec<Arc<dyn NotifyChannel>> = Vec::new();

    for sink in &config.notification.sinks {
        let webhook = resolve_ref(secrets, &sink.feishu.webhook_secret_ref, namespace)
            .await
            .with_context(|| format!("failed to resolve webhook of sink {}", sink.name))?;
        let signing_secret = resolve_ref(secrets, &sink.feishu.signature_secret_ref, namespace)
            .await
            .with_context(|| format!("failed to resolve signing secret of sink {}", sink.name))?;
        channels.push(Arc::new(FeishuChannel::new(
            sink.name.clone(),
            webhook,
            signing_secret,
        )?));
    }

    Ok(Notifier::with_channels(channels))
}
