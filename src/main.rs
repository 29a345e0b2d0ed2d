use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peg_analysis::config::{Command, CommandLineArgs, Config};
use peg_analysis::llm::client::LlmClient;
use peg_analysis::prompt_templates::PromptTemplateStore;
use peg_analysis::store::postgres::PostgresPegStore;
use peg_analysis::store::PegStore;
use peg_analysis::{response, AnalysisAssembler, AnalysisError};

#[tokio::main]
async fn main() {
    let args = CommandLineArgs::parse();

    let config = match Config::load(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        },
    };

    init_logging(&config);
    tracing::info!("peg-analysis starting up");

    let templates = match PromptTemplateStore::load(&config.prompt.template_path) {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("failed to load prompt templates from {}: {e}", config.prompt.template_path);
            std::process::exit(1);
        },
    };

    let store: Option<Arc<dyn PegStore>> = if config.database.url.is_empty() {
        tracing::warn!("no database.url configured, relying entirely on requests with enable_mock set");
        None
    } else {
        match PostgresPegStore::connect(
            &config.database.url,
            config.database.pool_size,
            config.database.result_limit,
            config.database.max_retries,
            Duration::from_millis(config.database.retry_delay_ms),
        )
        .await
        {
            Ok(s) => Some(Arc::new(s) as Arc<dyn PegStore>),
            Err(e) => {
                eprintln!("failed to connect to the relational store: {e}");
                std::process::exit(1);
            },
        }
    };

    let llm = Arc::new(LlmClient::new());
    let config = Arc::new(config);
    let assembler = AnalysisAssembler::new(store, llm, Arc::clone(&templates), Arc::clone(&config));

    let command = args.command.clone().unwrap_or(Command::Analyze { request: "-".to_string() });
    let exit_code = match command {
        Command::Analyze { request } => run_analyze(&assembler, &request, &config, args.deadline_secs).await,
        Command::ReloadTemplates => run_reload_templates(&templates),
    };

    std::process::exit(exit_code);
}

async fn run_analyze(
    assembler: &AnalysisAssembler,
    request_path: &str,
    config: &Config,
    deadline_secs: Option<u64>,
) -> i32 {
    let raw = match read_request(request_path) {
        Ok(r) => r,
        Err(e) => {
            print_error(&AnalysisError::RequestInvalid { field: "<input>".to_string(), reason: e });
            return 2;
        },
    };

    let request: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            let err = AnalysisError::RequestInvalid {
                field: "<root>".to_string(),
                reason: format!("not valid JSON: {e}"),
            };
            print_error(&err);
            return err.exit_code();
        },
    };

    let started = std::time::Instant::now();
    let outcome = match deadline_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), assembler.run(&request))
            .await
            .unwrap_or_else(|_| Err(AnalysisError::Internal("analysis deadline exceeded".to_string()))),
        None => assembler.run(&request).await,
    };

    match outcome {
        Ok(result) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let envelope = response::success(result, chrono::Utc::now().to_rfc3339(), elapsed_ms);
            print_json(&envelope);
            maybe_post_to_backend(config, &envelope).await;
            0
        },
        Err(e) => {
            print_error(&e);
            e.exit_code()
        },
    }
}

fn run_reload_templates(templates: &PromptTemplateStore) -> i32 {
    match templates.reload() {
        Ok(()) => {
            println!(r#"{{"status":"ok","prompts":{}}}"#, serde_json::json!(templates.available()));
            0
        },
        Err(e) => {
            print_error(&e);
            e.exit_code()
        },
    }
}

async fn maybe_post_to_backend(config: &Config, envelope: &response::ResponseEnvelope) {
    let Some(url) = &config.backend.url else { return };
    let response::ResponseEnvelope::Success { result, .. } = envelope else { return };

    let client = peg_analysis::backend_client::BackendClient::new(url.clone());
    let payload = peg_analysis::payload::build(result, None, &Default::default());
    match client.post(&payload).await {
        Ok(status) => tracing::info!(status, "posted analysis to backend"),
        Err(e) => tracing::warn!(error = %e, "failed to post analysis to backend, continuing"),
    }
}

fn read_request(path: &str) -> Result<String, String> {
    if path == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(|e| format!("reading stdin: {e}"))?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("reading '{path}': {e}"))
    }
}

fn print_json(envelope: &response::ResponseEnvelope) {
    match serde_json::to_string_pretty(envelope) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("failed to serialize response: {e}"),
    }
}

fn print_error(err: &AnalysisError) {
    tracing::error!(kind = err.kind(), "{}", err);
    print_json(&response::error(err));
}

fn init_logging(config: &Config) {
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path.file_name().and_then(|n| n.to_str()).unwrap_or("peg-analysis.log");
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // Leaked deliberately: the writer must outlive this function, and the
        // process only ever exits via `std::process::exit`, never by falling
        // off the end of `main`.
        std::mem::forget(guard);
        registry.with(tracing_subscriber::fmt::layer().with_writer(non_blocking)).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
