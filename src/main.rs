use adaptive_rag::cli::{Cli, Commands, ConfigAction};
use adaptive_rag::config::{expand_tilde, Config};
use adaptive_rag::daemon::{IpcClient, IpcMessage, IpcResponse, Server};
use adaptive_rag::error::{RagError, Result};
use adaptive_rag::service::{AskRequest, StepUpdate};
use std::path::PathBuf;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Serve {
            profile,
            no_preload,
        } => cmd_serve(cli.config, profile, no_preload),
        Commands::Stop => cmd_stop(cli.config),
        Commands::Status => cmd_status(cli.config),
        Commands::Ask {
            question,
            corpus,
            session,
            follow,
            json,
        } => cmd_ask(cli.config, question, corpus, session, follow, json),
        Commands::Subscribe { execution_id } => cmd_subscribe(cli.config, &execution_id),
        Commands::Select { corpus, session } => cmd_select(cli.config, corpus, session),
        Commands::Corpora { json } => cmd_corpora(cli.config, json),
        Commands::ClearSession { session } => cmd_clear_session(cli.config, session),
        Commands::Config { action } => cmd_config(cli.config, action),
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "adaptive_rag=debug"
    } else {
        "adaptive_rag=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| RagError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn cmd_serve(config_path: Option<PathBuf>, profile: Option<String>, no_preload: bool) -> Result<()> {
    let mut config = load_config(config_path, profile)?;
    if no_preload {
        config.server.preload = false;
    }

    tracing::info!("Starting arag server...");

    runtime()?.block_on(async {
        let mut server = Server::from_config(&config)?;
        server.run_foreground().await
    })
}

fn cmd_stop(config_path: Option<PathBuf>) -> Result<()> {
    match request(config_path, IpcMessage::Stop) {
        Ok(_) => {
            println!("✓ Server stopping");
            Ok(())
        }
        Err(RagError::ServerNotRunning) => {
            println!("Server is not running");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn cmd_status(config_path: Option<PathBuf>) -> Result<()> {
    println!("arag Status");
    println!("===========");

    let response = match request(config_path, IpcMessage::Status) {
        Ok(response) => response,
        Err(RagError::ServerNotRunning) => {
            println!("\nServer: Stopped");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    println!("\nServer: Running");
    if let Some(data) = response.data {
        println!("  Uptime: {}s", data["uptime_secs"]);
        println!("  Sessions: {}", data["sessions"]);
        println!("  Active progress channels: {}", data["active_channels"]);
        if let Some(built) = data["built_corpora"].as_array() {
            let ids: Vec<&str> = built.iter().filter_map(|v| v.as_str()).collect();
            println!("  Built corpora: {}", ids.join(", "));
        }
    }
    Ok(())
}

fn cmd_ask(
    config_path: Option<PathBuf>,
    question: String,
    corpus: Option<String>,
    session: Option<String>,
    follow: bool,
    json: bool,
) -> Result<()> {
    let client = client(config_path)?;
    let execution_id = uuid::Uuid::new_v4().to_string();
    let message = IpcMessage::Ask(AskRequest {
        question,
        corpus_id: corpus,
        execution_id: Some(execution_id.clone()),
        session_id: session,
    });

    let response = runtime()?.block_on(async {
        if !follow {
            return client.send(&message).await;
        }

        let progress = client.subscribe(&execution_id, print_update);
        let (progress, response) = tokio::join!(progress, client.send(&message));
        if let Err(e) = progress {
            tracing::warn!("Progress stream ended early: {}", e);
        }
        response
    })?;

    if json {
        println!("{}", pretty(&response)?);
        return Ok(());
    }

    let data = response.data.unwrap_or_default();
    if !response.success {
        let error = data["error"]
            .as_str()
            .map(str::to_string)
            .or(response.message)
            .unwrap_or_else(|| "unknown error".to_string());
        println!("✗ {} ({})", error, data["status"].as_str().unwrap_or("error"));
        return Ok(());
    }

    println!("{}", data["answer"].as_str().unwrap_or_default());
    println!();
    println!(
        "  Documents used: {}  Session: {}",
        data["documents_used"],
        data["session_id"].as_str().unwrap_or_default()
    );
    if let Some(audit) = data.get("audit") {
        println!(
            "  Audit: grounded={} resolves={}",
            audit["grounded"].as_str().unwrap_or("?"),
            audit["resolves"].as_str().unwrap_or("?")
        );
    }
    Ok(())
}

fn print_update(update: &StepUpdate) {
    match update {
        StepUpdate::Step { message, .. } => println!("… {}", message),
        StepUpdate::Done { .. } => println!("✓ Done"),
    }
}

fn cmd_subscribe(config_path: Option<PathBuf>, execution_id: &str) -> Result<()> {
    let client = client(config_path)?;
    runtime()?.block_on(client.subscribe(execution_id, print_update))
}

fn cmd_select(config_path: Option<PathBuf>, corpus: String, session: Option<String>) -> Result<()> {
    let response = request(
        config_path,
        IpcMessage::SelectCorpus {
            corpus_id: corpus,
            session_id: session,
        },
    )?;
    let data = expect_success(response)?;

    println!(
        "✓ Selected {} ({:.2}s)",
        data["display_name"].as_str().unwrap_or_default(),
        data["elapsed_secs"].as_f64().unwrap_or_default()
    );
    println!("  Session: {}", data["session_id"].as_str().unwrap_or_default());
    Ok(())
}

fn cmd_corpora(config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let data = expect_success(request(config_path, IpcMessage::ListCorpora)?)?;

    if json {
        println!("{}", pretty(&data)?);
        return Ok(());
    }

    let corpora = data.as_array().cloned().unwrap_or_default();
    if corpora.is_empty() {
        println!("No corpora found");
        return Ok(());
    }

    println!("Corpora ({}):", corpora.len());
    for corpus in corpora {
        let built = if corpus["built"].as_bool().unwrap_or(false) {
            " [built]"
        } else {
            ""
        };
        println!(
            "  {} - {} ({}){}",
            corpus["id"].as_str().unwrap_or_default(),
            corpus["display_name"].as_str().unwrap_or_default(),
            corpus["category"].as_str().unwrap_or_default(),
            built
        );
    }
    Ok(())
}

fn cmd_clear_session(config_path: Option<PathBuf>, session: String) -> Result<()> {
    let response = request(config_path, IpcMessage::ClearSession { session_id: session })?;
    expect_success(response)?;
    println!("✓ Session cleared");
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = toml::Value::try_from(&config)?;

            let shown = match section {
                Some(section) => value
                    .get(&section)
                    .cloned()
                    .ok_or_else(|| RagError::Config(format!("Unknown config section: {}", section)))?,
                None => value,
            };
            println!("{}", toml::to_string_pretty(&shown)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| RagError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            let corpora_dir = config.storage.corpora_dir();
            std::fs::create_dir_all(&corpora_dir).map_err(|e| RagError::Io {
                source: e,
                context: format!("Failed to create corpora directory: {:?}", corpora_dir),
            })?;

            println!("✓ Configuration initialized at: {}", path.display());
            println!("  Corpora directory: {}", corpora_dir.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'arag config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn client(config_path: Option<PathBuf>) -> Result<IpcClient> {
    let config = load_config(config_path, None)?;
    Ok(IpcClient::new(expand_tilde(&config.server.socket_path)))
}

fn request(config_path: Option<PathBuf>, message: IpcMessage) -> Result<IpcResponse> {
    let client = client(config_path)?;
    runtime()?.block_on(client.send(&message))
}

fn expect_success(response: IpcResponse) -> Result<serde_json::Value> {
    if response.success {
        return Ok(response.data.unwrap_or_default());
    }
    Err(RagError::Server(
        response
            .message
            .unwrap_or_else(|| "request failed".to_string()),
    ))
}

fn pretty<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| RagError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}
