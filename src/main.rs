//! Main module for the Awful RAG CLI application (arag).
//!
//! This module parses the command line, loads the configuration, builds the
//! [`RagService`] once and dispatches the requested command.
//!
//! # Examples
//!
//! ```sh
//! arag init
//! arag ingest handbook.pdf
//! arag ask "What does the handbook say about onboarding?"
//! ```

use awful_rag::commands::{Cli, Commands};
use awful_rag::config::{self, RagConfig};
use awful_rag::document::Metadata;
use awful_rag::engine::{ChatResponse, ResponseStatus};
use awful_rag::service::RagService;
use awful_rag::template::PromptTemplate;
use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, Print, SetAttribute, SetForegroundColor},
};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::{
    error::Error,
    fs,
    io::{Write, stdout},
    path::Path,
};
use tracing::{debug, info};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt().with_writer(std::io::stderr).init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    match cli.command {
        Commands::Init => init(&config_path),
        command => {
            let rag_config = if config_path.exists() {
                config::load_config(&config_path)?
            } else {
                info!("No config at {}, using defaults", config_path.display());
                RagConfig::default()
            };
            debug!("Config loaded: {:?}", rag_config);

            let service = RagService::from_config(&rag_config)?;
            execute(&service, command, &config_path).await
        }
    }
}

async fn execute(
    service: &RagService,
    command: Commands,
    config_path: &Path,
) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Init => init(config_path)?,
        Commands::Ingest { paths, metadata } => {
            let metadata: Metadata = metadata.into_iter().collect();
            ingest(service, &paths, &metadata)?;
        }
        Commands::AddText {
            text,
            source,
            metadata,
        } => {
            let mut metadata: Metadata = metadata.into_iter().collect();
            if let Some(source) = source {
                metadata.insert("source".to_string(), Value::String(source));
            }
            let stored = service.ingest_text(&text, &metadata)?;
            println!("Stored {stored} chunks");
        }
        Commands::Ask { question, json } => {
            let response = service.query(&question).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_response(&response)?;
            }
        }
        Commands::Interactive => interactive(service).await?,
        Commands::Health => {
            println!("{}", serde_json::to_string_pretty(&service.health())?);
        }
        Commands::ClearIndex => {
            service.clear_index()?;
            println!("Index cleared");
        }
    }
    Ok(())
}

fn ingest(
    service: &RagService,
    paths: &[std::path::PathBuf],
    metadata: &Metadata,
) -> Result<(), Box<dyn Error>> {
    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
            )?
            .progress_chars("#>-"),
    );

    let mut failures = 0usize;
    for path in paths {
        pb.set_message(path.display().to_string());
        match service.ingest_file(path, metadata) {
            Ok(stored) => pb.println(format!("{}: {stored} chunks", path.display())),
            Err(e) => {
                failures += 1;
                pb.println(format!("{}: {e}", path.display()));
            }
        }
        pb.inc(1);
    }
    pb.finish_with_message("done");

    if failures > 0 {
        return Err(format!("{failures} of {} files failed to ingest", paths.len()).into());
    }
    Ok(())
}

fn print_response(response: &ChatResponse) -> Result<(), Box<dyn Error>> {
    let mut stdout = stdout();
    let color = match response.status {
        ResponseStatus::Ok => Color::Blue,
        ResponseStatus::Error => Color::Red,
    };

    stdout.execute(SetForegroundColor(color))?;
    stdout.execute(SetAttribute(Attribute::Bold))?;
    stdout.execute(Print(format!("{}\n", response.answer)))?;
    stdout.execute(SetAttribute(Attribute::Reset))?;

    if !response.sources.is_empty() {
        stdout.execute(SetForegroundColor(Color::DarkGrey))?;
        stdout.execute(Print("\nSources:\n"))?;
        for (i, source) in response.sources.iter().enumerate() {
            let label = source
                .metadata
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            stdout.execute(Print(format!(
                "  [{}] {} ({:.3})\n",
                i + 1,
                label,
                source.relevance_score
            )))?;
        }
    }

    stdout.execute(SetForegroundColor(Color::Reset))?;
    stdout.flush()?;
    Ok(())
}

async fn interactive(service: &RagService) -> Result<(), Box<dyn Error>> {
    println!(
        "Chatting with {}. Type /clear to forget the conversation, exit to quit.",
        service.model_name()
    );

    let mut stdout = stdout();
    loop {
        stdout.execute(Print("\nYou: "))?;
        stdout.execute(SetForegroundColor(Color::Green))?;
        stdout.flush()?;

        let mut input = String::new();
        let read = std::io::stdin().read_line(&mut input)?;
        stdout.execute(SetForegroundColor(Color::Reset))?;

        let input = input.trim();
        if read == 0 || input.eq_ignore_ascii_case("exit") {
            break;
        }
        match input {
            "" => continue,
            "/clear" => {
                service.clear_memory().await;
                println!("Conversation cleared");
            }
            question => print_response(&service.query(question).await)?,
        }
    }
    Ok(())
}

/// Writes a default config (unless one exists) and the default template.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        info!("Keeping existing config file: {}", config_path.display());
    } else {
        info!("Creating config file: {}", config_path.display());
        config::save_config(&RagConfig::default(), config_path)?;
    }

    let templates = awful_rag::config_dir()?.join("templates");
    info!("Creating template directory: {}", templates.display());
    fs::create_dir_all(&templates)?;

    let template_path = templates.join("default.yaml");
    if !template_path.exists() {
        info!("Creating template file: {}", template_path.display());
        fs::write(&template_path, serde_yaml::to_string(&PromptTemplate::default())?)?;
    }

    println!("Config: {}", config_path.display());
    println!("Templates: {}", templates.display());
    Ok(())
}
