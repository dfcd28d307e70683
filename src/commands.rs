//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a [`Cli`] struct that represents the parsed command-line arguments,
//! a [`Commands`] enum with the available subcommands, and the `key=value`
//! parser used by `--metadata`.
//!
//! # Examples
//!
//! ```sh
//! arag init
//! arag ingest report.pdf notes.md -m team=policy -m year=2024
//! arag add-text "Rust has no garbage collector." --source rust-notes
//! arag ask "How does Rust manage memory?"
//! arag interactive
//! ```

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Config file to use instead of `<config_dir>/config.yaml`.
    #[arg(long, global = true, env = "ARAG_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default config file and template.
    Init,

    /// Chunk and index one or more PDF, text or Markdown files.
    #[clap(name = "ingest", alias = "add")]
    Ingest {
        /// Files to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Extra metadata attached to every chunk, as `key=value`.
        #[arg(short = 'm', long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, Value)>,
    },

    /// Chunk and index a piece of raw text.
    #[clap(name = "add-text")]
    AddText {
        text: String,

        /// Label stored as the chunks' `source`.
        #[arg(long)]
        source: Option<String>,

        #[arg(short = 'm', long = "metadata", value_parser = parse_key_value)]
        metadata: Vec<(String, Value)>,
    },

    /// Ask a single question.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Print the whole response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Chat in a loop. `/clear` forgets the conversation, `exit` quits.
    #[clap(name = "interactive", alias = "i")]
    Interactive,

    /// Report whether an index exists and how many chunks it holds.
    Health,

    /// Delete every indexed document.
    #[clap(name = "clear-index")]
    ClearIndex,
}

/// Parse `key=value`. Values that read as a bool or a number keep that type;
/// everything else is a string.
pub fn parse_key_value(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in {raw:?}"));
    }

    let value = value.trim();
    let parsed = if let Ok(flag) = value.parse::<bool>() {
        Value::Bool(flag)
    } else if let Ok(int) = value.parse::<i64>() {
        Value::from(int)
    } else if let Some(float) = value.parse::<f64>().ok().filter(|f| f.is_finite()) {
        Value::from(float)
    } else {
        Value::String(value.to_string())
    };

    Ok((key.to_string(), parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_key_value_types() {
        assert_eq!(parse_key_value("year=2024").unwrap(), ("year".into(), json!(2024)));
        assert_eq!(parse_key_value("score=0.5").unwrap(), ("score".into(), json!(0.5)));
        assert_eq!(parse_key_value("draft=true").unwrap(), ("draft".into(), json!(true)));
        assert_eq!(
            parse_key_value("title = AI Act = 2024 ").unwrap(),
            ("title".into(), json!("AI Act = 2024"))
        );
        assert_eq!(parse_key_value("nan=NaN").unwrap(), ("nan".into(), json!("NaN")));
    }

    #[test]
    fn test_parse_key_value_rejects_malformed() {
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_cli_parses_ingest() {
        let cli = Cli::try_parse_from([
            "arag", "--config", "/tmp/c.yaml", "ingest", "a.pdf", "b.md", "-m", "team=policy",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        match cli.command {
            Commands::Ingest { paths, metadata } => {
                assert_eq!(paths, vec![PathBuf::from("a.pdf"), PathBuf::from("b.md")]);
                assert_eq!(metadata, vec![("team".to_string(), json!("policy"))]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_ingest_paths() {
        assert!(Cli::try_parse_from(["arag", "ingest"]).is_err());
    }

    #[test]
    fn test_cli_parses_ask_json() {
        let cli = Cli::try_parse_from(["arag", "ask", "What?", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { json: true, .. }));
    }
}
