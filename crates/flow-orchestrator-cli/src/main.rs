// Copyright (c) 2025 Flow Orchestrator
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Flow Orchestrator CLI.
//!
//! A harness for exercising the execution core directly — not a
//! transport surface. `validate` parses and structurally checks a flow
//! document; `run` drives [`flow_orchestrator_core::Executor`] against a
//! small built-in demo task set and prints the `{success, outputs,
//! error?}` result.

mod demo_tasks;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use flow_orchestrator_core::{Executor, FlowDefinition, InMemoryConnectionManager, TaskRegistry};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "flow-orchestrator")]
#[command(version, about = "Declarative flow orchestration engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a flow definition
    Validate {
        /// Path to flow definition file (YAML)
        #[arg(value_name = "FILE")]
        file: String,
    },

    /// Run a flow against the built-in demo task set
    Run {
        /// Path to flow definition file (YAML)
        #[arg(value_name = "FILE")]
        file: String,

        /// Input JSON string, or a path to a JSON file
        #[arg(short, long)]
        input: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("flow_orchestrator={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match cli.command {
        Commands::Validate { file } => validate_flow(&file),
        Commands::Run { file, input } => run_flow(&file, input.as_deref()).await,
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn validate_flow(file_path: &str) -> Result<()> {
    info!("Validating flow definition: {}", file_path);
    println!("{} {}", "Validating flow:".cyan().bold(), file_path);

    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read flow file: {}", file_path))?;

    let definition = FlowDefinition::from_yaml_str(&content)
        .with_context(|| format!("Flow definition failed structural validation: {}", file_path))?;

    println!("{}", "✓ Flow definition is valid".green().bold());
    println!("  Name: {}", definition.name);
    println!("  Inputs: {}", definition.inputs.len());
    println!("  Outputs: {}", definition.outputs.len());
    println!("  Steps: {}", definition.steps.len());

    Ok(())
}

async fn run_flow(file_path: &str, input: Option<&str>) -> Result<()> {
    info!("Running flow definition: {}", file_path);
    println!("{} {}", "Running flow:".cyan().bold(), file_path);

    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read flow file: {}", file_path))?;

    let definition = FlowDefinition::from_yaml_str(&content)
        .with_context(|| format!("Flow definition failed structural validation: {}", file_path))?;

    info!(flow = %definition.name, "parsed flow definition");

    let inputs = match input {
        Some(raw) => parse_input(raw)?,
        None => HashMap::new(),
    };

    let registry = Arc::new(TaskRegistry::new());
    demo_tasks::register_all(&registry);

    let connections = Arc::new(InMemoryConnectionManager::new());
    let executor = Executor::new(registry);

    println!("{}", "Executing flow...".cyan());
    let result = executor.execute_flow(&definition, inputs, connections).await;

    if result.success {
        println!("{}", "✓ Flow completed successfully".green().bold());
    } else {
        println!("{}", "✗ Flow failed".red().bold());
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&result).unwrap_or_else(|_| format!("{:?}", result))
    );

    if !result.success {
        anyhow::bail!(
            "flow execution failed: {}",
            result
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string())
        );
    }

    Ok(())
}

fn parse_input(input_str: &str) -> Result<HashMap<String, Value>> {
    if Path::new(input_str).exists() {
        let content = fs::read_to_string(input_str)
            .with_context(|| format!("Failed to read input file: {}", input_str))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse input JSON from file: {}", input_str))
    } else {
        serde_json::from_str(input_str).with_context(|| "Failed to parse input JSON string")
    }
}
