//! Main entry point for the xchain intent client.
//!
//! This binary signs EIP-7702 delegations and cross-chain call intents with the
//! configured account and submits them to the configured origin settler.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xchain_config::Config;
use xchain_intent::IntentRequest;

mod commands;
mod factory_registry;

/// Command-line arguments for the client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
	/// Print the address of the configured account
	Address,
	/// Sign a request and print its encodings without contacting any chain
	Encode {
		/// Request JSON, or @path to read it from a file
		#[arg(short, long)]
		request: String,
		/// Leave out the delegation even if the request has one
		#[arg(long)]
		no_delegation: bool,
	},
	/// Sign a request and submit it to the origin settler
	Submit {
		/// Request JSON, or @path to read it from a file
		#[arg(short, long)]
		request: String,
		/// Leave out the delegation even if the request has one
		#[arg(long)]
		no_delegation: bool,
	},
}

/// Reads the request argument, following `@path` references.
async fn read_request(request: &str) -> Result<IntentRequest, Box<dyn std::error::Error>> {
	let json = match request.strip_prefix('@') {
		Some(path) => tokio::fs::read_to_string(path).await?,
		None => request.to_string(),
	};
	Ok(IntentRequest::from_json(&json)?)
}

async fn run(config: &Config, command: Command) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
	let account = factory_registry::build_account(config)?;

	match command {
		Command::Address => commands::address(&account).await,
		Command::Encode {
			request,
			no_delegation,
		} => {
			let params = read_request(&request).await?.into_params()?;
			commands::encode(config, &account, params, !no_delegation).await
		},
		Command::Submit {
			request,
			no_delegation,
		} => {
			let params = read_request(&request).await?.into_params()?;
			// Only submission needs a settler and its chain connections.
			let client = factory_registry::build_client(config, account.clone())?;
			commands::submit(config, &account, &client, params, !no_delegation).await
		},
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	// Logs go to stderr so stdout carries only the command's JSON.
	fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.init();

	let config_path = args
		.config
		.to_str()
		.ok_or_else(|| format!("Invalid config path: {}", args.config.display()))?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.client.id);

	let output = run(&config, args.command).await.inspect_err(|e| {
		tracing::error!(error = %e, "Command failed");
	})?;
	println!("{}", serde_json::to_string_pretty(&output)?);
	Ok(())
}
