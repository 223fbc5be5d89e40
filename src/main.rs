//! figi CLI
//!
//! Loads config files, environment variables, and overrides the same way an
//! application using the library would, then prints what it sees.

use anyhow::{Context, Result, bail};
use clap::Parser;
use figi::cli::dump::{self, DumpArgs};
use figi::cli::{Cli, Command, GetArgs};
use figi::tree::get_path;
use figi::{ErrorKind, Figi, SourceTag};
use serde_json::Value;
use std::fs::OpenOptions;
use tracing::{Level, debug, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    let figi = load(&cli)?;

    match cli.command {
        Some(Command::Get(args)) => run_get(&figi, &args)?,
        Some(Command::Dump(args)) => run_dump(&figi, &args)?,
        Some(Command::Keys) => {
            for key in figi.keys() {
                println!("{}", key);
            }
        }
        Some(Command::Watch(args)) => run_watch(&figi, args).await?,
        None => run_dump(&figi, &DumpArgs::default())?,
    }

    Ok(())
}

/// Build the aggregator from CLI flags and load every source.
fn load(cli: &Cli) -> Result<Figi> {
    let mut builder = Figi::builder()
        .config_name(&cli.name)
        .env_prefix(&cli.env_prefix)
        .env_separator(&cli.env_separator);
    for dir in &cli.config_paths {
        builder = builder.config_path(dir);
    }
    if !cli.no_user_config
        && let Some(dir) = dirs::config_dir()
    {
        builder = builder.config_path(dir.join(&cli.name));
    }
    let figi = builder.build();

    // Nothing discovered is fine for the CLI; explicit files below must exist.
    match figi.read_in_config() {
        Ok(paths) => debug!("Discovered {} config file(s)", paths.len()),
        Err(e) if e.kind() == ErrorKind::FileNotFound => {
            info!("No '{}' config files found in search paths", cli.name);
        }
        Err(e) => return Err(e.into()),
    }
    for file in &cli.files {
        figi.load_file(file)
            .with_context(|| format!("Failed to load {}", file.display()))?;
    }

    figi.load_env();
    for (key, value) in &cli.overrides {
        figi.set(key, value.clone());
    }
    Ok(figi)
}

fn run_get(figi: &Figi, args: &GetArgs) -> Result<()> {
    match figi.get(&args.key) {
        Some(value) => {
            let text = match value {
                Value::String(s) => s,
                other => serde_json::to_string_pretty(&other)?,
            };
            println!("{}", text);
        }
        None if args.required => bail!("Key '{}' is not set", args.key),
        None => {}
    }
    Ok(())
}

fn run_dump(figi: &Figi, args: &DumpArgs) -> Result<()> {
    let table = match &args.key {
        Some(key) => figi.get(key).unwrap_or(Value::Null),
        None => figi.all_settings(),
    };
    println!("{}", dump::render(&table, args.format)?);
    Ok(())
}

/// Watch every loaded file and re-print the table on change until Ctrl-C.
async fn run_watch(figi: &Figi, args: DumpArgs) -> Result<()> {
    for entry in figi.source_entries(SourceTag::Files) {
        figi.watch_file(&entry)?;
    }
    if figi.watched_files().is_empty() {
        bail!("No config files loaded, nothing to watch");
    }

    run_dump(figi, &args)?;
    figi.on_change(move |table| {
        let view = match &args.key {
            Some(key) => get_path(table, key).cloned().unwrap_or(Value::Null),
            None => table.clone(),
        };
        println!("{}", dump::render(&view, args.format)?);
        Ok(())
    });

    info!("Watching {} file(s), press Ctrl-C to stop", figi.watched_files().len());
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}
