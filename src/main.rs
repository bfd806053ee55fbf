//! ptmux - client/server terminal multiplexer control plane

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use ptmux::Config;
use ptmux::bindings::KeyTables;
use ptmux::server::Server;
use std::path::PathBuf;

/// Client/server terminal multiplexer control plane
#[derive(Parser)]
#[command(name = "ptmux")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server socket path
    #[arg(short = 'S', long, global = true)]
    socket: Option<PathBuf>,

    /// Config file path
    #[arg(short = 'f', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground
    Server,
    /// Attach this terminal to the server
    Attach {
        /// Attach read-only: input is never applied
        #[arg(short, long)]
        read_only: bool,
    },
    /// Print the configured key bindings
    ListKeys,
}

fn main() -> Result<()> {
    // Log to /tmp/ptmux.log - tail with: tail -f /tmp/ptmux.log
    // Set DEBUG=0-3 to control verbosity (0=off, 1=warn, 2=info, 3=debug)
    let debug_level = std::env::var("DEBUG")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .unwrap_or(0);

    if debug_level > 0 {
        let level = match debug_level {
            1 => tracing::Level::WARN,
            2 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        };

        let file_appender = tracing_appender::rolling::never("/tmp", "ptmux.log");
        tracing_subscriber::fmt()
            .with_writer(file_appender)
            .with_max_level(level)
            .with_ansi(false)
            .init();
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Let --help and --version exit normally
            if e.kind() == clap::error::ErrorKind::DisplayHelp
                || e.kind() == clap::error::ErrorKind::DisplayVersion
            {
                e.exit();
            }
            eprintln!("error: {}\n", e.kind());
            Cli::command().print_help()?;
            std::process::exit(1);
        }
    };

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let socket = cli
        .socket
        .clone()
        .unwrap_or_else(Config::default_socket_path);

    match cli.command {
        Commands::Server => Server::bind(config, &socket)?.run(),
        Commands::Attach { read_only } => ptmux::client::attach(&config, &socket, read_only),
        Commands::ListKeys => cmd_list_keys(&config),
    }
}

fn cmd_list_keys(config: &Config) -> Result<()> {
    let mut tables = KeyTables::new();
    config.keys.install(&mut tables)?;
    for name in tables.names() {
        let Some(table) = tables.get(&name) else {
            continue;
        };
        for (key, binding) in table.entries() {
            let repeat = if binding.repeat { "-r " } else { "" };
            let commands = binding
                .commands
                .iter()
                .map(ptmux::command::Command::name)
                .collect::<Vec<_>>()
                .join(" ; ");
            println!("bind-key {repeat}-T {name} {key} {commands}");
        }
    }
    Ok(())
}
