//! agtdesk: command-line front end for the session event multiplexer.

use clap::Parser;

mod cli;
mod cmd_attach;
mod cmd_session;
mod cmd_watch;
mod config;
mod render;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Logs go to stderr so `attach` and `watch --json` keep stdout clean.
    let filter = std::env::var("AGTDESK_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    let settings = config::load(&args)?;

    match &args.command {
        cli::Command::Agents(opts) => cmd_session::cmd_agents(&settings, opts).await?,
        cli::Command::NewAgent(opts) => cmd_session::cmd_new_agent(&settings, opts).await?,
        cli::Command::KillAgent { id } => cmd_session::cmd_kill_agent(&settings, id).await?,
        cli::Command::Send(opts) => cmd_session::cmd_send(&settings, opts).await?,
        cli::Command::Watch(opts) => cmd_watch::cmd_watch(&settings, opts).await?,
        cli::Command::NewTerminal(opts) => cmd_session::cmd_new_terminal(&settings, opts).await?,
        cli::Command::KillTerminal { id } => cmd_session::cmd_kill_terminal(&settings, id).await?,
        cli::Command::Attach(opts) => cmd_attach::cmd_attach(&settings, opts).await?,
    }

    Ok(())
}
