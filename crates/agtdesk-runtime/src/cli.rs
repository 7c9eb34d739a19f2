//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "agtdesk", about = "Session multiplexer for supervised coding agents")]
pub struct Cli {
    /// Session server WebSocket URL (overrides `server_url` in the config file)
    #[arg(long, global = true, env = "AGTDESK_URL")]
    pub url: Option<String>,

    /// Control-plane UDS socket path (overrides `control_socket`)
    #[arg(long, short = 's', global = true, env = "AGTDESK_SOCKET")]
    pub socket_path: Option<String>,

    /// Config file (default: $XDG_CONFIG_HOME/agtdesk/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// List agents the server is running
    Agents(ListOpts),
    /// Start an agent in a working directory
    NewAgent(NewAgentOpts),
    /// Stop an agent
    KillAgent { id: String },
    /// Send a message to an agent
    Send(SendOpts),
    /// Follow an agent's transcript
    Watch(WatchOpts),
    /// Open a shell session
    NewTerminal(NewTerminalOpts),
    /// Kill a shell session
    KillTerminal { id: String },
    /// Attach stdin/stdout to a shell session
    Attach(AttachOpts),
}

#[derive(Args, Default)]
pub struct ListOpts {
    /// Print one JSON object per agent
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct NewAgentOpts {
    pub working_dir: String,

    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct SendOpts {
    pub agent_id: String,

    /// Message text; multiple words are joined with spaces
    #[arg(required = true, num_args = 1..)]
    pub text: Vec<String>,
}

#[derive(Args)]
pub struct WatchOpts {
    pub agent_id: String,

    /// Print every update as a JSON line instead of rendered text
    #[arg(long)]
    pub json: bool,

    /// Color output: auto, always, never
    #[arg(long, default_value = "auto")]
    pub color: String,
}

#[derive(Args)]
pub struct NewTerminalOpts {
    pub working_dir: String,

    #[arg(long)]
    pub name: Option<String>,

    /// Owning agent; the terminal is killed with it
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Args)]
pub struct AttachOpts {
    pub terminal_id: String,

    /// Columns to request on every (re)connect
    #[arg(long, requires = "rows")]
    pub cols: Option<u16>,

    /// Rows to request on every (re)connect
    #[arg(long, requires = "cols")]
    pub rows: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_joins_words() {
        let cli = Cli::try_parse_from(["agtdesk", "send", "a1", "fix", "the", "build"]).unwrap();
        let Command::Send(opts) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(opts.agent_id, "a1");
        assert_eq!(opts.text.join(" "), "fix the build");
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["agtdesk", "watch", "a1", "--url", "ws://h:1/ws", "-s", "/tmp/x.sock"])
            .unwrap();
        assert_eq!(cli.url.as_deref(), Some("ws://h:1/ws"));
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
    }

    #[test]
    fn attach_size_needs_both_dimensions() {
        assert!(Cli::try_parse_from(["agtdesk", "attach", "t1", "--cols", "80"]).is_err());
        let cli = Cli::try_parse_from(["agtdesk", "attach", "t1", "--cols", "80", "--rows", "24"]).unwrap();
        let Command::Attach(opts) = cli.command else {
            panic!("expected attach");
        };
        assert_eq!((opts.cols, opts.rows), (Some(80), Some(24)));
    }
}
