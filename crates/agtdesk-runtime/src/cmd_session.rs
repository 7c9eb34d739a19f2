//! One-shot control-plane subcommands: list, create and kill sessions, send.

use agtdesk_core::AgentSession;
use agtdesk_transport::{ControlClient, ControlPlane};

use crate::cli::{ListOpts, NewAgentOpts, NewTerminalOpts, SendOpts};
use crate::config::Settings;

pub fn control_client(settings: &Settings) -> ControlClient {
    ControlClient::new(&settings.control_socket).with_timeout(settings.request_timeout)
}

pub async fn cmd_agents(settings: &Settings, opts: &ListOpts) -> anyhow::Result<()> {
    let agents = control_client(settings).list_agents().await?;
    if opts.json {
        for agent in &agents {
            println!("{}", serde_json::to_string(agent)?);
        }
    } else if agents.is_empty() {
        println!("(no agents)");
    } else {
        print!("{}", format_agents(&agents));
    }
    Ok(())
}

/// Aligned `id  name  working_dir` rows.
pub(crate) fn format_agents(agents: &[AgentSession]) -> String {
    let id_width = agents.iter().map(|a| a.id.len()).max().unwrap_or(0);
    let name_width = agents.iter().map(|a| a.display_name.len()).max().unwrap_or(0);
    agents
        .iter()
        .map(|a| {
            format!(
                "{:<id_width$}  {:<name_width$}  {}\n",
                a.id, a.display_name, a.working_dir
            )
        })
        .collect()
}

pub async fn cmd_new_agent(settings: &Settings, opts: &NewAgentOpts) -> anyhow::Result<()> {
    let agent = control_client(settings)
        .create_agent(&opts.working_dir, opts.name.as_deref())
        .await?;
    println!("{}", agent.id);
    Ok(())
}

pub async fn cmd_kill_agent(settings: &Settings, id: &str) -> anyhow::Result<()> {
    control_client(settings).destroy_agent(id).await?;
    Ok(())
}

pub async fn cmd_send(settings: &Settings, opts: &SendOpts) -> anyhow::Result<()> {
    let text = opts.text.join(" ");
    anyhow::ensure!(!text.trim().is_empty(), "message text is empty");
    control_client(settings)
        .send_agent_message(&opts.agent_id, &text)
        .await?;
    Ok(())
}

pub async fn cmd_new_terminal(settings: &Settings, opts: &NewTerminalOpts) -> anyhow::Result<()> {
    let id = control_client(settings)
        .create_terminal(&opts.working_dir, opts.name.as_deref(), opts.agent.as_deref())
        .await?;
    println!("{id}");
    Ok(())
}

pub async fn cmd_kill_terminal(settings: &Settings, id: &str) -> anyhow::Result<()> {
    control_client(settings).destroy_terminal(id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agents_are_column_aligned() {
        let agents = vec![
            AgentSession {
                id: "a1".into(),
                working_dir: "/w/api".into(),
                display_name: "api".into(),
            },
            AgentSession {
                id: "a10".into(),
                working_dir: "/w/frontend".into(),
                display_name: "frontend".into(),
            },
        ];
        assert_eq!(
            format_agents(&agents),
            "a1   api       /w/api\na10  frontend  /w/frontend\n"
        );
    }
}
