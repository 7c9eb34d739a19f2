//! Which agents and terminals exist, and which agent owns which terminal.

use std::collections::BTreeMap;

use agtdesk_core::{AgentSession, TerminalSession};

#[derive(Debug, Default)]
pub struct SessionDirectory {
    agents: BTreeMap<String, AgentSession>,
    terminals: BTreeMap<String, TerminalSession>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Agents ───────────────────────────────────────────────────

    /// Insert or refresh an agent. Returns true when the id was new.
    pub fn insert_agent(&mut self, agent: AgentSession) -> bool {
        self.agents.insert(agent.id.clone(), agent).is_none()
    }

    pub fn remove_agent(&mut self, id: &str) -> Option<AgentSession> {
        self.agents.remove(id)
    }

    pub fn agent(&self, id: &str) -> Option<&AgentSession> {
        self.agents.get(id)
    }

    pub fn has_agent(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentSession> {
        self.agents.values()
    }

    // ─── Terminals ────────────────────────────────────────────────

    pub fn insert_terminal(&mut self, terminal: TerminalSession) -> bool {
        self.terminals.insert(terminal.id.clone(), terminal).is_none()
    }

    pub fn remove_terminal(&mut self, id: &str) -> Option<TerminalSession> {
        self.terminals.remove(id)
    }

    pub fn terminal(&self, id: &str) -> Option<&TerminalSession> {
        self.terminals.get(id)
    }

    pub fn has_terminal(&self, id: &str) -> bool {
        self.terminals.contains_key(id)
    }

    pub fn terminals(&self) -> impl Iterator<Item = &TerminalSession> {
        self.terminals.values()
    }

    /// Returns false for unknown ids.
    pub fn mark_exited(&mut self, id: &str) -> bool {
        match self.terminals.get_mut(id) {
            Some(terminal) => {
                terminal.exited = true;
                true
            }
            None => false,
        }
    }

    /// Ids of the terminals owned by `agent_id`, in id order.
    pub fn terminals_owned_by(&self, agent_id: &str) -> Vec<String> {
        self.terminals
            .values()
            .filter(|t| t.owner_agent.as_deref() == Some(agent_id))
            .map(|t| t.id.clone())
            .collect()
    }
}
