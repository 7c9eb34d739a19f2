//! Listener fan-out for transcript updates and terminal output.
//!
//! Listeners run synchronously on the multiplexer task, in subscription
//! order. A [`Subscription`] token removes exactly the listener it was issued
//! for; removing it twice is a no-op.

use std::collections::HashMap;

use agtdesk_core::{AgentUpdate, TerminalEvent};

pub type Listener<T> = Box<dyn FnMut(&T) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Transcript,
    TerminalOutput,
}

/// Token returned by a subscribe call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    topic: Topic,
    target: String,
    seq: u64,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Agent or terminal id the listener is attached to.
    pub fn target(&self) -> &str {
        &self.target
    }
}

struct Listeners<T> {
    by_target: HashMap<String, Vec<(u64, Listener<T>)>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            by_target: HashMap::new(),
        }
    }
}

impl<T> Listeners<T> {
    fn add(&mut self, target: &str, seq: u64, listener: Listener<T>) {
        self.by_target
            .entry(target.to_owned())
            .or_default()
            .push((seq, listener));
    }

    fn remove(&mut self, target: &str, seq: u64) -> bool {
        let Some(list) = self.by_target.get_mut(target) else {
            return false;
        };
        let before = list.len();
        list.retain(|(s, _)| *s != seq);
        let removed = list.len() != before;
        if list.is_empty() {
            self.by_target.remove(target);
        }
        removed
    }

    fn remove_all(&mut self, target: &str) -> usize {
        self.by_target.remove(target).map_or(0, |list| list.len())
    }

    fn publish(&mut self, target: &str, event: &T) -> usize {
        let Some(list) = self.by_target.get_mut(target) else {
            return 0;
        };
        for (_, listener) in list.iter_mut() {
            listener(event);
        }
        list.len()
    }

    fn count(&self, target: &str) -> usize {
        self.by_target.get(target).map_or(0, Vec::len)
    }
}

#[derive(Default)]
pub struct SubscriptionRegistry {
    next_seq: u64,
    transcripts: Listeners<AgentUpdate>,
    terminals: Listeners<TerminalEvent>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn issue(&mut self, topic: Topic, target: &str) -> Subscription {
        self.next_seq += 1;
        Subscription {
            topic,
            target: target.to_owned(),
            seq: self.next_seq,
        }
    }

    pub fn subscribe_transcript(
        &mut self,
        agent_id: &str,
        listener: impl FnMut(&AgentUpdate) + Send + 'static,
    ) -> Subscription {
        let sub = self.issue(Topic::Transcript, agent_id);
        self.transcripts.add(agent_id, sub.seq, Box::new(listener));
        sub
    }

    pub fn subscribe_terminal_output(
        &mut self,
        terminal_id: &str,
        listener: impl FnMut(&TerminalEvent) + Send + 'static,
    ) -> Subscription {
        let sub = self.issue(Topic::TerminalOutput, terminal_id);
        self.terminals.add(terminal_id, sub.seq, Box::new(listener));
        sub
    }

    /// Returns false if the listener was already gone.
    pub fn unsubscribe(&mut self, sub: &Subscription) -> bool {
        match sub.topic {
            Topic::Transcript => self.transcripts.remove(&sub.target, sub.seq),
            Topic::TerminalOutput => self.terminals.remove(&sub.target, sub.seq),
        }
    }

    pub fn publish_transcript(&mut self, agent_id: &str, update: &AgentUpdate) -> usize {
        self.transcripts.publish(agent_id, update)
    }

    pub fn publish_terminal(&mut self, terminal_id: &str, event: &TerminalEvent) -> usize {
        self.terminals.publish(terminal_id, event)
    }

    /// Drop every transcript listener of an agent.
    pub fn drop_agent(&mut self, agent_id: &str) -> usize {
        self.transcripts.remove_all(agent_id)
    }

    /// Drop every output listener of a terminal.
    pub fn drop_terminal(&mut self, terminal_id: &str) -> usize {
        self.terminals.remove_all(terminal_id)
    }

    pub fn transcript_listeners(&self, agent_id: &str) -> usize {
        self.transcripts.count(agent_id)
    }

    pub fn terminal_listeners(&self, terminal_id: &str) -> usize {
        self.terminals.count(terminal_id)
    }
}
