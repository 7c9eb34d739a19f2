//! `agtdesk watch`: follow one agent's transcript live.

use agtdesk_core::AgentSession;
use agtdesk_runtime::Multiplexer;
use agtdesk_transport::{Connection, ConnectionConfig};
use tokio_util::sync::CancellationToken;

use crate::cli::WatchOpts;
use crate::cmd_session::control_client;
use crate::config::Settings;
use crate::render::{TranscriptPrinter, resolve_color};

pub async fn cmd_watch(settings: &Settings, opts: &WatchOpts) -> anyhow::Result<()> {
    let (conn, mut frames) = Connection::new(
        ConnectionConfig::new(settings.server_url.as_str())
            .with_reconnect_delay(settings.reconnect_delay),
    );
    let mut mux = Multiplexer::new(conn.clone(), control_client(settings), settings.home_dir.clone());

    if let Err(e) = mux.refresh_agents().await {
        tracing::warn!(error = %e, "could not list agents; watching by id only");
    }
    if mux.agents().all(|a| a.id != opts.agent_id) {
        mux.adopt_agent(AgentSession {
            id: opts.agent_id.clone(),
            working_dir: String::new(),
            display_name: opts.agent_id.clone(),
        });
    }

    let mut printer = TranscriptPrinter::new(resolve_color(&opts.color), opts.json);
    mux.subscribe_transcript(&opts.agent_id, move |update| {
        if let Some(text) = printer.render(update) {
            println!("{text}");
        }
    });

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    tracing::info!(agent_id = %opts.agent_id, url = %settings.server_url, "watching agent");
    conn.acquire();
    mux.pump(&mut frames, cancel).await;
    conn.release();
    Ok(())
}
