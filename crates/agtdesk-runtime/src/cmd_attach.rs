//! `agtdesk attach`: pipe stdin to a shell session and its output to stdout.

use std::io::Write;

use agtdesk_core::TerminalEvent;
use agtdesk_runtime::Multiplexer;
use agtdesk_transport::{Connection, ConnectionConfig, ConnectionState};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::cli::AttachOpts;
use crate::cmd_session::control_client;
use crate::config::Settings;

pub async fn cmd_attach(settings: &Settings, opts: &AttachOpts) -> anyhow::Result<()> {
    let id = opts.terminal_id.as_str();
    let (conn, mut frames) = Connection::new(
        ConnectionConfig::new(settings.server_url.as_str())
            .with_reconnect_delay(settings.reconnect_delay),
    );
    let mut mux = Multiplexer::new(conn.clone(), control_client(settings), settings.home_dir.clone());
    mux.adopt_terminal(id, "");

    mux.register_output(id, |data| {
        let mut out = std::io::stdout().lock();
        // A closed stdout just means nobody is reading any more.
        let _ = out.write_all(data).and_then(|()| out.flush());
    });

    let done = CancellationToken::new();
    let on_exit = done.clone();
    mux.subscribe_terminal_output(id, move |event| {
        if let TerminalEvent::Exited { code } = event {
            eprintln!("\r\n[terminal exited: {}]", code.map_or("unknown".to_string(), |c| c.to_string()));
            on_exit.cancel();
        }
    });

    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut buf = vec![0u8; 4096];
        loop {
            match stdin.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if input_tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut state = conn.watch_state();
    conn.acquire();
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = tokio::signal::ctrl_c() => break,
            frame = frames.recv() => match frame {
                Some(frame) => mux.handle_frame(frame),
                None => break,
            },
            input = input_rx.recv() => match input {
                Some(bytes) => {
                    if !mux.send_terminal_input(id, &bytes) {
                        tracing::debug!(terminal_id = %id, "input dropped while disconnected");
                    }
                }
                None => {
                    tracing::debug!("stdin closed");
                    break;
                }
            },
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let open = *state.borrow_and_update() == ConnectionState::Open;
                if let (true, Some(cols), Some(rows)) = (open, opts.cols, opts.rows) {
                    mux.resize_terminal(id, cols, rows);
                }
            }
        }
    }
    conn.release();
    Ok(())
}
