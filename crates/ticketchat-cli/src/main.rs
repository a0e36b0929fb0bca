//! # ticketchat
//!
//! Terminal client for one ticket conversation. Wires settings, logging, the
//! REST API, and the WebSocket connector into a [`ChatSession`], then relays
//! between stdin/stdout and the session.

#![deny(unsafe_code)]

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use ticketchat_core::{Attachment, ConnectionState, TicketId, UserId};
use ticketchat_session::{
    ChatSession, HttpApi, SessionConfig, SessionDeps, SessionEvent, StaticVisibility,
    UserDirectory,
};
use ticketchat_settings::{ChatSettings, load_settings, load_settings_from_path};
use ticketchat_transport::WsConnector;

use crate::terminal::{HELP, Input, TerminalNotifier, parse_input, render_message};

/// Chat on a marketplace support ticket from the terminal.
#[derive(Parser, Debug)]
#[command(name = "ticketchat", about = "Ticket chat terminal client")]
struct Cli {
    /// Ticket to open.
    #[arg(long)]
    ticket: String,

    /// Your user ID; your own messages never notify.
    #[arg(long)]
    user: String,

    /// Settings file (defaults to `~/.ticketchat/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overriding the settings file.
    #[arg(long)]
    log_level: Option<String>,

    /// Ring the bell for messages from others.
    #[arg(long)]
    notify: bool,
}

fn load(args: &Cli) -> Result<ChatSettings> {
    match &args.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => load_settings().context("Failed to load settings"),
    }
}

fn init_logging(args: &Cli, settings: &ChatSettings) {
    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    if settings.logging.json {
        ticketchat_logging::init_json_subscriber(level);
    } else {
        ticketchat_logging::init_subscriber(level);
    }
}

fn report(event: &SessionEvent, directory: &UserDirectory) {
    match event {
        SessionEvent::MessagesAccepted(messages) => {
            for message in messages {
                println!("{}", render_message(message, directory));
            }
        }
        SessionEvent::StateChanged(ConnectionState::Open) => eprintln!("-- connected"),
        SessionEvent::StateChanged(_) => {}
        SessionEvent::Reconnecting { attempt, delay } => {
            eprintln!("-- connection lost, retry {attempt} in {}ms", delay.as_millis());
        }
        SessionEvent::Exhausted { attempts } => {
            eprintln!("-- gave up after {attempts} attempts, type /retry to try again");
        }
        SessionEvent::PayloadDropped { reason } => warn!(%reason, "dropped unreadable frame"),
    }
}

async fn send(session: &ChatSession, text: &str, staged: &mut Vec<Attachment>) {
    match session.send(text, staged.as_slice()).await {
        Ok(()) => staged.clear(),
        Err(e) => eprintln!("-- not sent: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = load(&args)?;
    init_logging(&args, &settings);

    let http = Arc::new(
        HttpApi::from_settings(&settings.server).context("Failed to build HTTP client")?,
    );
    let connector = WsConnector::new(settings.server.ws_base_url.clone())
        .with_auth_token(settings.server.auth_token.clone());
    let directory = UserDirectory::new();
    let deps = SessionDeps::new(Arc::new(connector), http.clone(), http)
        .with_notifier(Arc::new(TerminalNotifier::new(args.notify)))
        // A terminal cannot tell whether it is on screen.
        .with_visibility(Arc::new(StaticVisibility(!args.notify)))
        .with_directory(directory.clone());

    let config = SessionConfig::from_settings(UserId::from(args.user.as_str()), &settings);
    let session = ChatSession::open(TicketId::from(args.ticket.as_str()), config, deps)
        .await
        .with_context(|| format!("Failed to open ticket {}", args.ticket))?;
    info!(session_id = %session.id(), "session opened");

    if let Some(meta) = session.ticket_meta() {
        let subject = meta.subject.as_deref().unwrap_or("(no subject)");
        let status = meta.status.as_deref().unwrap_or("UNKNOWN");
        eprintln!("-- ticket {}: {subject} [{status}]", session.ticket());
    }
    for message in session.messages().iter() {
        println!("{}", render_message(message, &directory));
    }

    let mut events = session.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut staged: Vec<Attachment> = Vec::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => report(&event, &directory),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Ok(None) => {}
                    Ok(Some(Input::Quit)) => break,
                    Ok(Some(Input::Help)) => eprintln!("{HELP}"),
                    Ok(Some(Input::Retry)) => session.reconnect()?,
                    Ok(Some(Input::Attach(attachment))) => {
                        eprintln!("-- staged {}", attachment.name);
                        staged.push(attachment);
                    }
                    Ok(Some(Input::Flush)) => send(&session, "", &mut staged).await,
                    Ok(Some(Input::Message(text))) => send(&session, &text, &mut staged).await,
                    Err(usage) => eprintln!("-- {usage}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.close().await;
    info!("session closed");
    Ok(())
}
