//! Terminal surfaces: input commands, message rendering, and notifications.

use std::io::Write;

use ticketchat_core::{Attachment, AttachmentKind, ChatMessage};
use ticketchat_session::{Notification, Notifier, UserDirectory};

/// One line typed by the user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    /// Text to send along with any staged attachments.
    Message(String),
    /// Stage an attachment for the next message.
    Attach(Attachment),
    /// Send the staged attachments without text.
    Flush,
    /// Retry after the connection gave up.
    Retry,
    /// Close the session and exit.
    Quit,
    /// Print command help.
    Help,
}

/// Parse a line of input. Lines starting with `/` are commands.
pub fn parse_input(line: &str) -> Result<Option<Input>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Some(Input::Message(line.to_owned())));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let input = match name {
        "quit" | "exit" => Input::Quit,
        "retry" => Input::Retry,
        "send" => Input::Flush,
        "help" => Input::Help,
        "image" | "file" => {
            let (Some(file_name), Some(url), None) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(format!("usage: /{name} <name> <url>"));
            };
            let kind = if name == "image" {
                AttachmentKind::Image
            } else {
                AttachmentKind::File
            };
            Input::Attach(Attachment {
                name: file_name.to_owned(),
                url: url.to_owned(),
                kind,
            })
        }
        other => return Err(format!("unknown command /{other}, try /help")),
    };
    Ok(Some(input))
}

/// Command summary printed by `/help`.
pub const HELP: &str = "\
/image <name> <url>  stage an inline image for the next message
/file <name> <url>   stage a file link for the next message
/send                send staged attachments without text
/retry               reconnect after the connection gave up
/quit                close the chat";

/// Render a message as one terminal block.
pub fn render_message(message: &ChatMessage, directory: &UserDirectory) -> String {
    let author = directory
        .display_name(&message.author_id)
        .unwrap_or_else(|| message.author_id.to_string());
    let time = message.timestamp.format("%Y-%m-%d %H:%M");
    format!("[{time}] {author}: {}", message.body)
}

/// Notifier that rings the terminal bell and prints to stderr.
#[derive(Debug)]
pub struct TerminalNotifier {
    enabled: bool,
}

impl TerminalNotifier {
    /// `enabled` stands in for the user's notification permission.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Notifier for TerminalNotifier {
    fn permission_granted(&self) -> bool {
        self.enabled
    }

    fn raise(&self, notification: Notification) {
        let mut stderr = std::io::stderr().lock();
        // Nowhere to report a broken stderr.
        let _ = writeln!(
            stderr,
            "\x07** {} (ticket {}): {}",
            notification.title, notification.ticket_id, notification.body
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
