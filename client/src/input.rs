//! Turns typed lines into chat records and incoming records into text.

use shared::{Message, MessageType};

/// What a line typed by the user amounts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    /// Nothing to send.
    Empty,
    /// `/whisper <name>` picks who the next line goes to; bare `/whisper`
    /// goes back to everyone.
    Target(Option<String>),
    /// `/history` prints what this client has seen so far.
    ShowHistory,
    Send(Message),
}

/// Remembers who we are and who the next message is for.
pub struct Composer {
    name: String,
    target: Option<String>,
}

impl Composer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// A whisper target only lasts for one message.
    pub fn compose(&mut self, line: &str) -> Line {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Line::Empty;
        }

        if let Some(rest) = line.strip_prefix("/whisper") {
            if rest.is_empty() || rest.starts_with(' ') {
                let target = rest.trim();
                self.target = (!target.is_empty()).then(|| target.to_string());
                return Line::Target(self.target.clone());
            }
        }
        if line.trim() == "/history" {
            return Line::ShowHistory;
        }

        if line.starts_with('/') {
            return Line::Send(Message::command(&self.name, line));
        }
        match self.target.take() {
            Some(target) => Line::Send(Message::whisper(&self.name, target, line)),
            None => Line::Send(Message::broadcast(&self.name, line)),
        }
    }

    pub fn prompt(&self) -> String {
        format!(
            "=== User: {} to {} ===",
            self.name,
            self.target.as_deref().unwrap_or("everyone")
        )
    }
}

/// One printable line for an incoming record. `me` is our own name, used to
/// tell whispers we sent from whispers we received.
pub fn render(message: &Message, me: &str) -> String {
    match message.kind {
        MessageType::Broadcast | MessageType::Command => {
            format!("{}> {}", message.sender, message.text)
        }
        MessageType::Whisper if message.sender == me => {
            format!("[to {}] {}", message.target, message.text)
        }
        MessageType::Whisper => format!("{} whispered to you> {}", message.sender, message.text),
        MessageType::CommandResponse => format!("[{}] {}", message.sender, message.text),
        MessageType::UserCount => format!("=== Online Chat: {} Connected ===", message.text),
    }
}
