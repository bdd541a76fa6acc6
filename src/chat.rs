//! Interactive terminal client.
//!
//! All display decisions live in [`ChatView`], a plain state machine fed
//! with server events and user input; [`run`] only moves bytes between it,
//! stdin/stdout and the socket.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use parley_core::events::OutboundEvent;
use parley_core::identity;
use parley_core::suggestions::SUGGESTION_COUNT;

/// Shown when the user tries to send with no open socket.
pub const LOST_CONNECTION: &str = "Lost connection to server.";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One line of user input, classified.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Send(String),
    /// `/1`..`/3`: send the corresponding visible suggestion (1-based).
    Pick(usize),
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line == "/quit" {
        return Input::Quit;
    }
    if let Some(n) = line.strip_prefix('/').and_then(|n| n.parse::<usize>().ok()) {
        if (1..=SUGGESTION_COUNT).contains(&n) {
            return Input::Pick(n);
        }
    }
    Input::Send(line.to_string())
}

/// What the client loop should do after a line of input.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    /// Write `frame` to the socket, then print `echo`.
    Send { frame: String, echo: String },
    Notice(String),
    Quit,
    Nothing,
}

/// Client-side view state.
#[derive(Debug)]
pub struct ChatView {
    name: String,
    /// Sender of the latest relayed message. Suggestions for anyone else
    /// answer an older message and are ignored.
    last_sender: Option<String>,
    suggestions: Vec<String>,
}

impl ChatView {
    /// `fallback_name` is used until the server announces one.
    pub fn new(fallback_name: impl Into<String>) -> Self {
        Self {
            name: fallback_name.into(),
            last_sender: None,
            suggestions: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Suggestions currently on screen; empty when hidden.
    pub fn suggestions(&self) -> &[String] {
        &self.suggestions
    }

    /// Apply a server event and return the lines to print.
    pub fn apply(&mut self, event: OutboundEvent) -> Vec<String> {
        match event {
            OutboundEvent::Identity { name } => {
                self.name = name;
                vec![format!("You are {}.", self.name)]
            }
            OutboundEvent::Message { sender, content } => {
                // Anything on screen answered an older message.
                self.suggestions.clear();
                let line = format!("{sender}: {content}");
                self.last_sender = Some(sender);
                vec![line]
            }
            OutboundEvent::Suggestions { sender, content } => {
                if self.last_sender.as_deref() != Some(sender.as_str()) {
                    tracing::debug!(%sender, "ignoring suggestions for an older message");
                    return Vec::new();
                }
                if content.len() != SUGGESTION_COUNT {
                    self.suggestions.clear();
                    return Vec::new();
                }
                let mut lines = vec![format!("Suggested replies to {sender}:")];
                lines.extend(
                    content
                        .iter()
                        .enumerate()
                        .map(|(i, text)| format!("  /{} {}", i + 1, text)),
                );
                self.suggestions = content;
                lines
            }
        }
    }

    pub fn handle_input(&mut self, input: Input) -> Action {
        match input {
            Input::Empty => Action::Nothing,
            Input::Quit => Action::Quit,
            Input::Send(text) => self.compose(text),
            Input::Pick(n) => match n.checked_sub(1).and_then(|i| self.suggestions.get(i)).cloned() {
                Some(text) => self.compose(text),
                None => Action::Notice(format!("No suggestion /{n} to send.")),
            },
        }
    }

    fn compose(&mut self, content: String) -> Action {
        self.suggestions.clear();
        let frame = serde_json::json!({ "sender": self.name, "content": content }).to_string();
        Action::Send {
            frame,
            echo: format!("{} (you): {}", self.name, content),
        }
    }
}

enum Event {
    Line(std::io::Result<Option<String>>),
    Frame(Option<Result<Message, tungstenite::Error>>),
}

/// Run the interactive client against `url` until `/quit` or end of input.
pub async fn run(url: &str) -> Result<()> {
    let mut view = ChatView::new(identity::assign());
    let mut socket = match connect_async(url).await {
        Ok((socket, _)) => {
            println!("Connected to {url}. Type a message, /1-/3 to send a suggestion, /quit to exit.");
            Some(socket)
        }
        Err(e) => {
            tracing::warn!(url, error = %e, "connect failed");
            println!("{LOST_CONNECTION}");
            None
        }
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let event = tokio::select! {
            line = lines.next_line() => Event::Line(line),
            frame = next_frame(&mut socket) => Event::Frame(frame),
        };

        match event {
            Event::Line(line) => {
                let Some(line) = line? else { break };
                match view.handle_input(parse_input(&line)) {
                    Action::Quit => break,
                    Action::Nothing => {}
                    Action::Notice(text) => println!("{text}"),
                    Action::Send { frame, echo } => {
                        let sent = match socket.as_mut() {
                            Some(ws) => ws.send(Message::text(frame)).await.is_ok(),
                            None => false,
                        };
                        if sent {
                            println!("{echo}");
                        } else {
                            socket = None;
                            println!("{LOST_CONNECTION}");
                        }
                    }
                }
            }
            Event::Frame(Some(Ok(Message::Text(text)))) => {
                match serde_json::from_str::<OutboundEvent>(text.as_str()) {
                    Ok(event) => {
                        for line in view.apply(event) {
                            println!("{line}");
                        }
                    }
                    Err(e) => tracing::debug!(error = %e, "ignoring unknown frame"),
                }
            }
            Event::Frame(Some(Ok(Message::Close(_))) | Some(Err(_)) | None) => {
                tracing::warn!("server closed the connection");
                socket = None;
            }
            Event::Frame(Some(Ok(_))) => {}
        }
    }

    if let Some(mut ws) = socket {
        let _ = ws.close(None).await;
    }
    Ok(())
}

/// Next frame from the socket; never resolves while disconnected.
async fn next_frame(socket: &mut Option<Socket>) -> Option<Result<Message, tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}
