//! Console input: chat commands and the secret prompt.
//!
//! One task reads stdin line by line.  Each line goes to exactly one place:
//!
//! - if a prompt is waiting (e.g. "enter the shared names"), the line answers
//!   that prompt;
//! - otherwise it is parsed as a [`ConsoleCommand`].
//!
//! The prompt and the command stream share stdin this way without two
//! readers racing for the same line.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lanchat_core::{ConnectionId, Secret, SecretProvider};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// `/quit`
    Quit,
    /// `/disconnect`
    Disconnect,
    /// `/connect <host:port>`
    Connect(String),
    /// `/status`
    Status,
    /// Any line that does not start with `/`.
    Say(String),
    /// A `/word` we do not know.
    Unknown(String),
}

/// Parses one console line.  Blank lines yield `None`.
pub fn parse_command(line: &str) -> Option<ConsoleCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ConsoleCommand::Say(line.to_string()));
    };

    let (word, arg) = match rest.split_once(char::is_whitespace) {
        Some((word, arg)) => (word, arg.trim()),
        None => (rest, ""),
    };
    let command = match word {
        "quit" | "exit" => ConsoleCommand::Quit,
        "disconnect" => ConsoleCommand::Disconnect,
        "status" => ConsoleCommand::Status,
        "connect" if !arg.is_empty() => ConsoleCommand::Connect(arg.to_string()),
        _ => ConsoleCommand::Unknown(line.to_string()),
    };
    Some(command)
}

type PromptSlot = Arc<Mutex<Option<oneshot::Sender<String>>>>;

/// Routes console lines either to a pending prompt or to the command channel.
pub struct ConsoleRouter {
    prompt: PromptSlot,
    commands: mpsc::Sender<ConsoleCommand>,
}

impl ConsoleRouter {
    pub fn new() -> (Arc<Self>, mpsc::Receiver<ConsoleCommand>) {
        let (commands, rx) = mpsc::channel(32);
        let router = Arc::new(Self {
            prompt: Arc::new(Mutex::new(None)),
            commands,
        });
        (router, rx)
    }

    /// `true` while a prompt is still being awaited.  An abandoned prompt
    /// (its future dropped) does not count.
    pub fn has_pending_prompt(&self) -> bool {
        self.prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|answer| !answer.is_closed())
    }

    /// Delivers one line.  Returns `false` once the command receiver is gone.
    pub async fn route_line(&self, line: &str) -> bool {
        let waiting = self
            .prompt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(answer) = waiting {
            if answer.send(line.trim().to_string()).is_ok() {
                return true;
            }
            debug!("prompt was abandoned; treating line as a command");
        }

        match parse_command(line) {
            Some(command) => self.commands.send(command).await.is_ok(),
            None => true,
        }
    }

    /// Prints `text` and waits for the next console line.
    ///
    /// Returns `None` if the prompt is superseded by another prompt or stdin
    /// closes.
    pub async fn prompt(&self, text: &str) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        *self.prompt.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        println!("{text}");
        rx.await.ok()
    }

    /// Reads stdin until EOF, then sends [`ConsoleCommand::Quit`].
    pub fn spawn_stdin(self: &Arc<Self>) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !router.route_line(&line).await {
                            break;
                        }
                    }
                    Ok(None) | Err(_) => {
                        // Pending prompt sees a closed channel and cancels.
                        router
                            .prompt
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        let _ = router.commands.send(ConsoleCommand::Quit).await;
                        break;
                    }
                }
            }
        })
    }
}

/// Asks the local user for the shared names on the console.
pub struct PromptSecretProvider {
    router: Arc<ConsoleRouter>,
    name_count: usize,
}

impl PromptSecretProvider {
    pub fn new(router: Arc<ConsoleRouter>, name_count: usize) -> Self {
        Self { router, name_count }
    }
}

#[async_trait]
impl SecretProvider for PromptSecretProvider {
    /// An empty line cancels.
    async fn request_secret(&self, connection_id: &ConnectionId) -> Option<Secret> {
        debug!(connection = %connection_id, "prompting for shared names");
        let text = format!(
            "Peer is asking for the {} shared names (comma separated, empty line cancels):",
            self.name_count
        );
        let line = self.router.prompt(&text).await?;
        if line.trim().is_empty() {
            return None;
        }
        Some(Secret::parse(&line))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
