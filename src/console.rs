//! Operator-facing console.
//!
//! The suite only talks to the operator at well-defined phase boundaries, through the
//! [`Console`] trait. Two implementations are provided:
//!
//! - [`TerminalConsole`] - stdout for output, stdin for prompts
//! - [`ScriptedConsole`] - canned answers and a recorded transcript, used for
//!   unattended runs and tests
//!
//! Every printed line is mirrored to the `factory` tracing target so the operator
//! transcript file (see [`crate::logging`]) matches what the operator saw.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tracing::{info, warn};

/// Tracing target that carries the operator transcript.
pub const TRANSCRIPT_TARGET: &str = "factory";

/// Default key prompt shown under an action prompt.
pub const PRESS_ENTER: &str = "Press Enter to continue...";

/// Operator collaborator.
#[async_trait]
pub trait Console: Send + Sync {
    /// Prints one line of status or progress output.
    fn print(&self, line: &str);

    /// Shows `message`, then waits for the operator to press Enter.
    /// An empty `key_prompt` suppresses the second line.
    async fn prompt_enter(&self, message: &str, key_prompt: &str);

    /// Asks a `[Y/n]` question. An empty answer counts as yes.
    async fn prompt_yes_no(&self, message: &str) -> bool;

    /// Tells the operator what physical action to perform, without waiting.
    fn prompt_action(&self, message: &str) {
        self.print(&format!(">>> {message}"));
    }

    fn blank(&self) {
        self.print("");
    }
}

/// Interprets a `[Y/n]` answer.
pub fn parse_yes_no(answer: &str) -> bool {
    let answer = answer.trim();
    answer.is_empty() || answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes")
}

// =============================================================================
// TerminalConsole
// =============================================================================

/// Interactive console on the controlling terminal.
pub struct TerminalConsole {
    stdin: tokio::sync::Mutex<BufReader<Stdin>>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self {
            stdin: tokio::sync::Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }

    async fn read_line(&self) -> String {
        let mut line = String::new();
        let mut stdin = self.stdin.lock().await;
        match stdin.read_line(&mut line).await {
            Ok(0) => warn!("stdin closed; treating as empty answer"),
            Ok(_) => {}
            Err(e) => warn!("failed to read operator input: {}", e),
        }
        let line = line.trim_end().to_string();
        info!(target: TRANSCRIPT_TARGET, "{}", line);
        line
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for TerminalConsole {
    fn print(&self, line: &str) {
        println!("{line}");
        info!(target: TRANSCRIPT_TARGET, "{}", line);
    }

    async fn prompt_enter(&self, message: &str, key_prompt: &str) {
        self.blank();
        self.prompt_action(message);
        if !key_prompt.is_empty() {
            self.print(key_prompt);
        }
        self.read_line().await;
    }

    async fn prompt_yes_no(&self, message: &str) -> bool {
        self.blank();
        self.prompt_action(&format!("{message} [Y/n] "));
        parse_yes_no(&self.read_line().await)
    }
}

// =============================================================================
// ScriptedConsole
// =============================================================================

/// Console with pre-recorded yes/no answers.
///
/// Answers are consumed in order; once exhausted, `default_answer` is used. Enter
/// prompts return immediately. Everything shown is kept in [`ScriptedConsole::transcript`].
pub struct ScriptedConsole {
    answers: Mutex<VecDeque<bool>>,
    default_answer: bool,
    transcript: Mutex<Vec<String>>,
    echo: bool,
}

impl ScriptedConsole {
    /// Answers every question with yes.
    pub fn unattended() -> Self {
        Self::with_answers([])
    }

    pub fn with_answers(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            default_answer: true,
            transcript: Mutex::new(Vec::new()),
            echo: false,
        }
    }

    pub fn default_answer(mut self, answer: bool) -> Self {
        self.default_answer = answer;
        self
    }

    /// Also print to stdout (used by `--unattended`).
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn transcript(&self) -> Vec<String> {
        self.transcript.lock().clone()
    }

    /// True if any recorded line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.transcript.lock().iter().any(|l| l.contains(needle))
    }

    fn record(&self, line: String) {
        if self.echo {
            println!("{line}");
        }
        info!(target: TRANSCRIPT_TARGET, "{}", line);
        self.transcript.lock().push(line);
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    fn print(&self, line: &str) {
        self.record(line.to_string());
    }

    async fn prompt_enter(&self, message: &str, key_prompt: &str) {
        self.record(format!(">>> {message}"));
        if !key_prompt.is_empty() {
            self.record(key_prompt.to_string());
        }
    }

    async fn prompt_yes_no(&self, message: &str) -> bool {
        let answer = self.answers.lock().pop_front().unwrap_or(self.default_answer);
        self.record(format!(
            ">>> {message} [Y/n] {}",
            if answer { "y" } else { "n" }
        ));
        answer
    }
}
