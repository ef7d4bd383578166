use pkgward_core::approval::{Prompt, PromptAnswer};
use std::io::{BufRead, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

/// Operator prompt on the controlling terminal.
///
/// Stdin is read by one background thread for the life of the process so a
/// timed-out question never leaves a half-consumed line behind. In JSON mode
/// everything the prompt writes goes to stderr to keep stdout parseable.
pub struct TerminalPrompt {
    to_stderr: bool,
    lines: OnceLock<Mutex<Receiver<String>>>,
}

impl TerminalPrompt {
    pub fn new(json: bool) -> Self {
        Self {
            to_stderr: json,
            lines: OnceLock::new(),
        }
    }

    /// Prompt that reads answers from `lines` instead of stdin.
    pub fn with_lines(json: bool, lines: Receiver<String>) -> Self {
        Self {
            to_stderr: json,
            lines: OnceLock::from(Mutex::new(lines)),
        }
    }

    fn lines(&self) -> &Mutex<Receiver<String>> {
        self.lines.get_or_init(|| {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            Mutex::new(rx)
        })
    }

    fn write(&self, text: &str) {
        if self.to_stderr {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(text.as_bytes());
            let _ = err.flush();
        } else {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

impl Prompt for TerminalPrompt {
    fn show(&self, text: &str) {
        self.write(text);
    }

    fn ask(&self, question: &str, timeout: Option<Duration>) -> PromptAnswer {
        self.write(&format!("{question} "));
        let rx = self.lines().lock().unwrap_or_else(|p| p.into_inner());
        let answer = match timeout {
            Some(t) => match rx.recv_timeout(t) {
                Ok(line) => PromptAnswer::Line(line),
                Err(RecvTimeoutError::Timeout) => PromptAnswer::TimedOut,
                Err(RecvTimeoutError::Disconnected) => PromptAnswer::Closed,
            },
            None => match rx.recv() {
                Ok(line) => PromptAnswer::Line(line),
                Err(_) => PromptAnswer::Closed,
            },
        };
        match &answer {
            PromptAnswer::Line(_) => {}
            PromptAnswer::TimedOut => self.write("\nno answer before timeout; denied\n"),
            PromptAnswer::Closed => self.write("\ninput closed; denied\n"),
        }
        answer
    }
}
