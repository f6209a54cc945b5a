//! Spinner shown while waiting on the model or the sandbox

use std::io::{stdout, IsTerminal, Write};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};

const CLEAR_LINE: &str = "\x1b[2K\r";
const HIDE_CURSOR: &str = "\x1b[?25l";
const SHOW_CURSOR: &str = "\x1b[?25h";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

const UNICODE_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const ASCII_FRAMES: &[&str] = &["|", "/", "-", "\\"];

/// Running spinner; stops when dropped
pub struct Spinner {
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Start animating `message` on stdout. Inert when stdout is not a terminal.
    pub fn start(message: impl Into<String>) -> Self {
        if !stdout().is_terminal() {
            return Self::inert();
        }

        let message = message.into();
        let frames = if supports_unicode() { UNICODE_FRAMES } else { ASCII_FRAMES };
        let (tx, mut rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let mut tick = interval(Duration::from_millis(80));
            let mut out = stdout();
            let _ = write!(out, "{}", HIDE_CURSOR);

            for frame in frames.iter().cycle() {
                let _ = write!(out, "{}{}{} {}{}", CLEAR_LINE, DIM, frame, message, RESET);
                let _ = out.flush();
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = &mut rx => break,
                }
            }

            let _ = write!(out, "{}{}", CLEAR_LINE, SHOW_CURSOR);
            let _ = out.flush();
        });

        Self {
            stop: Some(tx),
            handle: Some(handle),
        }
    }

    /// A spinner that draws nothing
    pub fn inert() -> Self {
        Self {
            stop: None,
            handle: None,
        }
    }

    /// Stop and wait until the line is cleared
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
            let mut out = stdout();
            let _ = write!(out, "{}{}", CLEAR_LINE, SHOW_CURSOR);
            let _ = out.flush();
        }
    }
}

/// Check if the terminal likely supports Unicode
fn supports_unicode() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" || term == "linux" {
            return false;
        }
    }

    ["LC_ALL", "LC_CTYPE", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .any(|value| value.to_lowercase().contains("utf"))
}
