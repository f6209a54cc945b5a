//! Interactive console used by the converser

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;

const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Shows text to the human and returns their reply
#[async_trait]
pub trait Console: Send + Sync {
    async fn ask(&self, prompt: &str) -> Result<String>;
}

/// stdin/stdout console
pub struct TerminalConsole {
    reader: Mutex<BufReader<Stdin>>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        Self {
            reader: Mutex::new(BufReader::new(tokio::io::stdin())),
        }
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for TerminalConsole {
    async fn ask(&self, prompt: &str) -> Result<String> {
        {
            let mut out = std::io::stdout();
            writeln!(out, "{}{}{}", BOLD, prompt, RESET).context("Failed to write to console")?;
            write!(out, "> ").context("Failed to write to console")?;
            out.flush().context("Failed to write to console")?;
        }

        let mut line = String::new();
        let read = self
            .reader
            .lock()
            .await
            .read_line(&mut line)
            .await
            .context("Failed to read from console")?;

        if read == 0 {
            bail!("Console input closed");
        }
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}
