//! Line-oriented stdin shared by the Peril binaries.

use std::io::Write;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

/// Reads commands from stdin one line at a time.
pub struct Repl {
    lines: Lines<BufReader<Stdin>>,
}

impl Repl {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Prints the `> ` prompt without a newline.
    pub fn prompt(&self) {
        print!("> ");
        let _ = std::io::stdout().flush();
    }

    /// The next line, or `None` at end of input. Cancel safe, so it can
    /// sit in a `tokio::select!` next to the shutdown signal.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        self.lines.next_line().await
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}
