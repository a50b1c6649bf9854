//! Interactive yes/no gates.
//!
//! Destructive or privacy-relevant actions (record removal, location access)
//! are split into a confirmation step and an execution step. The gate is the
//! confirmation step, kept separate so it can be swapped out in tests and in
//! non-interactive runs.

use std::io::{BufRead, Write};
use std::sync::Mutex;

use tracing::debug;

/// Outcome of a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Go ahead with the action.
    Proceed,
    /// Leave everything as it is.
    Abort,
}

impl Decision {
    /// Whether the action should go ahead.
    #[must_use]
    pub fn is_proceed(self) -> bool {
        self == Self::Proceed
    }
}

/// A blocking yes/no gate.
pub trait Confirm: Send + Sync {
    /// Ask the operator and return their decision.
    fn confirm(&self, prompt: &str) -> Decision;
}

/// Gate that always returns the same decision (`--yes`, tests).
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub Decision);

impl Confirm for FixedDecision {
    fn confirm(&self, prompt: &str) -> Decision {
        debug!(prompt, decision = ?self.0, "Confirmation answered without prompting");
        self.0
    }
}

/// Gate that prompts on a terminal-like reader/writer pair.
///
/// Only an explicit `y` or `yes` (any case) proceeds; anything else,
/// including end of input or a read error, aborts.
#[derive(Debug)]
pub struct PromptConfirm<R, W> {
    io: Mutex<(R, W)>,
}

impl<R, W> PromptConfirm<R, W> {
    /// Create a gate reading answers from `reader` and writing prompts to `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            io: Mutex::new((reader, writer)),
        }
    }
}

impl PromptConfirm<std::io::BufReader<std::io::Stdin>, std::io::Stderr> {
    /// Prompt on stderr and read the answer from stdin.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(std::io::BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R, W> Confirm for PromptConfirm<R, W>
where
    R: BufRead + Send,
    W: Write + Send,
{
    fn confirm(&self, prompt: &str) -> Decision {
        let Ok(mut io) = self.io.lock() else {
            return Decision::Abort;
        };
        let (reader, writer) = &mut *io;

        if write!(writer, "{prompt} [y/N] ").and_then(|()| writer.flush()).is_err() {
            return Decision::Abort;
        }

        let mut answer = String::new();
        match reader.read_line(&mut answer) {
            Ok(0) | Err(_) => Decision::Abort,
            Ok(_) => match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => Decision::Proceed,
                _ => Decision::Abort,
            },
        }
    }
}
