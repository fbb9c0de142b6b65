//! Interactive yes/no confirmation.
//!
//! Terms-of-service acceptance and hookless challenge activation both wait
//! for the operator; `-y` swaps in [`AlwaysYes`] for the former only.

use std::io::{self, BufRead as _, Write as _};

use crate::error::{Error, Result};

pub trait Confirm {
    /// Present `prompt` and report whether the operator agreed.
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Prompts on stdout and reads a `y` from stdin.
pub struct Terminal;

impl Confirm for Terminal {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        println!("{prompt}");
        io::stdout()
            .flush()
            .map_err(|err| Error::protocol(format!("stdout: {err}")))?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|err| Error::protocol(format!("stdin: {err}")))?;

        Ok(line.trim().eq_ignore_ascii_case("y"))
    }
}

/// Accepts without asking. Selected by `-y` for terms of service.
pub struct AlwaysYes;

impl Confirm for AlwaysYes {
    fn confirm(&mut self, _prompt: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) struct Scripted {
    pub answers: Vec<bool>,
    pub prompts: Vec<String>,
}

#[cfg(test)]
impl Scripted {
    pub(crate) fn new(answers: &[bool]) -> Self {
        let mut answers = answers.to_vec();
        answers.reverse();
        Scripted {
            answers,
            prompts: Vec::new(),
        }
    }
}

#[cfg(test)]
impl Confirm for Scripted {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        self.prompts.push(prompt.to_owned());
        self.answers
            .pop()
            .ok_or_else(|| Error::protocol("unexpected confirmation prompt"))
    }
}
