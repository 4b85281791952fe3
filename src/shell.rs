//! Blocking execution of external tool command chains.
//!
//! A job composes one `&&`-joined command line (activation prefix first,
//! then the tool subcommands) and runs it as a single `sh -c` child with
//! inherited stdio, so tool progress lands in the RELION job log. A later
//! command only runs if every earlier one succeeded; a non-zero aggregate
//! exit fails the whole job with no retry.

use anyhow::{bail, Context, Result};
use std::process::Command;

#[derive(Debug, Default)]
pub struct CommandChain {
    parts: Vec<String>,
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain starting with an optional environment-activation prefix.
    pub fn with_activation(activate: Option<&str>) -> Self {
        let mut chain = Self::new();
        if let Some(prefix) = activate {
            chain.push(prefix);
        }
        chain
    }

    pub fn push(&mut self, command: impl Into<String>) {
        self.parts.push(command.into());
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// The full shell line, commands joined by strict sequential `&&`.
    pub fn rendered(&self) -> String {
        self.parts.join(" && ")
    }

    /// Run the chain and block until the child exits.
    pub fn run(&self) -> Result<()> {
        let line = self.rendered();
        let status = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .status()
            .context("failed to spawn shell for external tool")?;
        if !status.success() {
            match status.code() {
                Some(code) => bail!("command failed with return code {code}"),
                None => bail!("command terminated by signal"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_with_sequential_and() {
        let mut chain = CommandChain::with_activation(Some("conda activate topaz"));
        chain.push("topaz preprocess --scale 4");
        chain.push("topaz extract --radius 15");
        assert_eq!(
            chain.rendered(),
            "conda activate topaz && topaz preprocess --scale 4 && topaz extract --radius 15"
        );
    }

    #[test]
    fn no_activation_means_no_prefix() {
        let mut chain = CommandChain::with_activation(None);
        chain.push("true");
        assert_eq!(chain.rendered(), "true");
    }

    #[test]
    fn zero_exit_is_ok() {
        let mut chain = CommandChain::new();
        chain.push("true");
        chain.push("true");
        assert!(chain.run().is_ok());
    }

    #[test]
    fn nonzero_exit_fails_and_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let witness = dir.path().join("ran_anyway");
        let mut chain = CommandChain::new();
        chain.push("exit 3");
        chain.push(format!("touch {}", witness.display()));
        let err = chain.run().unwrap_err();
        assert!(err.to_string().contains("return code 3"));
        assert!(!witness.exists());
    }
}
