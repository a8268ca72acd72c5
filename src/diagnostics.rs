//! The single sink that all resolution diagnostics flow through. Operations on the symbol table
//! never return errors directly; they record them here and the driver decides when to stop.
//!
//! Everything is mirrored as a `tracing` event so embedders that install a subscriber see
//! diagnostics as they happen. The recorded copies are what `check` turns into a hard failure.

use crate::error::Result;
use itertools::Itertools as _;

#[derive(Default, Debug)]
pub struct Diagnostics {
    errors: Vec<String>,
    warnings: Vec<String>,
    messages: Vec<String>,
}

impl Diagnostics {
    pub(crate) fn error(&mut self, message: String) {
        tracing::error!("{message}");
        self.errors.push(message);
    }

    pub(crate) fn warning(&mut self, message: String) {
        tracing::warn!("{message}");
        self.warnings.push(message);
    }

    /// Informational output, e.g. trace-symbol reports.
    pub(crate) fn message(&mut self, message: String) {
        tracing::info!("{message}");
        self.messages.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Fails if any error has been recorded. Warnings and messages don't affect the outcome.
    pub fn check(&self) -> Result {
        if self.errors.is_empty() {
            return Ok(());
        }
        anyhow::bail!(
            "link failed with {} error(s):\n{}",
            self.errors.len(),
            self.errors.iter().join("\n")
        );
    }
}
