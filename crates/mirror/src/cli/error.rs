//! Errors with suggestions for CLI commands

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn source_not_found(name: &str) -> Self {
        Self::new(format!("Source not found: {}", name))
            .with_context("No source is registered under this id or name")
            .with_suggestion("TRY: mirror source list")
    }

    pub fn replica_not_found(path: &Path) -> Self {
        Self::new("Replica not found")
            .with_context(format!("Expected replica at: {}", path.display()))
            .with_suggestion("TRY: mirror source add <name> <endpoint>   # Creates the replica")
            .with_suggestion("TRY: Pass --database to point at an existing replica")
    }

    pub fn invalid_kind(kind: &str) -> Self {
        Self::new(format!("Unknown entity kind: {}", kind)).with_suggestion(
            "TRY: one of scene, performer, studio, tag, group, gallery, image",
        )
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_suggestions() {
        let rendered = HelpfulError::source_not_found("alpha").to_string();
        assert!(rendered.contains("ERROR: Source not found: alpha"));
        assert!(rendered.contains("TRY: mirror source list"));
    }
}
