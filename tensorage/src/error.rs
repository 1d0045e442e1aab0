use std::fmt::Display;

use tracing_error::SpanTrace;

/// An error kind together with the tracing span it was raised in.
///
/// Every layer of the crate defines its own `thiserror` kind enum and aliases
/// `TGError<Kind>` as its error type, so callers can match on [`TGError::kind`] while
/// still getting the span context when the error is printed.
#[derive(Debug)]
pub struct TGError<E> {
    pub kind: E,
    pub context: SpanTrace,
}

impl<E> TGError<E> {
    pub fn new(kind: E) -> Self {
        Self::with_context(kind, SpanTrace::capture())
    }

    pub fn with_context(kind: E, context: SpanTrace) -> Self {
        Self { kind, context }
    }

    pub fn kind(&self) -> &E {
        &self.kind
    }

    pub fn span(&self) -> &SpanTrace {
        &self.context
    }
}

impl<E: Display> std::fmt::Display for TGError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)?;
        write!(f, "\n\ncontext:\n{}\n", self.context)?;
        Ok(())
    }
}

impl<E: std::error::Error + 'static> std::error::Error for TGError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }

    fn cause(&self) -> Option<&dyn std::error::Error> {
        self.source()
    }
}
