//! Error types.
//!
//! [`Error`] is the normalized failure value that flows through the request
//! lifecycle: business code builds one directly, the classifier wraps
//! everything else into one, and response emission renders it. [`ServeError`]
//! surfaces infrastructure failures of the host server (binding a port,
//! accepting a connection).

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::sync::Arc;

type Source = Arc<dyn std::error::Error + Send + Sync + 'static>;

// ── Error ─────────────────────────────────────────────────────────────────────

/// A normalized request failure.
///
/// Carries a `code` (empty until classified), a client-facing `message`, a
/// `system` flag separating internal faults from client faults, an
/// append-only cause `chain` and, when captured, a [`Stack`].
///
/// ```rust
/// use tsu_lifecycle::Error;
///
/// let err = Error::new("user not found").with_code("404").chain("lookup by id");
/// assert_eq!(err.code(), "404");
/// assert!(!err.is_system());
/// ```
#[derive(Clone)]
pub struct Error {
    code: String,
    message: String,
    system: bool,
    chain: Vec<String>,
    stack: Option<Arc<Stack>>,
    source: Option<Source>,
    pub(crate) reported: bool,
}

impl Error {
    /// A client fault with no code yet.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: String::new(),
            message: message.into(),
            system: false,
            chain: Vec::new(),
            stack: None,
            source: None,
            reported: false,
        }
    }

    /// An internal fault. Rendered as `"system error"` in production.
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(message).into_system()
    }

    /// Wraps an arbitrary error, keeping it as the `source`.
    ///
    /// The message is the wrapped error's `Display`; each further cause in its
    /// `source()` chain is appended to [`chain`](Error::chain_links).
    pub fn wrap<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::wrap_arc(Arc::new(source))
    }

    pub(crate) fn wrap_boxed(source: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        Self::wrap_arc(Arc::from(source))
    }

    fn wrap_arc(source: Source) -> Self {
        let mut err = Self::new(source.to_string());
        let mut cause = source.source();
        while let Some(c) = cause {
            err.chain.push(c.to_string());
            cause = c.source();
        }
        err.source = Some(source);
        err
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn into_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Appends one link to the cause chain.
    pub fn chain(mut self, link: impl Into<String>) -> Self {
        self.chain.push(link.into());
        self
    }

    /// Captures a stack trace if `RUST_BACKTRACE` enables it.
    pub fn with_stack(mut self) -> Self {
        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            self.stack = Some(Arc::new(Stack::new(backtrace, 0)));
        }
        self
    }

    /// Unconditionally captures a stack trace, hiding the innermost `skip` frames.
    pub(crate) fn with_forced_stack(mut self, skip: usize) -> Self {
        self.stack = Some(Arc::new(Stack::new(Backtrace::force_capture(), skip)));
        self
    }

    pub(crate) fn set_code(&mut self, code: &str) {
        self.code = code.to_owned();
    }

    pub fn code(&self) -> &str { &self.code }
    pub fn message(&self) -> &str { &self.message }
    pub fn is_system(&self) -> bool { self.system }
    pub fn chain_links(&self) -> &[String] { &self.chain }
    pub fn stack(&self) -> Option<&Stack> { self.stack.as_deref() }

    /// Multi-line diagnostic rendering: message, cause chain, then stack.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if !self.code.is_empty() {
            out.push_str(&format!("[{}] ", self.code));
        }
        out.push_str(&self.message);
        for link in &self.chain {
            out.push_str("\ncaused by: ");
            out.push_str(link);
        }
        if let Some(stack) = &self.stack {
            out.push_str("\nstack:\n");
            out.push_str(&stack.to_string());
        }
        out
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("code", &self.code)
            .field("message", &self.message)
            .field("system", &self.system)
            .field("chain", &self.chain)
            .field("stack", &self.stack.is_some())
            .finish()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ── Stack ─────────────────────────────────────────────────────────────────────

/// A captured stack trace with the innermost frames hidden.
///
/// Recovery captures the stack at the unwinding boundary; the first frames
/// belong to the capture machinery itself and are skipped when rendering.
pub struct Stack {
    backtrace: Backtrace,
    skip: usize,
}

impl Stack {
    fn new(backtrace: Backtrace, skip: usize) -> Self {
        Self { backtrace, skip }
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self.backtrace.to_string();
        let mut frame: Option<usize> = None;
        for line in rendered.lines() {
            // Frame headers look like "  12: symbol"; "at file:line" lines follow.
            let trimmed = line.trim_start();
            if let Some((index, _)) = trimmed.split_once(':') {
                if let Ok(n) = index.parse::<usize>() {
                    frame = Some(n);
                }
            }
            if frame.is_some_and(|n| n >= self.skip) {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack").field("skip", &self.skip).finish_non_exhaustive()
    }
}

// ── ServeError ────────────────────────────────────────────────────────────────

/// The error type returned by [`Server::serve`](crate::Server::serve).
///
/// Request failures are expressed as [`Error`] values rendered into
/// envelopes. This type surfaces infrastructure failures only.
#[derive(Debug)]
pub struct ServeError(std::io::Error);

impl fmt::Display for ServeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io: {}", self.0)
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for ServeError {
    fn from(e: std::io::Error) -> Self {
        Self(e)
    }
}
