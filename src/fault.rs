//! Recognised failure shapes.
//!
//! Anything a handler can fail with is funnelled into one closed sum type so
//! the classifier can pattern-match instead of guessing at runtime types.
//! Unknown errors land in [`Fault::Opaque`] deterministically.

use std::fmt;

use crate::error::Error;

/// A raised failure awaiting classification.
pub enum Fault {
    /// Already normalized, possibly pre-coded by business code.
    Error(Error),
    /// The request body was not valid JSON for the target type.
    Syntax(serde_json::Error),
    /// Structured multi-field validation failed.
    Validation(FieldViolations),
    /// Form decoding failed.
    Form(FormErrors),
    /// Anything else. Always classified as a system fault.
    Opaque {
        type_name: &'static str,
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Fault {
    /// Wraps an unrecognised error, remembering its type name for diagnostics.
    pub fn opaque<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Opaque { type_name: std::any::type_name::<E>(), source: Box::new(err) }
    }

    /// Name of the concrete failure type, for diagnostic records.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Error(_) => std::any::type_name::<Error>(),
            Self::Syntax(_) => std::any::type_name::<serde_json::Error>(),
            Self::Validation(_) => std::any::type_name::<FieldViolations>(),
            Self::Form(_) => std::any::type_name::<FormErrors>(),
            Self::Opaque { type_name, .. } => type_name,
        }
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => f.debug_tuple("Error").field(e).finish(),
            Self::Syntax(e) => f.debug_tuple("Syntax").field(e).finish(),
            Self::Validation(v) => f.debug_tuple("Validation").field(v).finish(),
            Self::Form(e) => f.debug_tuple("Form").field(e).finish(),
            Self::Opaque { type_name, source } => f
                .debug_struct("Opaque")
                .field("type_name", type_name)
                .field("source", source)
                .finish(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(e) => e.fmt(f),
            Self::Syntax(e) => e.fmt(f),
            Self::Validation(v) => v.fmt(f),
            Self::Form(e) => e.fmt(f),
            Self::Opaque { source, .. } => source.fmt(f),
        }
    }
}

impl From<Error> for Fault {
    fn from(e: Error) -> Self { Self::Error(e) }
}

impl From<serde_json::Error> for Fault {
    fn from(e: serde_json::Error) -> Self { Self::Syntax(e) }
}

impl From<FieldViolations> for Fault {
    fn from(v: FieldViolations) -> Self { Self::Validation(v) }
}

impl From<FormErrors> for Fault {
    fn from(e: FormErrors) -> Self { Self::Form(e) }
}

impl From<std::io::Error> for Fault {
    fn from(e: std::io::Error) -> Self { Self::opaque(e) }
}

// ── Field validation ──────────────────────────────────────────────────────────

/// One failed field rule.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into() }
    }

    pub fn required(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{field} is required");
        Self { field, message }
    }

    pub fn positive(field: impl Into<String>) -> Self {
        let field = field.into();
        let message = format!("{field} must be greater than 0");
        Self { field, message }
    }
}

/// Every rule a value failed, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FieldViolations(Vec<FieldViolation>);

impl FieldViolations {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, violation: FieldViolation) {
        self.0.push(violation);
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
    pub fn len(&self) -> usize { self.0.len() }
    pub fn iter(&self) -> std::slice::Iter<'_, FieldViolation> { self.0.iter() }

    /// `Ok(())` when nothing was pushed, `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl FromIterator<FieldViolation> for FieldViolations {
    fn from_iter<I: IntoIterator<Item = FieldViolation>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for FieldViolations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<&str> = self.0.iter().map(|v| v.message.as_str()).collect();
        f.write_str(&messages.join("; "))
    }
}

impl std::error::Error for FieldViolations {}

/// Implemented by request bodies that carry field rules.
///
/// ```rust
/// use tsu_lifecycle::{FieldViolation, FieldViolations, Validate};
///
/// struct Signup { name: String, age: i64 }
///
/// impl Validate for Signup {
///     fn validate(&self) -> Result<(), FieldViolations> {
///         let mut v = FieldViolations::new();
///         if self.name.is_empty() { v.push(FieldViolation::required("name")); }
///         if self.age <= 0 { v.push(FieldViolation::positive("age")); }
///         v.into_result()
///     }
/// }
/// ```
pub trait Validate {
    fn validate(&self) -> Result<(), FieldViolations>;
}

// ── Form decoding ─────────────────────────────────────────────────────────────

/// Form decoding failures, keyed by field where the decoder could tell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormErrors(Vec<(Option<String>, String)>);

impl FormErrors {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, field: Option<String>, message: impl Into<String>) {
        self.0.push((field, message.into()));
    }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl From<serde_urlencoded::de::Error> for FormErrors {
    fn from(e: serde_urlencoded::de::Error) -> Self {
        let mut errors = Self::new();
        errors.push(None, e.to_string());
        errors
    }
}

impl fmt::Display for FormErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, message)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            match field {
                Some(field) => write!(f, "{field}: {message}")?,
                None => f.write_str(message)?,
            }
        }
        Ok(())
    }
}

impl std::error::Error for FormErrors {}
