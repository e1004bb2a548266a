//! Error classification.
//!
//! The single normalization point: every failure on its way to the wire or
//! the logs passes through [`Context::classify`], which is also the one place
//! guaranteeing a non-empty code.
//!
//! | Fault | Code | System |
//! |---|---|---|
//! | `Error` with a code | kept | kept |
//! | `Error` without a code | System | kept |
//! | `Syntax` / `Form` | ReadParams | no |
//! | `Validation` | Validation | no |
//! | `Opaque` | System | yes |
//!
//! Outside production, system faults, errors carrying a stack, and opaque
//! failures also produce one diagnostic record each.

use tracing::error;

use crate::context::Context;
use crate::error::Error;
use crate::fault::Fault;
use crate::settings::ErrorCategory;

/// `tracing` target of diagnostic records.
pub const DIAGNOSTIC_TARGET: &str = "tsu_lifecycle::diagnostic";

impl Context {
    /// Normalizes any raised failure into an [`Error`] with a non-empty code.
    pub fn classify(&self, fault: impl Into<Fault>) -> Error {
        let fault = fault.into();
        let kind = fault.type_name();
        let codes = self.settings().codes();

        match fault {
            Fault::Error(mut err) => {
                if err.code().is_empty() {
                    err.set_code(codes.get(ErrorCategory::System));
                }
                if err.is_system() || err.stack().is_some() {
                    self.diagnose(kind, &mut err);
                }
                err
            }
            Fault::Syntax(e) => Error::wrap(e).with_code(codes.get(ErrorCategory::ReadParams)),
            Fault::Form(e) => Error::wrap(e).with_code(codes.get(ErrorCategory::ReadParams)),
            Fault::Validation(violations) => {
                let mut err = Error::new(violations.to_string())
                    .with_code(codes.get(ErrorCategory::Validation));
                for v in violations.iter() {
                    err = err.chain(v.message.clone());
                }
                err
            }
            Fault::Opaque { source, .. } => {
                let mut err = Error::wrap_boxed(source)
                    .with_code(codes.get(ErrorCategory::System))
                    .into_system();
                self.diagnose(kind, &mut err);
                err
            }
        }
    }

    /// Emits the non-production diagnostic record, once per error.
    fn diagnose(&self, kind: &str, err: &mut Error) {
        if err.reported || self.is_production() {
            return;
        }
        error!(target: DIAGNOSTIC_TARGET, kind, rid = self.rid(), "Error: {kind}\n{}", err.report());
        err.reported = true;
    }
}
