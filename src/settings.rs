//! Deployment-wide settings.
//!
//! Built once at startup, frozen behind an `Arc` and handed to the
//! [`ContextPool`](crate::ContextPool). Every context borrows the same
//! instance read-only; nothing mutates it per request.
//!
//! ```rust
//! use tsu_lifecycle::Settings;
//!
//! let settings = Settings::builder()
//!     .env("production")
//!     .application_name("billing")
//!     .validation_code("422")
//!     .build();
//!
//! assert!(settings.is_production());
//! assert_eq!(settings.codes().validation, "422");
//! assert_eq!(settings.codes().system, "100");
//! ```

use std::fmt;
use std::sync::Arc;

use crate::envelope::{Envelope, JsonEnvelope};
use crate::view::{PlainView, ViewRenderer};

/// Environment name that turns on redaction and silences diagnostics.
pub const PRODUCTION: &str = "production";

pub const DEFAULT_SYSTEM_CODE: &str = "100";
pub const DEFAULT_READ_PARAMS_CODE: &str = "101";
pub const DEFAULT_VALIDATION_CODE: &str = "102";
pub const DEFAULT_SUCCESS_CODE: &str = "00";

/// Builds a fresh envelope for one response.
pub type EnvelopeFactory = Arc<dyn Fn() -> Box<dyn Envelope> + Send + Sync>;

// ── ErrorCodes ────────────────────────────────────────────────────────────────

/// The three logical error categories the classifier assigns.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCategory {
    System,
    ReadParams,
    Validation,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCodes {
    pub system: String,
    pub read_params: String,
    pub validation: String,
}

impl ErrorCodes {
    pub fn get(&self, category: ErrorCategory) -> &str {
        match category {
            ErrorCategory::System => &self.system,
            ErrorCategory::ReadParams => &self.read_params,
            ErrorCategory::Validation => &self.validation,
        }
    }
}

impl Default for ErrorCodes {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_CODE.to_owned(),
            read_params: DEFAULT_READ_PARAMS_CODE.to_owned(),
            validation: DEFAULT_VALIDATION_CODE.to_owned(),
        }
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

pub struct Settings {
    env: String,
    application_name: String,
    codes: ErrorCodes,
    success_code: String,
    error_view: String,
    envelope: EnvelopeFactory,
    views: Arc<dyn ViewRenderer>,
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    pub fn env(&self) -> &str { &self.env }
    pub fn is_production(&self) -> bool { self.env == PRODUCTION }
    pub fn application_name(&self) -> &str { &self.application_name }
    pub fn codes(&self) -> &ErrorCodes { &self.codes }
    pub fn success_code(&self) -> &str { &self.success_code }
    pub fn error_view(&self) -> &str { &self.error_view }
    pub fn envelope_factory(&self) -> &EnvelopeFactory { &self.envelope }
    pub fn views(&self) -> &dyn ViewRenderer { self.views.as_ref() }
}

impl Default for Settings {
    fn default() -> Self {
        SettingsBuilder::default().build()
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("env", &self.env)
            .field("application_name", &self.application_name)
            .field("codes", &self.codes)
            .field("success_code", &self.success_code)
            .field("error_view", &self.error_view)
            .finish_non_exhaustive()
    }
}

// ── SettingsBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Settings`]. Empty code overrides keep the defaults.
#[derive(Default)]
pub struct SettingsBuilder {
    env: String,
    application_name: String,
    system_code: String,
    read_params_code: String,
    validation_code: String,
    success_code: String,
    error_view: String,
    envelope: Option<EnvelopeFactory>,
    views: Option<Arc<dyn ViewRenderer>>,
}

impl SettingsBuilder {
    /// Seeds the environment and application name from `APP_ENV` / `APP_NAME`.
    pub fn from_env() -> Self {
        Self {
            env: std::env::var("APP_ENV").unwrap_or_default(),
            application_name: std::env::var("APP_NAME").unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn env(mut self, env: impl Into<String>) -> Self {
        self.env = env.into();
        self
    }

    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn system_code(mut self, code: impl Into<String>) -> Self {
        self.system_code = code.into();
        self
    }

    pub fn read_params_code(mut self, code: impl Into<String>) -> Self {
        self.read_params_code = code.into();
        self
    }

    pub fn validation_code(mut self, code: impl Into<String>) -> Self {
        self.validation_code = code.into();
        self
    }

    pub fn success_code(mut self, code: impl Into<String>) -> Self {
        self.success_code = code.into();
        self
    }

    pub fn error_view(mut self, view: impl Into<String>) -> Self {
        self.error_view = view.into();
        self
    }

    pub fn envelope<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Envelope> + Send + Sync + 'static,
    {
        self.envelope = Some(Arc::new(factory));
        self
    }

    pub fn views(mut self, renderer: impl ViewRenderer) -> Self {
        self.views = Some(Arc::new(renderer));
        self
    }

    pub fn build(self) -> Settings {
        fn or(value: String, default: &str) -> String {
            if value.is_empty() { default.to_owned() } else { value }
        }

        Settings {
            env: self.env,
            application_name: self.application_name,
            codes: ErrorCodes {
                system: or(self.system_code, DEFAULT_SYSTEM_CODE),
                read_params: or(self.read_params_code, DEFAULT_READ_PARAMS_CODE),
                validation: or(self.validation_code, DEFAULT_VALIDATION_CODE),
            },
            success_code: or(self.success_code, DEFAULT_SUCCESS_CODE),
            error_view: or(self.error_view, "error"),
            envelope: self
                .envelope
                .unwrap_or_else(|| Arc::new(|| Box::new(JsonEnvelope::new()) as Box<dyn Envelope>)),
            views: self.views.unwrap_or_else(|| Arc::new(PlainView)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_default_independently() {
        let settings = Settings::builder().system_code("E500").read_params_code("").build();
        assert_eq!(settings.codes().system, "E500");
        assert_eq!(settings.codes().read_params, DEFAULT_READ_PARAMS_CODE);
        assert_eq!(settings.codes().get(ErrorCategory::Validation), DEFAULT_VALIDATION_CODE);
        assert_eq!(settings.success_code(), DEFAULT_SUCCESS_CODE);
        assert_eq!(settings.error_view(), "error");
    }

    #[test]
    fn only_production_is_production() {
        assert!(!Settings::builder().env("staging").build().is_production());
        assert!(!Settings::default().is_production());
        assert!(Settings::builder().env(PRODUCTION).build().is_production());
    }
}
