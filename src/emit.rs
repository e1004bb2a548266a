//! Response emission.
//!
//! Every write path terminates the pipeline first and then checks whether a
//! body was already written: the first write wins, later ones are dropped.
//! Production redaction happens here and nowhere else.

use tracing::{debug, error};

use crate::context::Context;
use crate::envelope::{Content, Envelope, Payload};
use crate::error::Error;
use crate::fault::Fault;
use crate::handler::Reply;
use crate::response::ContentType;

/// Message shown instead of a system fault's own message in production.
pub const REDACTED_MESSAGE: &str = "system error";

impl Context {
    /// Writes a success envelope.
    pub fn success(&mut self, reply: impl Into<Reply>) {
        self.terminate();
        if self.written {
            debug!(rid = self.rid(), "response already written, success dropped");
            return;
        }

        let mut envelope = match reply.into() {
            Reply::Envelope(envelope) => envelope,
            Reply::Data(data) => {
                let mut envelope = self.new_envelope();
                envelope.set_code(self.settings().success_code());
                if let Some(data) = data.filter(|d| !d.is_nil()) {
                    envelope.set_data(data);
                }
                envelope
            }
        };
        if !self.rid().is_empty() {
            envelope.set_rid(self.rid());
        }
        self.write_envelope(envelope.as_ref());
    }

    /// Classifies `fault`, records it and writes an error envelope.
    pub fn error(&mut self, fault: impl Into<Fault>) {
        self.error_with(fault, None);
    }

    /// Like [`error`](Self::error), attaching `data` to the envelope.
    pub fn error_with(&mut self, fault: impl Into<Fault>, data: Option<Payload>) {
        self.terminate();
        if self.written {
            debug!(rid = self.rid(), "response already written, error dropped");
            return;
        }

        let err = self.classify(fault);
        self.record_err(&err);

        let mut envelope = self.new_envelope();
        envelope.set_code(err.code());
        envelope.set_message(self.public_message(&err));
        if let Some(data) = data.filter(|d| !d.is_nil()) {
            envelope.set_data(data);
        }
        if !self.rid().is_empty() {
            envelope.set_rid(self.rid());
        }
        if err.is_system() {
            envelope.set_system();
        }
        if !err.chain_links().is_empty() {
            envelope.set_chain(err.chain_links());
        }
        self.write_envelope(envelope.as_ref());
    }

    /// Classifies `fault`, records it and renders the configured error view
    /// with `[<code>]<message>`.
    pub fn error_view(&mut self, fault: impl Into<Fault>) {
        self.terminate();
        if self.written {
            debug!(rid = self.rid(), "response already written, error view dropped");
            return;
        }

        let err = self.classify(fault);
        self.record_err(&err);

        let mut message = self.public_message(&err).to_owned();
        if !self.rid().is_empty() {
            message.push_str(" rid:");
            message.push_str(self.rid());
        }
        let message = format!("[{}]{}", err.code(), message);

        let rendered = {
            let settings = self.settings();
            settings.views().render(settings.error_view(), &message)
        };
        match rendered {
            Ok(body) => self.response.set_body(ContentType::Html, body),
            Err(e) => self.construction_failed(e),
        }
        self.written = true;
    }

    /// Writes the status text as plain text, used when the client negotiated
    /// no representation.
    pub(crate) fn write_text(&mut self, text: &str) {
        if self.written {
            return;
        }
        self.response.set_body(ContentType::Text, text.to_owned());
        self.written = true;
    }

    fn public_message<'e>(&self, err: &'e Error) -> &'e str {
        if err.is_system() && self.is_production() {
            REDACTED_MESSAGE
        } else {
            err.message()
        }
    }

    fn write_envelope(&mut self, envelope: &dyn Envelope) {
        match envelope.content() {
            Ok(Content::Structured(bytes)) => self.response.set_body(ContentType::Json, bytes),
            Ok(Content::Text(text)) => self.response.set_body(ContentType::Text, text),
            Ok(Content::Binary(bytes)) => self.response.set_body(ContentType::OctetStream, bytes),
            Err(e) => self.construction_failed(e),
        }
        self.written = true;
    }

    /// An envelope or view could not be built. Nothing of it reaches the
    /// client; the request turns into a plain 500.
    fn construction_failed(&mut self, err: Error) {
        error!(rid = self.rid(), error = %err, "response construction failed");
        let err = err.with_code(&self.settings().codes().system).into_system();
        self.set_err(err);
        self.set_status(http::StatusCode::INTERNAL_SERVER_ERROR);
        self.response.set_body(ContentType::Text, "Internal Server Error");
    }
}
