//! Error-view rendering capability.
//!
//! Templates are not this crate's business. [`Context::error_view`]
//! hands the view name and the formatted message to a [`ViewRenderer`];
//! plug a template engine in through
//! [`SettingsBuilder::views`](crate::SettingsBuilder::views).
//!
//! [`Context::error_view`]: crate::Context::error_view

use bytes::Bytes;

use crate::error::Error;

/// Renders a named view with a single message.
pub trait ViewRenderer: Send + Sync + 'static {
    fn render(&self, view: &str, message: &str) -> Result<Bytes, Error>;
}

/// Default renderer: the escaped message in a bare HTML body.
pub struct PlainView;

impl ViewRenderer for PlainView {
    fn render(&self, _view: &str, message: &str) -> Result<Bytes, Error> {
        let mut out = String::with_capacity(message.len() + 16);
        out.push_str("<p>");
        for ch in message.chars() {
            match ch {
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                '"' => out.push_str("&quot;"),
                c => out.push(c),
            }
        }
        out.push_str("</p>");
        Ok(Bytes::from(out))
    }
}
