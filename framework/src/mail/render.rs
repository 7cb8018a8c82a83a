//! View rendering.

use std::error::Error as _;

use serde_json::Value;

use super::{locale, MailError};

/// Data handed to a view.
pub type ViewData = serde_json::Map<String, Value>;

/// Renders a named view with data. Called from inside the locale scope of the mailable
/// being rendered, so implementations may consult [`locale::current`].
pub trait ViewRenderer: Send + Sync {
    fn render(&self, view: &str, data: &ViewData) -> Result<String, MailError>;
}

/// [`ViewRenderer`] backed by Tera templates.
///
/// The current locale is exposed to templates as `locale` unless the data already
/// carries that key.
pub struct TeraRenderer {
    tera: tera::Tera,
}

impl TeraRenderer {
    /// Load every template matching `glob`, e.g. `"templates/**/*"`.
    pub fn new(glob: &str) -> Result<Self, MailError> {
        let tera = tera::Tera::new(glob).map_err(|e| render_error(glob, &e))?;
        Ok(Self { tera })
    }

    /// Build from in-memory `(name, source)` pairs.
    pub fn from_templates<I, N, C>(templates: I) -> Result<Self, MailError>
    where
        I: IntoIterator<Item = (N, C)>,
        N: AsRef<str>,
        C: AsRef<str>,
    {
        let mut tera = tera::Tera::default();
        tera.add_raw_templates(templates)
            .map_err(|e| render_error("<raw>", &e))?;
        Ok(Self { tera })
    }

    pub fn from_tera(tera: tera::Tera) -> Self {
        Self { tera }
    }
}

impl ViewRenderer for TeraRenderer {
    fn render(&self, view: &str, data: &ViewData) -> Result<String, MailError> {
        let mut context = tera::Context::from_value(Value::Object(data.clone()))
            .map_err(|e| render_error(view, &e))?;
        if !context.contains_key("locale") {
            context.insert("locale", &locale::current());
        }
        self.tera
            .render(view, &context)
            .map_err(|e| render_error(view, &e))
    }
}

// Tera reports the useful part of a failure in its source chain.
fn render_error(view: &str, err: &tera::Error) -> MailError {
    let mut reason = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        reason.push_str(": ");
        reason.push_str(&cause.to_string());
        source = cause.source();
    }
    MailError::Render {
        view: view.to_string(),
        reason,
    }
}
