//! Locale scoping for rendering.
//!
//! The locale a mailable renders in is bound to the task doing the rendering, so
//! concurrent sends in different locales never observe each other's locale. Outside any
//! scope, [`current`] reports the process fallback locale.

use std::future::Future;
use std::sync::{PoisonError, RwLock};

pub const DEFAULT_LOCALE: &str = "en-US";

static FALLBACK: RwLock<Option<String>> = RwLock::new(None);

tokio::task_local! {
    static LOCALE: String;
}

/// The process-wide fallback locale.
pub fn fallback() -> String {
    FALLBACK
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .unwrap_or_else(|| DEFAULT_LOCALE.to_string())
}

pub fn set_fallback(locale: impl Into<String>) {
    *FALLBACK.write().unwrap_or_else(PoisonError::into_inner) = Some(locale.into());
}

pub fn reset_fallback() {
    *FALLBACK.write().unwrap_or_else(PoisonError::into_inner) = None;
}

/// Locale of the enclosing [`scope`], or the fallback locale.
pub fn current() -> String {
    LOCALE.try_with(Clone::clone).unwrap_or_else(|_| fallback())
}

/// Run `fut` with `locale` as the current locale. `None` or an empty locale leaves the
/// current locale untouched. The previous locale is back in effect once `fut` completes,
/// whatever its outcome.
pub async fn scope<F: Future>(locale: Option<String>, fut: F) -> F::Output {
    match locale.filter(|l| !l.is_empty()) {
        Some(locale) => LOCALE.scope(locale, fut).await,
        None => fut.await,
    }
}
