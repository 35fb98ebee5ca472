//! Before-commit hooks

/// Closure run once, immediately before a queued submit is evaluated
pub type BeforeHook = Box<dyn FnOnce() + Send>;

/// Box a closure as a [`BeforeHook`]
pub fn before_hook(f: impl FnOnce() + Send + 'static) -> BeforeHook {
    Box::new(f)
}

/// A hook that does nothing
///
/// Useful to let one submit pass untouched before a hook that interferes.
pub fn noop_hook() -> BeforeHook {
    Box::new(|| {})
}
