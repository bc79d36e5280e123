use std::fmt::Display;
use std::time::Instant;

/// Log entry, then exit or error, around `f`. The result is returned unchanged.
pub fn traced<T, E, F>(name: &str, f: F) -> Result<T, E>
where
    E: Display,
    F: FnOnce() -> Result<T, E>,
{
    tracing::debug!(call = name, "enter");
    let started = Instant::now();
    let result = f();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &result {
        Ok(_) => tracing::debug!(call = name, elapsed_ms, "exit"),
        Err(e) => tracing::error!(call = name, elapsed_ms, error = %e, "failed"),
    }
    result
}
