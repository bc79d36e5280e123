//! Scoped process environment for external tool invocations.
//!
//! Terraform and the cloud CLIs read credentials from the environment.
//! [`EnvGuard`] sets exactly the non-empty entries it is given and removes
//! them again when dropped, so a failing tool call cannot leak credentials
//! into later stages.

use std::collections::BTreeMap;

/// Variables to inject, keyed by name. Empty values are never injected.
pub type EnvVars = BTreeMap<String, String>;

/// Drop empty values from a candidate mapping.
pub fn non_empty<I, K, V>(entries: I) -> EnvVars
where
    I: IntoIterator<Item = (K, Option<V>)>,
    K: Into<String>,
    V: Into<String>,
{
    entries
        .into_iter()
        .filter_map(|(k, v)| {
            let v: String = v?.into();
            if v.is_empty() {
                None
            } else {
                Some((k.into(), v))
            }
        })
        .collect()
}

/// Activate every entry in `vars` in the process environment.
pub fn set_envs(vars: &EnvVars) {
    for (k, v) in vars {
        if !v.is_empty() {
            std::env::set_var(k, v);
        }
    }
}

/// Remove exactly the keys in `vars` from the process environment.
pub fn unset_envs(vars: &EnvVars) {
    for k in vars.keys() {
        std::env::remove_var(k);
    }
}

/// RAII scope for [`set_envs`]/[`unset_envs`].
#[must_use = "variables are removed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct EnvGuard {
    vars: EnvVars,
}

impl EnvGuard {
    pub fn activate(vars: EnvVars) -> Self {
        let vars: EnvVars = vars.into_iter().filter(|(_, v)| !v.is_empty()).collect();
        tracing::debug!(keys = ?vars.keys().collect::<Vec<_>>(), "activating scoped env");
        set_envs(&vars);
        Self { vars }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        unset_envs(&self.vars);
    }
}

/// Run `f` with `vars` active; they are removed on every exit path,
/// including an `Err` return or a panic unwinding through `f`.
pub fn with_envs<T>(vars: EnvVars, f: impl FnOnce() -> T) -> T {
    let _guard = EnvGuard::activate(vars);
    f()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
