use crate::error::{DevxError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants (relative to the state home, default ~/.cgdevx)
// ---------------------------------------------------------------------------

pub const HOME_DIR: &str = ".cgdevx";
pub const HOME_ENV: &str = "CGDEVX_HOME";

pub const STATE_FILE: &str = "state.yaml";
pub const GITOPS_DIR: &str = "gitops";
pub const KEYS_DIR: &str = "keys";
pub const KUBECONFIG_FILE: &str = "kubeconfig";
pub const WORKLOADS_DIR: &str = "workloads";

/// Terraform module folders inside the GitOps repository.
pub const TF_VCS_DIR: &str = "terraform/vcs";
pub const TF_HOSTING_DIR: &str = "terraform/hosting_provider";
pub const TF_SECRETS_DIR: &str = "terraform/secrets";
pub const TF_USERS_DIR: &str = "terraform/users";
pub const TF_CORE_SERVICES_DIR: &str = "terraform/core_services";

/// ArgoCD bootstrap manifests inside the GitOps repository.
pub const DELIVERY_MANIFESTS_DIR: &str = "gitops-pipelines/delivery/clusters/cc-cluster/core-services";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Resolve the state home.
///
/// Priority:
/// 1. explicit value (`--state-dir` flag or `CGDEVX_HOME`, resolved by the CLI)
/// 2. `~/.cgdevx`
pub fn resolve_home(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    home::home_dir()
        .map(|h| h.join(HOME_DIR))
        .ok_or(DevxError::HomeNotFound)
}

pub fn state_path(home: &Path) -> PathBuf {
    home.join(STATE_FILE)
}

pub fn gitops_dir(home: &Path) -> PathBuf {
    home.join(GITOPS_DIR)
}

pub fn keys_dir(home: &Path) -> PathBuf {
    home.join(KEYS_DIR)
}

pub fn kubeconfig_path(home: &Path) -> PathBuf {
    home.join(KUBECONFIG_FILE)
}

pub fn tf_module_dir(home: &Path, module: &str) -> PathBuf {
    gitops_dir(home).join(module)
}

pub fn workload_dir(home: &Path, name: &str) -> PathBuf {
    home.join(WORKLOADS_DIR).join(name)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

static SLUG_RE: OnceLock<Regex> = OnceLock::new();
static FQDN_RE: OnceLock<Regex> = OnceLock::new();

fn slug_re() -> &'static Regex {
    SLUG_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("slug regex is valid")
    })
}

fn fqdn_re() -> &'static Regex {
    FQDN_RE.get_or_init(|| {
        Regex::new(r"^(?:[a-z0-9](?:[a-z0-9\-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$")
            .expect("fqdn regex is valid")
    })
}

pub fn is_valid_slug(value: &str) -> bool {
    !value.is_empty() && value.len() <= 63 && slug_re().is_match(value)
}

pub fn is_valid_fqdn(value: &str) -> bool {
    value.len() <= 253 && fqdn_re().is_match(value)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
