//! The set of collaborators a command runs against.

use std::time::Duration;

use crate::env::{self, EnvVars};
use crate::providers::process::ToolLocator;
use crate::providers::{
    ClusterClient, CloudProvider, DnsManager, GitProvider, KeyGenerator, RepoOps, TerraformRunner,
    TxtResolver,
};
use crate::readiness::{DnsPoll, HttpProbe};
use crate::retry::{Backoff, Sleeper};
use crate::state::StateStore;
use crate::types::{internal, param};

/// Timeouts and retry policies for readiness waits.
#[derive(Debug, Clone, Copy)]
pub struct Waits {
    pub dns: DnsPoll,
    /// Upper bound for one Kubernetes resource to reach its condition.
    pub resource_timeout: Duration,
    /// Retries around Kubernetes lookups and deletions.
    pub k8s: Backoff,
    /// Retries around DNS registrar API calls.
    pub registrar: Backoff,
    /// Budget for a freshly exposed endpoint to answer over HTTPS.
    pub http: Backoff,
}

impl Default for Waits {
    fn default() -> Self {
        Self {
            dns: DnsPoll::default(),
            resource_timeout: Duration::from_secs(600),
            k8s: Backoff::new(5, Duration::from_secs(2)),
            registrar: Backoff::new(5, Duration::from_secs(2)),
            // 2s .. 512s, a little over 17 minutes before giving up.
            http: Backoff::new(8, Duration::from_secs(2)),
        }
    }
}

pub struct Platform<'a> {
    pub cloud: &'a dyn CloudProvider,
    pub dns: &'a dyn DnsManager,
    pub resolver: &'a dyn TxtResolver,
    pub git: &'a dyn GitProvider,
    pub repo: &'a dyn RepoOps,
    pub keys: &'a dyn KeyGenerator,
    pub terraform: &'a dyn TerraformRunner,
    pub cluster: &'a dyn ClusterClient,
    pub tools: &'a dyn ToolLocator,
    pub http: &'a dyn HttpProbe,
    pub sleeper: &'a dyn Sleeper,
    pub waits: Waits,
}

impl Platform<'_> {
    pub fn cloud_env(&self) -> EnvVars {
        self.cloud.env_vars()
    }

    /// Cloud credentials plus the Git hosting token.
    pub fn vcs_env(&self) -> EnvVars {
        merge([self.cloud.env_vars(), self.git.env_vars()])
    }

    /// Cloud, Git and Vault credentials, for modules that write secrets.
    pub fn secrets_env(&self, store: &StateStore) -> EnvVars {
        merge([self.cloud.env_vars(), self.git.env_vars(), vault_env(store)])
    }
}

/// `VAULT_ADDR`/`VAULT_TOKEN` from the store, when known.
pub fn vault_env(store: &StateStore) -> EnvVars {
    env::non_empty([
        ("VAULT_ADDR", store.param(param::VAULT_URL)),
        ("VAULT_TOKEN", store.internal(internal::VAULT_ROOT_TOKEN)),
    ])
}

/// Later maps win on key conflicts.
pub fn merge<const N: usize>(maps: [EnvVars; N]) -> EnvVars {
    maps.into_iter().flatten().collect()
}
