//! Concrete collaborators for one command invocation.

use anyhow::Context;
use cgdevx_core::config::SetupParams;
use cgdevx_core::paths;
use cgdevx_core::platform::{Platform, Waits};
use cgdevx_core::providers::cloud::{self, CloudSettings};
use cgdevx_core::providers::cluster::Kubectl;
use cgdevx_core::providers::dns::{self, DigResolver};
use cgdevx_core::providers::git;
use cgdevx_core::providers::process::PathLocator;
use cgdevx_core::providers::repo::{GitCli, SshKeygen, SSH_KEY_FILE};
use cgdevx_core::providers::terraform::TerraformCli;
use cgdevx_core::providers::{CloudProvider, DnsManager, GitProvider};
use cgdevx_core::readiness::HttpReadiness;
use cgdevx_core::retry::ThreadSleeper;
use cgdevx_core::state::StateStore;
use cgdevx_core::types::{internal, CloudProviderKind, DnsRegistrarKind, GitProviderKind};
use std::path::{Path, PathBuf};

pub struct Collaborators {
    cloud: Box<dyn CloudProvider>,
    dns: Box<dyn DnsManager>,
    resolver: DigResolver,
    git: Box<dyn GitProvider>,
    repo: GitCli,
    keys: SshKeygen,
    terraform: TerraformCli,
    cluster: Kubectl,
    tools: PathLocator,
    http: HttpReadiness,
    sleeper: ThreadSleeper,
}

fn required<'a>(value: &'a Option<String>, key: &str) -> anyhow::Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .with_context(|| format!("missing required parameter '{key}'"))
}

/// Recorded path from the `dependencies` stage, else a `PATH` lookup.
fn binary(store: &StateStore, key: &str, tool: &str) -> PathBuf {
    store
        .internal(key)
        .map(PathBuf::from)
        .or_else(|| which::which(tool).ok())
        .unwrap_or_else(|| PathBuf::from(tool))
}

impl Collaborators {
    pub fn build(home: &Path, params: &SetupParams, store: &StateStore) -> anyhow::Result<Self> {
        let cloud_kind: CloudProviderKind = required(&params.cloud_provider, "cloud_provider")?.parse()?;
        let registrar: DnsRegistrarKind = required(&params.dns_registrar, "dns_registrar")?.parse()?;
        let git_kind: GitProviderKind = required(&params.git_provider, "git_provider")?.parse()?;

        let git = git::for_kind(
            git_kind,
            required(&params.git_org, "git_org")?,
            required(&params.git_access_token, "git_access_token")?,
        )
        .context("failed to build git provider client")?;
        let dns = dns::for_kind(registrar, params.cloud_project.as_deref())?;

        let repo = GitCli::new(binary(store, internal::GIT_BINARY, "git"))
            .with_ssh_key(paths::keys_dir(home).join(SSH_KEY_FILE));

        Ok(Self {
            cloud: cloud::for_kind(cloud_kind, CloudSettings::from_params(params)),
            dns,
            resolver: DigResolver,
            git,
            repo,
            keys: SshKeygen,
            terraform: TerraformCli::new(binary(store, internal::TF_BINARY, "terraform")),
            cluster: Kubectl::new(
                binary(store, internal::KUBECTL_BINARY, "kubectl"),
                paths::kubeconfig_path(home),
            ),
            tools: PathLocator,
            http: HttpReadiness,
            sleeper: ThreadSleeper,
        })
    }

    /// Collaborators for an installation whose input is already persisted.
    pub fn from_store(home: &Path, store: &StateStore) -> anyhow::Result<Self> {
        let params = SetupParams::from_input(store.input_params())
            .context("persisted input is unreadable")?;
        Self::build(home, &params, store)
    }

    pub fn platform(&self) -> Platform<'_> {
        Platform {
            cloud: self.cloud.as_ref(),
            dns: self.dns.as_ref(),
            resolver: &self.resolver,
            git: self.git.as_ref(),
            repo: &self.repo,
            keys: &self.keys,
            terraform: &self.terraform,
            cluster: &self.cluster,
            tools: &self.tools,
            http: &self.http,
            sleeper: &self.sleeper,
            waits: Waits::default(),
        }
    }
}
