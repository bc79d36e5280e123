//! Workload onboarding against the platform GitOps repository.
//!
//! Unlike setup and destroy these operations keep no checkpoints: each one
//! clones what it needs into a scratch folder under the state home, makes
//! its change, and hands it over as a pull/merge request.

use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{DevxError, Result};
use crate::io;
use crate::paths;
use crate::pipeline::{require_confirmation, Operator, Reporter};
use crate::platform::Platform;
use crate::providers::git::ReviewRequest;
use crate::providers::repo::Author;
use crate::providers::terraform;
use crate::setup::{ARGOCD_NAMESPACE, GITOPS_BRANCH};
use crate::state::StateStore;
use crate::template;
use crate::trace::traced;
use crate::types::{checkpoint, param};

pub const WL_TEMPLATE_URL: &str = "https://github.com/CloudGeometry/cg-devx-wl-template.git";
pub const WL_GITOPS_TEMPLATE_URL: &str =
    "https://github.com/CloudGeometry/cg-devx-wl-gitops-template.git";
pub const WL_TEMPLATE_BRANCH: &str = "main";

/// Template tokens available to workload templates on top of the platform's.
pub mod token {
    pub const WL_NAME: &str = "<WL_NAME>";
    pub const WL_REPO_NAME: &str = "<WL_REPO_NAME>";
    pub const WL_GITOPS_REPO_NAME: &str = "<WL_GITOPS_REPO_NAME>";
    pub const WL_GITOPS_REPO_URL: &str = "<WL_GITOPS_REPO_URL>";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub template_url: String,
    pub template_branch: String,
    pub gitops_template_url: String,
    pub gitops_template_branch: String,
}

impl WorkloadSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template_url: WL_TEMPLATE_URL.to_string(),
            template_branch: WL_TEMPLATE_BRANCH.to_string(),
            gitops_template_url: WL_GITOPS_TEMPLATE_URL.to_string(),
            gitops_template_branch: WL_TEMPLATE_BRANCH.to_string(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if paths::is_valid_slug(&self.name) {
            Ok(())
        } else {
            Err(DevxError::InvalidConfig(format!(
                "workload name '{}' must be lowercase alphanumeric with hyphens",
                self.name
            )))
        }
    }

    pub fn repo_name(&self) -> &str {
        &self.name
    }

    pub fn gitops_repo_name(&self) -> String {
        format!("{}-gitops", self.name)
    }
}

pub struct WorkloadContext<'a> {
    pub store: &'a StateStore,
    pub home: &'a Path,
    pub platform: &'a Platform<'a>,
    pub reporter: &'a dyn Reporter,
}

/// `workload-<action>-<name>-<8 hex>`.
pub fn branch_name(action: &str, name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("workload-{action}-{name}-{}", &suffix[..8])
}

fn ensure_installed(store: &StateStore) -> Result<()> {
    if store.has_checkpoint(checkpoint::GITOPS_VCS) {
        Ok(())
    } else {
        Err(DevxError::Preflight(format!(
            "the platform GitOps repository does not exist yet ('{}' never completed); finish 'cgdevx setup' first",
            checkpoint::GITOPS_VCS
        )))
    }
}

/// Platform tokens plus the workload's own.
fn workload_tokens(ctx: &WorkloadContext<'_>, spec: &WorkloadSpec) -> StateStore {
    let mut tokens = ctx.store.clone();
    let gitops_repo = spec.gitops_repo_name();
    tokens.set_param(token::WL_NAME, spec.name.as_str());
    tokens.set_param(token::WL_REPO_NAME, spec.repo_name());
    tokens.set_param(token::WL_GITOPS_REPO_URL, ctx.platform.git.ssh_url(&gitops_repo));
    tokens.set_param(token::WL_GITOPS_REPO_NAME, gitops_repo);
    tokens
}

/// Registration folder of `name` inside a platform checkout.
fn registration_dir(checkout: &Path, name: &str) -> PathBuf {
    checkout.join(paths::WORKLOADS_DIR).join(name)
}

struct Checkout {
    dir: PathBuf,
    branch: String,
}

/// Fresh clone of the platform GitOps repository on a new branch.
fn checkout_platform(ctx: &WorkloadContext<'_>, action: &str, spec: &WorkloadSpec) -> Result<Checkout> {
    let url = ctx.store.require_param(param::GIT_REPOSITORY_GIT_URL)?;
    let dir = paths::workload_dir(ctx.home, &spec.name).join("platform");
    io::remove_dir_if_exists(&dir)?;
    traced("repo.clone", || ctx.platform.repo.clone_repo(url, None, &dir))?;
    let branch = branch_name(action, &spec.name);
    ctx.platform.repo.create_branch(&dir, &branch)?;
    Ok(Checkout { dir, branch })
}

/// Commit everything in `checkout`, push it and open the review request.
fn propose(ctx: &WorkloadContext<'_>, checkout: &Checkout, title: &str, body: &str) -> Result<String> {
    let p = ctx.platform;
    if !p.repo.commit_all(&checkout.dir, title, &Author::from_store(ctx.store))? {
        return Err(DevxError::InvalidConfig(format!("nothing to commit for '{title}'")));
    }
    p.repo.push(&checkout.dir, &checkout.branch)?;
    let repo = ctx.store.require_param(param::GITOPS_REPOSITORY_NAME)?;
    let url = traced("git.create_pr", || {
        p.git.create_pr(&ReviewRequest {
            repo,
            head: &checkout.branch,
            base: GITOPS_BRANCH,
            title,
            body,
        })
    })?;
    ctx.reporter
        .info(&format!("{} opened: {url}", p.git.kind().request_noun()));
    Ok(url)
}

/// ArgoCD application syncing the workload's GitOps repository.
pub fn application_manifest(spec: &WorkloadSpec, gitops_repo_url: &str) -> Result<String> {
    let doc = json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {"name": spec.name, "namespace": ARGOCD_NAMESPACE},
        "spec": {
            "project": "default",
            "source": {"repoURL": gitops_repo_url, "targetRevision": "HEAD", "path": "."},
            "destination": {"server": "https://kubernetes.default.svc", "namespace": spec.name},
            "syncPolicy": {
                "automated": {"prune": true, "selfHeal": true},
                "syncOptions": ["CreateNamespace=true"]
            }
        }
    });
    Ok(serde_yaml::to_string(&doc)?)
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Seed the workload's source and GitOps repositories from their templates.
///
/// Returns the SSH URLs pushed to.
pub fn bootstrap(ctx: &WorkloadContext<'_>, spec: &WorkloadSpec) -> Result<Vec<String>> {
    ensure_installed(ctx.store)?;
    spec.validate()?;
    let p = ctx.platform;
    let root = paths::workload_dir(ctx.home, &spec.name);
    let tokens = workload_tokens(ctx, spec);

    let mut pushed = Vec::new();
    for (template_url, branch, repo) in [
        (&spec.template_url, &spec.template_branch, spec.repo_name().to_string()),
        (&spec.gitops_template_url, &spec.gitops_template_branch, spec.gitops_repo_name()),
    ] {
        let dir = root.join(&repo);
        io::remove_dir_if_exists(&dir)?;
        traced("repo.clone", || p.repo.clone_repo(template_url, Some(branch.as_str()), &dir))?;
        io::remove_dir_if_exists(&dir.join(".git"))?;
        template::render_tree(&dir, &tokens)?;

        let url = p.git.ssh_url(&repo);
        p.repo.init(&dir, &url, GITOPS_BRANCH)?;
        p.repo
            .commit_all(
                &dir,
                &format!("Bootstrap {} from template", spec.name),
                &Author::from_store(ctx.store),
            )?;
        p.repo.push(&dir, GITOPS_BRANCH)?;
        ctx.reporter.info(&format!("pushed {repo}"));
        pushed.push(url);
    }
    Ok(pushed)
}

/// Register the workload in the platform repository. Returns the review URL.
pub fn create(ctx: &WorkloadContext<'_>, spec: &WorkloadSpec) -> Result<String> {
    ensure_installed(ctx.store)?;
    spec.validate()?;
    let checkout = checkout_platform(ctx, "create", spec)?;
    let reg = registration_dir(&checkout.dir, &spec.name);
    if reg.exists() {
        return Err(DevxError::InvalidConfig(format!(
            "workload '{}' is already registered",
            spec.name
        )));
    }

    let git = ctx.platform.git;
    let gitops_url = git.ssh_url(&spec.gitops_repo_name());
    let repositories = json!({
        "workload": spec.name,
        "repositories": [spec.repo_name(), spec.gitops_repo_name()],
    });
    io::atomic_write(
        &reg.join("application.yaml"),
        application_manifest(spec, &gitops_url)?.as_bytes(),
    )?;
    io::atomic_write(
        &reg.join("repositories.json"),
        serde_json::to_string_pretty(&repositories)?.as_bytes(),
    )?;

    propose(
        ctx,
        &checkout,
        &format!("Register workload {}", spec.name),
        &format!(
            "Adds the `{}` workload with repositories `{}` and `{}`.",
            spec.name,
            spec.repo_name(),
            spec.gitops_repo_name()
        ),
    )
}

/// Remove the workload's registration, optionally destroying its
/// infrastructure first. Returns the review URL.
pub fn delete(
    ctx: &WorkloadContext<'_>,
    spec: &WorkloadSpec,
    destroy_resources: bool,
    operator: &dyn Operator,
) -> Result<String> {
    ensure_installed(ctx.store)?;
    spec.validate()?;
    require_confirmation(
        operator,
        &format!("Remove workload '{}' from the platform?", spec.name),
    )?;

    let p = ctx.platform;
    let checkout = checkout_platform(ctx, "delete", spec)?;
    let reg = registration_dir(&checkout.dir, &spec.name);
    if !reg.exists() {
        return Err(DevxError::InvalidConfig(format!(
            "workload '{}' is not registered",
            spec.name
        )));
    }

    if destroy_resources {
        let tf_dir = reg.join("terraform");
        if tf_dir.is_dir() {
            template::render_tree(&tf_dir, &workload_tokens(ctx, spec))?;
            terraform::destroy_module(p.terraform, &tf_dir, p.secrets_env(ctx.store))?;
        } else {
            ctx.reporter
                .info(&format!("workload '{}' has no infrastructure to destroy", spec.name));
        }
    }

    io::remove_dir_if_exists(&reg)?;
    propose(
        ctx,
        &checkout,
        &format!("Remove workload {}", spec.name),
        &format!("Removes the `{}` workload registration.", spec.name),
    )
}
