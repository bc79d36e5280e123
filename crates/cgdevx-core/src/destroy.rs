//! The `destroy` pipeline.
//!
//! Teardown stages run in reverse dependency order. Each one mirrors a setup
//! checkpoint: it runs only when that checkpoint is present, and records its
//! own `destroy:<stage>` marker so an interrupted destroy resumes where it
//! stopped. Local state is removed only after every stage has succeeded.

use std::path::Path;

use serde_json::json;

use crate::env::with_envs;
use crate::error::Result;
use crate::io;
use crate::paths;
use crate::pipeline::{self, best_effort, require_confirmation, Operator, PipelineContext, Reporter, Stage};
use crate::platform::Platform;
use crate::providers::cluster::ResourceRef;
use crate::providers::terraform;
use crate::setup::{ARGOCD_NAMESPACE, ROOT_APPLICATION};
use crate::state::StateStore;
use crate::types::{checkpoint, internal, param};

pub const DESTROY_GITOPS_VCS: &str = "destroy:gitops-vcs";
pub const DESTROY_K8S_DELIVERY: &str = "destroy:k8s-delivery";
pub const DESTROY_K8S_TF: &str = "destroy:k8s-tf";
pub const DESTROY_VCS_TF: &str = "destroy:vcs-tf";
pub const DESTROY_STATE_STORAGE: &str = "destroy:state-storage";

const APPLICATION_KIND: &str = "applications.argoproj.io";

pub struct DestroyContext<'a> {
    pub store: &'a mut StateStore,
    pub home: &'a Path,
    pub platform: &'a Platform<'a>,
    pub reporter: &'a dyn Reporter,
}

impl PipelineContext for DestroyContext<'_> {
    fn store(&mut self) -> &mut StateStore {
        &mut *self.store
    }

    fn reporter(&self) -> &dyn Reporter {
        self.reporter
    }
}

pub fn destroy_stages<'a>() -> [Stage<DestroyContext<'a>>; 5] {
    [
        Stage::new(DESTROY_GITOPS_VCS, "Disabling GitOps synchronisation", disable_sync)
            .requires(checkpoint::GITOPS_VCS),
        Stage::new(DESTROY_K8S_DELIVERY, "Removing delivery applications", remove_delivery)
            .requires(checkpoint::K8S_DELIVERY),
        Stage::new(DESTROY_K8S_TF, "Destroying the Kubernetes cluster", destroy_cluster)
            .requires(checkpoint::K8S_TF),
        Stage::new(DESTROY_VCS_TF, "Destroying Git hosting resources", destroy_vcs)
            .requires(checkpoint::VCS_TF),
        Stage::new(DESTROY_STATE_STORAGE, "Removing Terraform state storage", destroy_state_storage)
            .requires(checkpoint::ONE_TIME_SETUP),
    ]
}

/// Confirm with the operator, tear down whatever setup created, then remove
/// local state.
///
/// Declining the confirmation returns [`crate::DevxError::Aborted`] before
/// anything is touched.
pub fn run_destroy(ctx: &mut DestroyContext<'_>, operator: &dyn Operator) -> Result<()> {
    let target = ctx
        .store
        .param(param::CC_CLUSTER_FQDN)
        .unwrap_or("this installation")
        .to_string();
    require_confirmation(
        operator,
        &format!("Destroy {target}? Cloud resources, repositories and local state will be removed"),
    )?;

    pipeline::run_stages(ctx, &destroy_stages())?;
    remove_local_state(ctx.home, ctx.store)?;
    ctx.reporter.info(&format!("{target} destroyed"));
    Ok(())
}

fn remove_local_state(home: &Path, store: &StateStore) -> Result<()> {
    io::remove_dir_if_exists(&paths::gitops_dir(home))?;
    io::remove_dir_if_exists(&paths::keys_dir(home))?;
    io::remove_dir_if_exists(&home.join(paths::WORKLOADS_DIR))?;
    io::remove_if_exists(&paths::kubeconfig_path(home))?;
    store.delete()?;
    tracing::info!(home = %home.display(), "local state removed");
    Ok(())
}

fn application(name: &str) -> ResourceRef {
    ResourceRef::namespaced(APPLICATION_KIND, ARGOCD_NAMESPACE, name)
}

fn list_applications(p: &Platform<'_>) -> Result<Vec<String>> {
    p.waits.k8s.run("list applications", p.sleeper, || {
        p.cluster.list_names(APPLICATION_KIND, ARGOCD_NAMESPACE, "")
    })
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stop ArgoCD from recreating what the following stages delete.
fn disable_sync(ctx: &mut DestroyContext<'_>) -> Result<()> {
    if !ctx.store.has_checkpoint(checkpoint::K8S_DELIVERY) {
        ctx.reporter.info("delivery engine was never installed, nothing to pause");
        return Ok(());
    }
    let p = ctx.platform;
    let patch = json!({"spec": {"syncPolicy": null}});
    with_envs(p.cloud_env(), || -> Result<()> {
        for name in list_applications(p)? {
            p.cluster.patch(&application(&name), &patch)?;
        }
        Ok(())
    })
}

fn remove_delivery(ctx: &mut DestroyContext<'_>) -> Result<()> {
    let p = ctx.platform;
    with_envs(p.cloud_env(), || -> Result<()> {
        let mut apps = list_applications(p)?;
        // The root application owns the rest; remove it first.
        apps.sort_by_key(|name| name != ROOT_APPLICATION);
        for name in apps {
            let app = application(&name);
            p.waits
                .k8s
                .run(&format!("delete {app}"), p.sleeper, || p.cluster.delete(&app))?;
        }

        best_effort("remove repository credentials", || {
            p.cluster.delete(&ResourceRef::namespaced("secret", ARGOCD_NAMESPACE, "gitops-repo"))
        });
        best_effort("release ingress load balancer", || {
            p.cluster.delete(&ResourceRef::namespaced(
                "service",
                "ingress-nginx",
                "ingress-nginx-controller",
            ))
        });
        Ok(())
    })
}

fn destroy_cluster(ctx: &mut DestroyContext<'_>) -> Result<()> {
    if !ctx.store.has_checkpoint(checkpoint::VCS_TF) {
        tracing::warn!(
            stage = DESTROY_K8S_TF,
            missing = checkpoint::VCS_TF,
            "prerequisite checkpoint missing, destroying the cluster anyway"
        );
    }
    let p = ctx.platform;
    terraform::destroy_module(
        p.terraform,
        &paths::tf_module_dir(ctx.home, paths::TF_HOSTING_DIR),
        p.cloud_env(),
    )
}

fn destroy_vcs(ctx: &mut DestroyContext<'_>) -> Result<()> {
    let p = ctx.platform;
    terraform::destroy_module(
        p.terraform,
        &paths::tf_module_dir(ctx.home, paths::TF_VCS_DIR),
        p.vcs_env(),
    )
}

fn destroy_state_storage(ctx: &mut DestroyContext<'_>) -> Result<()> {
    let Some(storage) = ctx.store.internal(internal::TF_BACKEND_STORAGE_NAME) else {
        ctx.reporter.info("no state storage was created");
        return Ok(());
    };
    let p = ctx.platform;
    with_envs(p.cloud_env(), || p.cloud.destroy_state_storage(storage))
}
