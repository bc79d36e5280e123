//! The `setup` pipeline.
//!
//! Thirteen stages, each gated by its checkpoint. Stages talk to each other
//! only through the store: whatever a later stage or a template needs is
//! written to `params`, `fragments` or `internal` by the stage producing it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::SetupParams;
use crate::env::with_envs;
use crate::error::{DevxError, Result};
use crate::io;
use crate::paths;
use crate::pipeline::{self, PipelineContext, Reporter, Stage};
use crate::platform::Platform;
use crate::providers::cloud::K8sAuthCommand;
use crate::providers::cluster::ResourceRef;
use crate::providers::dns;
use crate::providers::repo::Author;
use crate::providers::terraform::{self, output_str, TfOutputs};
use crate::readiness::{wait_for_resource, Condition};
use crate::state::StateStore;
use crate::template;
use crate::trace::traced;
use crate::types::{checkpoint, fragment, internal, param};

pub const ARGOCD_NAMESPACE: &str = "argocd";
pub const VAULT_NAMESPACE: &str = "vault";
pub const ROOT_APPLICATION: &str = "core-services";
pub const GITOPS_BRANCH: &str = "main";
const CERTIFICATE_KIND: &str = "certificates.cert-manager.io";

pub struct SetupContext<'a> {
    pub store: &'a mut StateStore,
    pub home: &'a Path,
    pub platform: &'a Platform<'a>,
    pub reporter: &'a dyn Reporter,
}

impl PipelineContext for SetupContext<'_> {
    fn store(&mut self) -> &mut StateStore {
        &mut *self.store
    }

    fn reporter(&self) -> &dyn Reporter {
        self.reporter
    }
}

pub fn setup_stages<'a>() -> [Stage<SetupContext<'a>>; 13] {
    [
        Stage::new(checkpoint::PREFLIGHT, "Checking credentials, permissions and domain ownership", preflight),
        Stage::new(checkpoint::DEPENDENCIES, "Locating terraform, kubectl and git", dependencies),
        Stage::new(checkpoint::ONE_TIME_SETUP, "Creating keys and Terraform state storage", one_time_setup),
        Stage::new(checkpoint::REPO_PREP, "Preparing the GitOps repository", repo_prep),
        Stage::new(checkpoint::VCS_TF, "Provisioning Git hosting resources", vcs_tf),
        Stage::new(checkpoint::K8S_TF, "Provisioning the Kubernetes cluster", k8s_tf),
        Stage::new(checkpoint::GITOPS_VCS, "Pushing the GitOps repository", gitops_vcs),
        Stage::new(checkpoint::K8S_DELIVERY, "Installing the delivery engine", k8s_delivery),
        Stage::new(checkpoint::SECRETS_MANAGEMENT, "Initialising the secrets manager", secrets_management),
        Stage::new(checkpoint::SECRETS_MANAGEMENT_TF, "Configuring the secrets manager", secrets_management_tf),
        Stage::new(checkpoint::USERS_TF, "Provisioning platform users", users_tf),
        Stage::new(checkpoint::CORE_SERVICES_TF, "Configuring core services", core_services_tf),
        Stage::new(checkpoint::TF_STORE_HARDENING, "Hardening Terraform state storage", tf_store_hardening),
    ]
}

/// Merge `supplied` into the store's input and validate the result.
///
/// Nothing is written when validation fails. Once preflight has passed,
/// persisted values win over conflicting new ones.
pub fn configure(store: &mut StateStore, supplied: SetupParams) -> Result<SetupParams> {
    let persisted = SetupParams::from_input(store.input_params())?;
    let merged = if store.has_checkpoint(checkpoint::PREFLIGHT) {
        supplied.merged_with(persisted)
    } else {
        persisted.merged_with(supplied)
    }
    .with_defaults();
    merged.check()?;
    store.update_input_params(merged.to_input()?);
    Ok(merged)
}

/// Run every setup stage not yet checkpointed and summarise the result.
pub fn run_setup(ctx: &mut SetupContext<'_>) -> Result<SetupSummary> {
    pipeline::run_stages(ctx, &setup_stages())?;
    Ok(SetupSummary::from_store(ctx.store))
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SetupSummary {
    pub cluster_fqdn: Option<String>,
    pub gitops_repo_url: Option<String>,
    pub argocd_url: Option<String>,
    pub vault_url: Option<String>,
    pub registry_url: Option<String>,
    /// Where `VAULT_ROOT_TOKEN` is kept.
    pub state_file: PathBuf,
}

impl SetupSummary {
    pub fn from_store(store: &StateStore) -> Self {
        let p = |token: &str| store.param(token).map(str::to_string);
        Self {
            cluster_fqdn: p(param::CC_CLUSTER_FQDN),
            gitops_repo_url: p(param::GIT_REPOSITORY_URL),
            argocd_url: p(param::ARGOCD_URL),
            vault_url: p(param::VAULT_URL),
            registry_url: p(param::REGISTRY_URL),
            state_file: store.path().to_path_buf(),
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn required<'p>(value: &'p Option<String>, key: &str) -> Result<&'p str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DevxError::MissingValue(key.to_string()))
}

fn optional_output(outputs: &TfOutputs, name: &str) -> Option<String> {
    outputs.get(name).and_then(Value::as_str).map(str::to_string)
}

/// Re-render the GitOps checkout with everything the store knows so far.
fn render_gitops(ctx: &SetupContext<'_>) -> Result<()> {
    template::render_tree(&paths::gitops_dir(ctx.home), ctx.store)?;
    Ok(())
}

fn apply(ctx: &SetupContext<'_>, module: &str, env: crate::env::EnvVars) -> Result<TfOutputs> {
    render_gitops(ctx)?;
    terraform::apply_module(
        ctx.platform.terraform,
        &paths::tf_module_dir(ctx.home, module),
        env,
    )
}

/// `<cluster>-tf-state-<8 hex>`, unique per installation.
pub fn state_storage_name(cluster_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{cluster_name}-tf-state-{}", &suffix[..8])
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn preflight(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let params = SetupParams::from_input(ctx.store.input_params())?;
    params.check()?;

    let cloud_ok = with_envs(p.cloud_env(), || {
        traced("cloud.evaluate_permissions", || p.cloud.evaluate_permissions())
    })?;
    if !cloud_ok {
        return Err(DevxError::Preflight(format!(
            "{} credentials lack the permissions required for setup",
            p.cloud.kind()
        )));
    }

    let user = traced("git.current_user", || p.git.current_user())?;
    if !traced("git.evaluate_permissions", || p.git.evaluate_permissions())? {
        return Err(DevxError::Preflight(format!(
            "{} token for '{}' lacks the required scopes",
            p.git.kind(),
            user.login
        )));
    }
    let org = required(&params.git_org, "git_org")?;
    let repo = required(&params.gitops_repo_name, "gitops_repo_name")?;
    if traced("git.repo_exists", || p.git.repo_exists(repo))? {
        return Err(DevxError::Preflight(format!(
            "repository {org}/{repo} already exists"
        )));
    }

    let domain = required(&params.domain_name, "domain_name")?;
    let zone = with_envs(p.cloud_env(), || -> Result<_> {
        let registrar = &p.waits.registrar;
        let permitted =
            registrar.run("dns.evaluate_permissions", p.sleeper, || p.dns.evaluate_permissions())?;
        if !permitted {
            return Err(DevxError::Preflight(format!(
                "{} credentials cannot manage DNS records",
                p.dns.registrar()
            )));
        }
        let zone = registrar.run("dns.get_domain_zone", p.sleeper, || p.dns.get_domain_zone(domain))?;
        let owned = dns::evaluate_domain_ownership(
            p.dns,
            p.resolver,
            &zone,
            p.waits.dns,
            registrar,
            p.sleeper,
        )?;
        if !owned {
            return Err(DevxError::Preflight(format!(
                "could not verify ownership of {domain}; check the registrar's nameservers"
            )));
        }
        Ok(zone)
    })?;

    let store = &mut *ctx.store;
    store.set_internal(internal::GIT_USER_LOGIN, user.login.as_str());
    store.set_internal(internal::GIT_USER_NAME, user.name.unwrap_or(user.login));
    if let Some(email) = user.email {
        store.set_internal(internal::GIT_USER_EMAIL, email);
    }
    store.set_internal(internal::DOMAIN_ZONE_ID, zone.id);

    store.set_param(param::CLOUD_PROVIDER, required(&params.cloud_provider, "cloud_provider")?);
    store.set_param(param::CLOUD_REGION, required(&params.cloud_region, "cloud_region")?);
    store.set_param(param::PRIMARY_CLUSTER_NAME, required(&params.cluster_name, "cluster_name")?);
    store.set_param(param::CC_CLUSTER_FQDN, domain);
    store.set_param(param::OWNER_EMAIL, required(&params.admin_email, "admin_email")?);
    store.set_param(param::GIT_PROVIDER, p.git.kind().as_str());
    store.set_param(param::GIT_ORGANIZATION_NAME, org);
    store.set_param(param::GITOPS_REPOSITORY_NAME, repo);
    Ok(())
}

fn dependencies(ctx: &mut SetupContext<'_>) -> Result<()> {
    let mut missing = Vec::new();
    for (tool, key) in [
        ("terraform", internal::TF_BINARY),
        ("kubectl", internal::KUBECTL_BINARY),
        ("git", internal::GIT_BINARY),
    ] {
        match ctx.platform.tools.locate(tool) {
            Ok(path) => ctx.store.set_internal(key, path.display().to_string()),
            Err(_) => missing.push(tool),
        }
    }
    if !missing.is_empty() {
        return Err(DevxError::ToolNotInstalled(missing.join(", ")));
    }
    Ok(())
}

fn one_time_setup(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let comment = ctx.store.input_str("admin_email").unwrap_or("cgdevx").to_string();
    let pair = p.keys.generate(&paths::keys_dir(ctx.home), &comment)?;
    ctx.store.set_internal(
        internal::DEFAULT_SSH_PRIVATE_KEY_PATH,
        pair.private_key_path.display().to_string(),
    );
    ctx.store
        .set_internal(internal::DEFAULT_SSH_PUBLIC_KEY, pair.public_key.as_str());
    ctx.store
        .set_param(param::VCS_BOT_SSH_PUBLIC_KEY, pair.public_key);

    let storage = match ctx.store.internal(internal::TF_BACKEND_STORAGE_NAME) {
        Some(existing) => existing.to_string(),
        None => {
            let name = state_storage_name(ctx.store.require_param(param::PRIMARY_CLUSTER_NAME)?);
            with_envs(p.cloud_env(), || p.cloud.create_state_storage(&name))?;
            // Persist right away so a retry never creates a second bucket.
            ctx.store
                .set_internal(internal::TF_BACKEND_STORAGE_NAME, name.as_str());
            ctx.store.save()?;
            name
        }
    };

    for (token, module) in [
        (fragment::TF_VCS_REMOTE_BACKEND, "vcs"),
        (fragment::TF_HOSTING_REMOTE_BACKEND, "hosting_provider"),
        (fragment::TF_SECRETS_REMOTE_BACKEND, "secrets"),
        (fragment::TF_USERS_REMOTE_BACKEND, "users"),
        (fragment::TF_CORE_SERVICES_REMOTE_BACKEND, "core_services"),
    ] {
        ctx.store
            .set_fragment(token, p.cloud.tf_backend_snippet(&storage, module));
    }
    ctx.store
        .set_fragment(fragment::TF_HOSTING_PROVIDER, p.cloud.tf_provider_snippet());
    Ok(())
}

fn repo_prep(ctx: &mut SetupContext<'_>) -> Result<()> {
    let dir = paths::gitops_dir(ctx.home);
    let url = ctx.store.require_input("gitops_template_url")?.to_string();
    let branch = ctx.store.require_input("gitops_template_branch")?.to_string();

    io::remove_dir_if_exists(&dir)?;
    ctx.platform.repo.clone_repo(&url, Some(&branch), &dir)?;
    // The platform repository starts with its own history.
    io::remove_dir_if_exists(&dir.join(".git"))?;
    render_gitops(ctx)
}

fn vcs_tf(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let outputs = apply(ctx, paths::TF_VCS_DIR, p.vcs_env())?;
    let repo = ctx.store.require_param(param::GITOPS_REPOSITORY_NAME)?.to_string();
    let ssh = optional_output(&outputs, "gitops_repo_ssh_clone_url")
        .unwrap_or_else(|| p.git.ssh_url(&repo));
    let html = optional_output(&outputs, "gitops_repo_html_url")
        .unwrap_or_else(|| p.git.https_url(&repo));
    ctx.store.set_param(param::GIT_REPOSITORY_GIT_URL, ssh);
    ctx.store.set_param(param::GIT_REPOSITORY_URL, html);
    Ok(())
}

/// Kubeconfig authenticating through the cloud's exec plugin.
pub fn kubeconfig_yaml(
    cluster_name: &str,
    endpoint: &str,
    ca_data: &str,
    auth: &K8sAuthCommand,
) -> Result<String> {
    let doc = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": cluster_name,
            "cluster": {"server": endpoint, "certificate-authority-data": ca_data}
        }],
        "users": [{
            "name": cluster_name,
            "user": {"exec": {
                "apiVersion": "client.authentication.k8s.io/v1beta1",
                "command": auth.command,
                "args": auth.args,
                "interactiveMode": "Never"
            }}
        }],
        "contexts": [{
            "name": cluster_name,
            "context": {"cluster": cluster_name, "user": cluster_name}
        }],
        "current-context": cluster_name
    });
    Ok(serde_yaml::to_string(&doc)?)
}

fn k8s_tf(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let outputs = apply(ctx, paths::TF_HOSTING_DIR, p.cloud_env())?;
    let endpoint = output_str(&outputs, "cluster_endpoint")?;
    let ca = output_str(&outputs, "cluster_certificate_authority_data")?;

    let cluster_name = ctx.store.require_param(param::PRIMARY_CLUSTER_NAME)?.to_string();
    let auth = p.cloud.k8s_auth_command(&cluster_name);
    let kubeconfig = kubeconfig_yaml(&cluster_name, &endpoint, &ca, &auth)?;
    let path = paths::kubeconfig_path(ctx.home);
    io::atomic_write(&path, kubeconfig.as_bytes())?;

    ctx.store
        .set_internal(internal::KCTL_CONFIG_PATH, path.display().to_string());
    ctx.store
        .set_internal(internal::CC_CLUSTER_ENDPOINT, endpoint.as_str());
    ctx.store.set_internal(internal::CC_CLUSTER_CA_CERT_DATA, ca);
    ctx.store.set_param(param::CC_CLUSTER_ENDPOINT, endpoint);
    Ok(())
}

fn gitops_vcs(ctx: &mut SetupContext<'_>) -> Result<()> {
    let repo = ctx.platform.repo;
    let dir = paths::gitops_dir(ctx.home);
    let fqdn = ctx.store.require_param(param::CC_CLUSTER_FQDN)?.to_string();
    ctx.store
        .set_param(param::ARGOCD_URL, format!("https://argocd.{fqdn}"));
    ctx.store
        .set_param(param::VAULT_URL, format!("https://vault.{fqdn}"));
    ctx.store
        .set_param(param::REGISTRY_URL, format!("https://harbor.{fqdn}"));
    render_gitops(ctx)?;

    if !dir.join(".git").exists() {
        let url = ctx.store.require_param(param::GIT_REPOSITORY_GIT_URL)?;
        repo.init(&dir, url, GITOPS_BRANCH)?;
    }
    repo.commit_all(&dir, "Initial platform configuration", &Author::from_store(ctx.store))?;
    repo.push(&dir, GITOPS_BRANCH)
}

fn namespace_manifest(name: &str) -> String {
    json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}}).to_string()
}

/// ArgoCD repository credentials for the GitOps repository.
pub fn repo_secret_manifest(url: &str, private_key: &str) -> String {
    json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": "gitops-repo",
            "namespace": ARGOCD_NAMESPACE,
            "labels": {"argocd.argoproj.io/secret-type": "repository"}
        },
        "type": "Opaque",
        "stringData": {"type": "git", "url": url, "sshPrivateKey": private_key}
    })
    .to_string()
}

/// App-of-apps pointing ArgoCD at the core services folder.
pub fn root_application_manifest(url: &str) -> String {
    json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Application",
        "metadata": {"name": ROOT_APPLICATION, "namespace": ARGOCD_NAMESPACE},
        "spec": {
            "project": "default",
            "source": {
                "repoURL": url,
                "targetRevision": "HEAD",
                "path": paths::DELIVERY_MANIFESTS_DIR
            },
            "destination": {"server": "https://kubernetes.default.svc", "namespace": ARGOCD_NAMESPACE},
            "syncPolicy": {"automated": {"prune": true, "selfHeal": true}}
        }
    })
    .to_string()
}

fn k8s_delivery(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let argocd_dir = paths::gitops_dir(ctx.home)
        .join(paths::DELIVERY_MANIFESTS_DIR)
        .join("argocd");
    let url = ctx.store.require_param(param::GIT_REPOSITORY_GIT_URL)?.to_string();
    let key_path = ctx.store.require_internal(internal::DEFAULT_SSH_PRIVATE_KEY_PATH)?;
    let private_key = std::fs::read_to_string(key_path)?;
    let server = ResourceRef::namespaced("deployment", ARGOCD_NAMESPACE, "argocd-server");

    with_envs(p.cloud_env(), || -> Result<()> {
        p.cluster.apply_manifest(&namespace_manifest(ARGOCD_NAMESPACE))?;
        p.cluster.apply_kustomization(&argocd_dir)?;
        wait_for_resource(
            p.cluster,
            &server,
            &Condition::ReplicasReady(None),
            p.waits.resource_timeout,
        )?;
        p.cluster
            .apply_manifest(&repo_secret_manifest(&url, &private_key))?;
        p.cluster.apply_manifest(&root_application_manifest(&url))
    })
}

#[derive(Debug, Deserialize)]
struct VaultInit {
    unseal_keys_b64: Vec<String>,
    root_token: String,
}

fn secrets_management(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let timeout = p.waits.resource_timeout;
    let initialised = ctx.store.internal(internal::VAULT_ROOT_TOKEN).is_some();

    let (pod, init) = with_envs(p.cloud_env(), || -> Result<_> {
        let pod = p.waits.k8s.run("locate vault pod", p.sleeper, || {
            p.cluster
                .list_names("pod", VAULT_NAMESPACE, "app.kubernetes.io/name=vault")?
                .into_iter()
                .next()
                .ok_or_else(|| DevxError::MissingValue("vault pod".into()))
        })?;
        let pod_ref = ResourceRef::namespaced("pod", VAULT_NAMESPACE, &pod);
        wait_for_resource(p.cluster, &pod_ref, &Condition::PodRunning, timeout)?;
        if initialised {
            return Ok((pod, None));
        }
        let out = p.cluster.exec(
            VAULT_NAMESPACE,
            &pod,
            &["vault", "operator", "init", "-format=json"],
        )?;
        let init: VaultInit = serde_json::from_str(&out)?;
        Ok((pod, Some(init)))
    })?;

    if let Some(init) = init {
        ctx.store
            .set_internal(internal::VAULT_ROOT_TOKEN, init.root_token);
        ctx.store
            .set_internal(internal::VAULT_UNSEAL_KEYS, init.unseal_keys_b64.join(","));
        // The root token cannot be recovered once lost.
        ctx.store.save()?;
    }

    let keys: Vec<String> = ctx
        .store
        .require_internal(internal::VAULT_UNSEAL_KEYS)?
        .split(',')
        .map(str::to_string)
        .collect();
    with_envs(p.cloud_env(), || unseal(ctx.platform, &pod, &keys))
}

/// Feed unseal keys until vault reports itself unsealed.
fn unseal(p: &Platform<'_>, pod: &str, keys: &[String]) -> Result<()> {
    for key in keys {
        let out = p.cluster.exec(
            VAULT_NAMESPACE,
            pod,
            &["vault", "operator", "unseal", "-format=json", key.as_str()],
        )?;
        let status: Value = serde_json::from_str(&out)?;
        if status.get("sealed").and_then(Value::as_bool) == Some(false) {
            return Ok(());
        }
    }
    Err(DevxError::NotReady {
        resource: format!("pod/{pod} in {VAULT_NAMESPACE}"),
        reason: "vault is still sealed after all unseal keys".into(),
    })
}

/// Block until `ingress` has a load balancer address and its TLS
/// certificate has been issued.
fn wait_for_exposure(p: &Platform<'_>, namespace: &str, ingress: &str, certificate: &str) -> Result<()> {
    let timeout = p.waits.resource_timeout;
    with_envs(p.cloud_env(), || -> Result<()> {
        wait_for_resource(
            p.cluster,
            &ResourceRef::namespaced("ingress", namespace, ingress),
            &Condition::IngressHasAddress,
            timeout,
        )?;
        wait_for_resource(
            p.cluster,
            &ResourceRef::namespaced(CERTIFICATE_KIND, namespace, certificate),
            &Condition::CertificateReady,
            timeout,
        )?;
        Ok(())
    })
}

fn secrets_management_tf(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let vault_url = ctx.store.require_param(param::VAULT_URL)?.to_string();
    wait_for_exposure(p, VAULT_NAMESPACE, "vault", "vault-tls")?;
    p.http.wait_ready(&vault_url, &p.waits.http)?;
    apply(ctx, paths::TF_SECRETS_DIR, p.secrets_env(ctx.store))?;
    Ok(())
}

fn users_tf(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    apply(ctx, paths::TF_USERS_DIR, p.secrets_env(ctx.store))?;
    Ok(())
}

fn core_services_tf(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    apply(ctx, paths::TF_CORE_SERVICES_DIR, p.secrets_env(ctx.store))?;
    wait_for_exposure(p, ARGOCD_NAMESPACE, "argocd-server", "argocd-server-tls")?;
    let argocd_url = ctx.store.require_param(param::ARGOCD_URL)?;
    p.http.wait_ready(argocd_url, &p.waits.http)?;
    Ok(())
}

fn tf_store_hardening(ctx: &mut SetupContext<'_>) -> Result<()> {
    let p = ctx.platform;
    let storage = ctx.store.require_internal(internal::TF_BACKEND_STORAGE_NAME)?;
    with_envs(p.cloud_env(), || p.cloud.protect_state_storage(storage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::RecordingReporter;
    use crate::testing::{valid_params, Fakes};
    use tempfile::TempDir;

    const ALL_STAGES: [&str; 13] = [
        checkpoint::PREFLIGHT,
        checkpoint::DEPENDENCIES,
        checkpoint::ONE_TIME_SETUP,
        checkpoint::REPO_PREP,
        checkpoint::VCS_TF,
        checkpoint::K8S_TF,
        checkpoint::GITOPS_VCS,
        checkpoint::K8S_DELIVERY,
        checkpoint::SECRETS_MANAGEMENT,
        checkpoint::SECRETS_MANAGEMENT_TF,
        checkpoint::USERS_TF,
        checkpoint::CORE_SERVICES_TF,
        checkpoint::TF_STORE_HARDENING,
    ];

    fn configured_store(dir: &TempDir) -> StateStore {
        let mut store = StateStore::open(dir.path()).unwrap();
        configure(&mut store, valid_params()).unwrap();
        store
    }

    fn run(fakes: &Fakes, dir: &TempDir, store: &mut StateStore) -> Result<SetupSummary> {
        let platform = fakes.platform();
        let reporter = RecordingReporter::new();
        let mut ctx = SetupContext {
            store,
            home: dir.path(),
            platform: &platform,
            reporter: &reporter,
        };
        run_setup(&mut ctx)
    }

    #[test]
    fn full_setup_records_every_checkpoint_and_key() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_FULL");
        let mut store = configured_store(&dir);

        let summary = run(&fakes, &dir, &mut store).unwrap();

        assert_eq!(store.checkpoints(), ALL_STAGES);
        for token in [
            param::CC_CLUSTER_FQDN,
            param::CLOUD_PROVIDER,
            param::GIT_REPOSITORY_GIT_URL,
            param::CC_CLUSTER_ENDPOINT,
            param::ARGOCD_URL,
            param::VAULT_URL,
        ] {
            assert!(store.param(token).is_some(), "missing param {token}");
        }
        for key in [
            internal::KCTL_CONFIG_PATH,
            internal::VAULT_ROOT_TOKEN,
            internal::TF_BACKEND_STORAGE_NAME,
            internal::DEFAULT_SSH_PRIVATE_KEY_PATH,
            internal::TF_BINARY,
            internal::GIT_USER_LOGIN,
        ] {
            assert!(store.internal(key).is_some(), "missing internal {key}");
        }
        assert_eq!(store.param(param::CC_CLUSTER_FQDN), Some("demo.example.com"));
        assert_eq!(store.internal(internal::VAULT_ROOT_TOKEN), Some("hvs.fake-root"));
        assert!(store.fragment(fragment::TF_VCS_REMOTE_BACKEND).is_some());
        assert_eq!(summary.argocd_url.as_deref(), Some("https://argocd.demo.example.com"));

        // Persisted after the last stage.
        let reloaded = StateStore::open(dir.path()).unwrap();
        assert_eq!(reloaded.checkpoints().len(), 13);

        // Templates were rendered in the GitOps checkout.
        let main_tf =
            std::fs::read_to_string(paths::tf_module_dir(dir.path(), paths::TF_VCS_DIR).join("main.tf"))
                .unwrap();
        assert!(main_tf.contains("backend \"fake\""));
        assert!(main_tf.contains("org = \"acme\""));

        let kubeconfig = std::fs::read_to_string(paths::kubeconfig_path(dir.path())).unwrap();
        assert!(kubeconfig.contains("https://k8s.fake.example"));
        assert_eq!(fakes.terraform.applied().len(), 5);
        assert_eq!(fakes.http.urls(), ["https://vault.demo.example.com", "https://argocd.demo.example.com"]);
        assert!(fakes
            .http
            .budgets()
            .iter()
            .all(|b| *b == fakes.platform().waits.http));
        assert_eq!(fakes.repo.authors(), ["Octo Cat <octo@example.com>"]);
    }

    #[test]
    fn preflight_retries_throttled_registrar() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_THROTTLE");
        // The first two registrar calls are rejected.
        fakes.dns.throttled.set(2);
        let mut store = configured_store(&dir);
        run(&fakes, &dir, &mut store).unwrap();
        assert!(store.has_checkpoint(checkpoint::PREFLIGHT));
        assert_eq!(store.internal(internal::DOMAIN_ZONE_ID), Some("Z0FAKE"));
    }

    #[test]
    fn endpoints_wait_for_ingress_and_certificate() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_EXPOSE");
        let mut store = configured_store(&dir);
        run(&fakes, &dir, &mut store).unwrap();

        let watched = fakes.cluster.watched();
        let position = |r: &str| {
            watched
                .iter()
                .position(|w| w == r)
                .unwrap_or_else(|| panic!("{r} never waited on: {watched:?}"))
        };
        let vault_ingress = position("ingress/vault in vault");
        let vault_cert = position("certificates.cert-manager.io/vault-tls in vault");
        let argocd_ingress = position("ingress/argocd-server in argocd");
        let argocd_cert = position("certificates.cert-manager.io/argocd-server-tls in argocd");
        assert!(vault_ingress < vault_cert);
        assert!(vault_cert < argocd_ingress);
        assert!(argocd_ingress < argocd_cert);
    }

    #[test]
    fn rerun_skips_completed_vcs_stage() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_SKIP");
        let mut store = configured_store(&dir);
        for name in &ALL_STAGES[..5] {
            store.set_checkpoint(name);
        }
        // What the skipped stages would have produced.
        store.set_param(param::PRIMARY_CLUSTER_NAME, "cc-cluster");
        store.set_param(param::CC_CLUSTER_FQDN, "demo.example.com");
        store.set_param(param::GIT_REPOSITORY_GIT_URL, "git@github.com:acme/gitops.git");
        store.set_internal(internal::TF_BACKEND_STORAGE_NAME, "cc-cluster-tf-state-0a1b2c3d");
        store.set_internal(internal::DEFAULT_SSH_PRIVATE_KEY_PATH, fakes.write_key(dir.path()).display().to_string());
        fakes.seed_gitops(dir.path());

        run(&fakes, &dir, &mut store).unwrap();

        let vcs_dir = paths::tf_module_dir(dir.path(), paths::TF_VCS_DIR);
        assert_eq!(fakes.terraform.applies_in(&vcs_dir), 0);
        assert_eq!(fakes.git.calls(), 0);
        assert_eq!(fakes.terraform.applied().len(), 4);
        assert!(store.has_checkpoint(checkpoint::TF_STORE_HARDENING));
    }

    #[test]
    fn failed_stage_leaves_no_checkpoint() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_FAIL");
        fakes.terraform.fail_on(paths::TF_HOSTING_DIR);
        let mut store = configured_store(&dir);

        let err = run(&fakes, &dir, &mut store).unwrap_err();

        assert_eq!(err.failed_stage(), Some(checkpoint::K8S_TF));
        assert!(!store.has_checkpoint(checkpoint::K8S_TF));
        assert!(store.has_checkpoint(checkpoint::VCS_TF));
        let reloaded = StateStore::open(dir.path()).unwrap();
        assert!(!reloaded.has_checkpoint(checkpoint::K8S_TF));
        assert_eq!(reloaded.checkpoints().last().map(String::as_str), Some(checkpoint::VCS_TF));
    }

    #[test]
    fn credentials_are_scoped_to_tool_calls() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_ENV");
        fakes.terraform.fail_on(paths::TF_USERS_DIR);
        let mut store = configured_store(&dir);

        run(&fakes, &dir, &mut store).unwrap_err();

        // Visible while terraform ran, gone afterwards, including after the failed apply.
        let seen = fakes.terraform.seen_env();
        assert!(seen.iter().any(|v| v.as_deref() == Some("git-secret")));
        for key in fakes.env_keys() {
            assert!(std::env::var(&key).is_err(), "{key} leaked");
        }
    }

    #[test]
    fn preflight_rejects_existing_repository() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_REPO");
        fakes.git.repo_exists.set(true);
        let mut store = configured_store(&dir);

        let err = run(&fakes, &dir, &mut store).unwrap_err();
        assert_eq!(err.failed_stage(), Some(checkpoint::PREFLIGHT));
        assert!(err.to_string().contains("acme/gitops already exists"));
        assert!(store.checkpoints().is_empty());
    }

    #[test]
    fn preflight_fails_without_domain_ownership() {
        let dir = TempDir::new().unwrap();
        let fakes = Fakes::new("SETUP_DNS");
        fakes.dns.propagate.set(false);
        let mut store = configured_store(&dir);

        let err = run(&fakes, &dir, &mut store).unwrap_err();
        assert!(err.to_string().contains("could not verify ownership of demo.example.com"));
        assert_eq!(fakes.sleeper.delays().len(), 2);
    }

    #[test]
    fn configure_rejects_profile_with_keys_before_writing() {
        let dir = TempDir::new().unwrap();
        let mut store = StateStore::open(dir.path()).unwrap();
        let mut params = valid_params();
        params.cloud_account_key = Some("AKIAEXAMPLE".into());
        params.cloud_account_secret = Some("secret".into());

        let err = configure(&mut store, params).unwrap_err();
        assert!(err.to_string().contains("cloud_profile cannot be combined"));
        assert!(store.input_params().is_empty());
        assert!(!store.is_persisted());
    }

    #[test]
    fn configure_keeps_persisted_values_after_preflight() {
        let dir = TempDir::new().unwrap();
        let mut store = configured_store(&dir);
        store.set_checkpoint(checkpoint::PREFLIGHT);
        let mut changed = valid_params();
        changed.domain_name = Some("other.example.com".into());

        let merged = configure(&mut store, changed).unwrap();
        assert_eq!(merged.domain_name.as_deref(), Some("demo.example.com"));
    }

    #[test]
    fn kubeconfig_uses_exec_plugin() {
        let auth = K8sAuthCommand {
            command: "aws".into(),
            args: vec!["eks".into(), "get-token".into()],
        };
        let yaml = kubeconfig_yaml("cc-cluster", "https://k8s", "Q0E=", &auth).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["current-context"].as_str(), Some("cc-cluster"));
        assert_eq!(doc["users"][0]["user"]["exec"]["command"].as_str(), Some("aws"));
    }

    #[test]
    fn storage_name_is_prefixed_by_cluster() {
        let name = state_storage_name("cc-cluster");
        assert!(name.starts_with("cc-cluster-tf-state-"));
        assert_eq!(name.len(), "cc-cluster-tf-state-".len() + 8);
    }
}
