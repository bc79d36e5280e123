use crate::output::{print_fields, print_json, ConsoleReporter};
use crate::wiring::Collaborators;
use anyhow::Context;
use cgdevx_core::config::{SetupParams, WarnLevel};
use cgdevx_core::setup::{self, SetupContext};
use cgdevx_core::state::StateStore;
use clap::Args;
use std::path::{Path, PathBuf};

/// Flags override values read from `--config-file`.
#[derive(Args, Debug, Default)]
pub struct SetupArgs {
    /// YAML file with setup parameters
    #[arg(long, env = "CGDEVX_CONFIG_FILE")]
    config_file: Option<PathBuf>,

    /// aws, azure or gcp
    #[arg(long, env = "CGDEVX_CLOUD_PROVIDER")]
    cloud_provider: Option<String>,

    /// Named cloud CLI profile (exclusive with account key/secret)
    #[arg(long, env = "CGDEVX_CLOUD_PROFILE")]
    cloud_profile: Option<String>,

    #[arg(long, env = "CGDEVX_CLOUD_ACCOUNT_KEY")]
    cloud_account_key: Option<String>,

    #[arg(long, env = "CGDEVX_CLOUD_ACCOUNT_SECRET", hide_env_values = true)]
    cloud_account_secret: Option<String>,

    #[arg(long, env = "CGDEVX_CLOUD_REGION")]
    cloud_region: Option<String>,

    /// Azure subscription id
    #[arg(long, env = "CGDEVX_CLOUD_SUBSCRIPTION_ID")]
    cloud_subscription_id: Option<String>,

    /// GCP project id
    #[arg(long, env = "CGDEVX_CLOUD_PROJECT")]
    cloud_project: Option<String>,

    #[arg(long, env = "CGDEVX_CLUSTER_NAME")]
    cluster_name: Option<String>,

    /// route53, azure_dns or google_cloud_dns
    #[arg(long, env = "CGDEVX_DNS_REGISTRAR")]
    dns_registrar: Option<String>,

    #[arg(long, env = "CGDEVX_DOMAIN_NAME")]
    domain_name: Option<String>,

    /// github or gitlab
    #[arg(long, env = "CGDEVX_GIT_PROVIDER")]
    git_provider: Option<String>,

    /// Organization (GitHub) or group (GitLab) owning the repositories
    #[arg(long, env = "CGDEVX_GIT_ORG")]
    git_org: Option<String>,

    #[arg(long, env = "CGDEVX_GIT_ACCESS_TOKEN", hide_env_values = true)]
    git_access_token: Option<String>,

    #[arg(long, env = "CGDEVX_GITOPS_REPO_NAME")]
    gitops_repo_name: Option<String>,

    #[arg(long, env = "CGDEVX_GITOPS_TEMPLATE_URL")]
    gitops_template_url: Option<String>,

    #[arg(long, env = "CGDEVX_GITOPS_TEMPLATE_BRANCH")]
    gitops_template_branch: Option<String>,

    #[arg(long, env = "CGDEVX_ADMIN_EMAIL")]
    admin_email: Option<String>,

    /// Comma separated list of optional services
    #[arg(long, env = "CGDEVX_OPTIONAL_SERVICES", value_delimiter = ',')]
    optional_services: Vec<String>,
}

impl SetupArgs {
    fn into_params(self) -> anyhow::Result<SetupParams> {
        let from_file = match &self.config_file {
            Some(path) => SetupParams::from_file(path)
                .with_context(|| format!("failed to read config file '{}'", path.display()))?,
            None => SetupParams::default(),
        };
        let flags = SetupParams {
            cloud_provider: self.cloud_provider,
            cloud_profile: self.cloud_profile,
            cloud_account_key: self.cloud_account_key,
            cloud_account_secret: self.cloud_account_secret,
            cloud_region: self.cloud_region,
            cloud_subscription_id: self.cloud_subscription_id,
            cloud_project: self.cloud_project,
            cluster_name: self.cluster_name,
            dns_registrar: self.dns_registrar,
            domain_name: self.domain_name,
            git_provider: self.git_provider,
            git_org: self.git_org,
            git_access_token: self.git_access_token,
            gitops_repo_name: self.gitops_repo_name,
            gitops_template_url: self.gitops_template_url,
            gitops_template_branch: self.gitops_template_branch,
            admin_email: self.admin_email,
            optional_services: self.optional_services,
        };
        Ok(from_file.merged_with(flags))
    }
}

pub fn run(home: &Path, args: SetupArgs, json: bool) -> anyhow::Result<()> {
    let supplied = args.into_params()?;
    let mut store = StateStore::open(home).context("failed to load state")?;
    let params = setup::configure(&mut store, supplied).context("invalid setup configuration")?;
    for w in params.validate() {
        if w.level == WarnLevel::Warning {
            tracing::warn!("{}", w.message);
        }
    }
    store.save().context("failed to save state")?;

    let collaborators = Collaborators::build(home, &params, &store)?;
    let platform = collaborators.platform();
    let reporter = ConsoleReporter { quiet: json };
    let mut ctx = SetupContext {
        store: &mut store,
        home,
        platform: &platform,
        reporter: &reporter,
    };
    let summary = setup::run_setup(&mut ctx)?;

    if json {
        print_json(&summary)?;
    } else {
        println!();
        println!("Platform is ready.");
        print_fields(&[
            ("Cluster", summary.cluster_fqdn),
            ("GitOps repository", summary.gitops_repo_url),
            ("ArgoCD", summary.argocd_url),
            ("Vault", summary.vault_url),
            ("Registry", summary.registry_url),
        ]);
        println!(
            "Vault root token and unseal keys are stored in {}",
            summary.state_file.display()
        );
    }
    Ok(())
}
