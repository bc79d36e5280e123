//! Cloud account operations: Terraform state storage, permission checks,
//! backend/provider snippets and cluster authentication.
//!
//! Every implementation drives the vendor CLI. Credentials are not passed
//! on the command line; callers activate [`CloudProvider::env_vars`] around
//! each call.

use serde_json::Value;

use crate::config::SetupParams;
use crate::env::{self, EnvVars};
use crate::error::{DevxError, Result};
use crate::providers::process::ToolCommand;
use crate::types::CloudProviderKind;

/// Credentials and placement shared by all cloud implementations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloudSettings {
    pub region: String,
    pub profile: Option<String>,
    pub account_key: Option<String>,
    pub account_secret: Option<String>,
    pub subscription_id: Option<String>,
    pub project: Option<String>,
}

impl CloudSettings {
    pub fn from_params(params: &SetupParams) -> Self {
        Self {
            region: params.cloud_region.clone().unwrap_or_default(),
            profile: params.cloud_profile.clone(),
            account_key: params.cloud_account_key.clone(),
            account_secret: params.cloud_account_secret.clone(),
            subscription_id: params.cloud_subscription_id.clone(),
            project: params.cloud_project.clone(),
        }
    }
}

/// Command a kubeconfig `exec` entry runs to obtain a cluster token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct K8sAuthCommand {
    pub command: String,
    pub args: Vec<String>,
}

pub trait CloudProvider {
    fn kind(&self) -> CloudProviderKind;
    /// Variables Terraform and the vendor CLI read credentials from.
    fn env_vars(&self) -> EnvVars;
    /// `true` when the identity may create everything the platform needs.
    fn evaluate_permissions(&self) -> Result<bool>;
    /// Create the Terraform state bucket/container named `name`.
    fn create_state_storage(&self, name: &str) -> Result<()>;
    fn destroy_state_storage(&self, name: &str) -> Result<()>;
    /// Lock the state storage down once provisioning is complete.
    fn protect_state_storage(&self, name: &str) -> Result<()>;
    /// `terraform { backend ... }` block storing `module` state in `storage`.
    fn tf_backend_snippet(&self, storage: &str, module: &str) -> String;
    /// `provider` block for the hosting module.
    fn tf_provider_snippet(&self) -> String;
    fn k8s_auth_command(&self, cluster_name: &str) -> K8sAuthCommand;
}

fn run_json(cmd: ToolCommand) -> Result<Value> {
    let out = cmd.args(["--output", "json"]).run()?;
    if out.stdout.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&out.stdout)?)
}

// ---------------------------------------------------------------------------
// AWS
// ---------------------------------------------------------------------------

/// IAM actions the platform's Terraform modules need.
const AWS_REQUIRED_ACTIONS: &[&str] = &[
    "s3:CreateBucket",
    "iam:CreateRole",
    "iam:CreatePolicy",
    "ec2:CreateVpc",
    "eks:CreateCluster",
    "route53:ChangeResourceRecordSets",
];

#[derive(Debug, Clone)]
pub struct Aws {
    settings: CloudSettings,
}

impl Aws {
    pub fn new(settings: CloudSettings) -> Self {
        Self { settings }
    }

    fn caller_arn(&self) -> Result<String> {
        let identity = run_json(ToolCommand::new("aws").args(["sts", "get-caller-identity"]))?;
        identity
            .get("Arn")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DevxError::Api {
                service: "aws sts".into(),
                message: "caller identity has no Arn".into(),
            })
    }
}

/// `true` when every `EvaluationResults[].EvalDecision` is `allowed`.
pub fn aws_all_allowed(simulation: &Value) -> bool {
    let Some(results) = simulation.get("EvaluationResults").and_then(Value::as_array) else {
        return false;
    };
    !results.is_empty()
        && results.iter().all(|r| {
            let decision = r.get("EvalDecision").and_then(Value::as_str);
            if decision != Some("allowed") {
                let action = r.get("EvalActionName").and_then(Value::as_str).unwrap_or("?");
                tracing::warn!(
                    action,
                    ?decision,
                    "permission denied"
                );
                return false;
            }
            true
        })
}

impl CloudProvider for Aws {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::Aws
    }

    fn env_vars(&self) -> EnvVars {
        let s = &self.settings;
        env::non_empty([
            ("AWS_PROFILE", s.profile.clone()),
            ("AWS_ACCESS_KEY_ID", s.account_key.clone()),
            ("AWS_SECRET_ACCESS_KEY", s.account_secret.clone()),
            ("AWS_DEFAULT_REGION", Some(s.region.clone())),
        ])
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        let arn = self.caller_arn()?;
        let simulation = run_json(
            ToolCommand::new("aws")
                .args(["iam", "simulate-principal-policy", "--policy-source-arn"])
                .arg(arn)
                .arg("--action-names")
                .args(AWS_REQUIRED_ACTIONS.iter().copied()),
        )?;
        Ok(aws_all_allowed(&simulation))
    }

    fn create_state_storage(&self, name: &str) -> Result<()> {
        let mut cmd = ToolCommand::new("aws")
            .args(["s3api", "create-bucket", "--bucket", name, "--region"])
            .arg(self.settings.region.as_str());
        // us-east-1 rejects an explicit location constraint.
        if self.settings.region != "us-east-1" {
            cmd = cmd
                .arg("--create-bucket-configuration")
                .arg(format!("LocationConstraint={}", self.settings.region));
        }
        run_json(cmd)?;
        run_json(ToolCommand::new("aws").args([
            "s3api",
            "put-bucket-versioning",
            "--bucket",
            name,
            "--versioning-configuration",
            "Status=Enabled",
        ]))?;
        Ok(())
    }

    fn destroy_state_storage(&self, name: &str) -> Result<()> {
        ToolCommand::new("aws")
            .args(["s3", "rb", format!("s3://{name}").as_str(), "--force"])
            .run()?;
        Ok(())
    }

    fn protect_state_storage(&self, name: &str) -> Result<()> {
        run_json(ToolCommand::new("aws").args([
            "s3api",
            "put-public-access-block",
            "--bucket",
            name,
            "--public-access-block-configuration",
            "BlockPublicAcls=true,IgnorePublicAcls=true,BlockPublicPolicy=true,RestrictPublicBuckets=true",
        ]))?;
        Ok(())
    }

    fn tf_backend_snippet(&self, storage: &str, module: &str) -> String {
        format!(
            "terraform {{\n  backend \"s3\" {{\n    bucket  = \"{storage}\"\n    key     = \"terraform/{module}/terraform.tfstate\"\n    region  = \"{}\"\n    encrypt = true\n  }}\n}}",
            self.settings.region
        )
    }

    fn tf_provider_snippet(&self) -> String {
        format!("provider \"aws\" {{\n  region = \"{}\"\n}}", self.settings.region)
    }

    fn k8s_auth_command(&self, cluster_name: &str) -> K8sAuthCommand {
        K8sAuthCommand {
            command: "aws".into(),
            args: vec![
                "eks".into(),
                "get-token".into(),
                "--cluster-name".into(),
                cluster_name.into(),
                "--region".into(),
                self.settings.region.clone(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Azure
// ---------------------------------------------------------------------------

/// Application id of the AKS AAD server, used by `kubelogin`.
const AKS_SERVER_APP_ID: &str = "6dae42f8-4368-4678-94ff-3960e28e3630";

#[derive(Debug, Clone)]
pub struct Azure {
    settings: CloudSettings,
}

impl Azure {
    pub fn new(settings: CloudSettings) -> Self {
        Self { settings }
    }
}

/// Storage account names are 3-24 lowercase alphanumerics.
pub fn azure_storage_account(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .take(24)
        .collect()
}

fn azure_resource_group(name: &str) -> String {
    format!("{name}-rg")
}

impl CloudProvider for Azure {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::Azure
    }

    fn env_vars(&self) -> EnvVars {
        let s = &self.settings;
        env::non_empty([
            ("ARM_SUBSCRIPTION_ID", s.subscription_id.clone()),
            ("ARM_CLIENT_ID", s.account_key.clone()),
            ("ARM_CLIENT_SECRET", s.account_secret.clone()),
            ("ARM_LOCATION", Some(s.region.clone())),
        ])
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        let account = run_json(ToolCommand::new("az").args(["account", "show"]))?;
        let state = account.get("state").and_then(Value::as_str);
        Ok(state == Some("Enabled"))
    }

    fn create_state_storage(&self, name: &str) -> Result<()> {
        let group = azure_resource_group(name);
        let account = azure_storage_account(name);
        let region = self.settings.region.as_str();
        run_json(ToolCommand::new("az").args(["group", "create", "--name", group.as_str(), "--location", region]))?;
        run_json(ToolCommand::new("az").args([
            "storage", "account", "create", "--name", account.as_str(), "--resource-group", group.as_str(),
            "--location", region, "--sku", "Standard_LRS", "--encryption-services", "blob",
        ]))?;
        run_json(ToolCommand::new("az").args([
            "storage", "container", "create", "--name", "tfstate", "--account-name", account.as_str(),
            "--auth-mode", "login",
        ]))?;
        Ok(())
    }

    fn destroy_state_storage(&self, name: &str) -> Result<()> {
        ToolCommand::new("az")
            .args(["group", "delete", "--name", azure_resource_group(name).as_str(), "--yes"])
            .run()?;
        Ok(())
    }

    fn protect_state_storage(&self, name: &str) -> Result<()> {
        run_json(ToolCommand::new("az").args([
            "storage",
            "account",
            "update",
            "--name",
            azure_storage_account(name).as_str(),
            "--resource-group",
            azure_resource_group(name).as_str(),
            "--allow-blob-public-access",
            "false",
            "--min-tls-version",
            "TLS1_2",
        ]))?;
        Ok(())
    }

    fn tf_backend_snippet(&self, storage: &str, module: &str) -> String {
        format!(
            "terraform {{\n  backend \"azurerm\" {{\n    resource_group_name  = \"{}\"\n    storage_account_name = \"{}\"\n    container_name       = \"tfstate\"\n    key                  = \"terraform/{module}/terraform.tfstate\"\n  }}\n}}",
            azure_resource_group(storage),
            azure_storage_account(storage)
        )
    }

    fn tf_provider_snippet(&self) -> String {
        "provider \"azurerm\" {\n  features {}\n}".to_string()
    }

    fn k8s_auth_command(&self, _cluster_name: &str) -> K8sAuthCommand {
        K8sAuthCommand {
            command: "kubelogin".into(),
            args: vec![
                "get-token".into(),
                "--login".into(),
                "azurecli".into(),
                "--server-id".into(),
                AKS_SERVER_APP_ID.into(),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// GCP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Gcp {
    settings: CloudSettings,
}

impl Gcp {
    pub fn new(settings: CloudSettings) -> Self {
        Self { settings }
    }

    fn project(&self) -> &str {
        self.settings.project.as_deref().unwrap_or_default()
    }
}

impl CloudProvider for Gcp {
    fn kind(&self) -> CloudProviderKind {
        CloudProviderKind::Gcp
    }

    fn env_vars(&self) -> EnvVars {
        let s = &self.settings;
        env::non_empty([
            ("GOOGLE_PROJECT", s.project.clone()),
            ("CLOUDSDK_CORE_PROJECT", s.project.clone()),
            ("GOOGLE_REGION", Some(s.region.clone())),
            // The account key is a path to a service account JSON file.
            ("GOOGLE_APPLICATION_CREDENTIALS", s.account_key.clone()),
        ])
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        let project = self.project();
        let out = ToolCommand::new("gcloud")
            .args(["projects", "describe", project, "--format", "value(lifecycleState)"])
            .run()?;
        Ok(out.stdout.trim() == "ACTIVE")
    }

    fn create_state_storage(&self, name: &str) -> Result<()> {
        let bucket = format!("gs://{name}");
        ToolCommand::new("gcloud")
            .args(["storage", "buckets", "create", bucket.as_str(), "--project", self.project()])
            .args(["--location", self.settings.region.as_str(), "--uniform-bucket-level-access"])
            .run()?;
        ToolCommand::new("gcloud")
            .args(["storage", "buckets", "update", bucket.as_str(), "--versioning"])
            .run()?;
        Ok(())
    }

    fn destroy_state_storage(&self, name: &str) -> Result<()> {
        ToolCommand::new("gcloud")
            .args(["storage", "rm", "--recursive", format!("gs://{name}").as_str()])
            .run()?;
        Ok(())
    }

    fn protect_state_storage(&self, name: &str) -> Result<()> {
        ToolCommand::new("gcloud")
            .args(["storage", "buckets", "update", format!("gs://{name}").as_str()])
            .arg("--public-access-prevention")
            .run()?;
        Ok(())
    }

    fn tf_backend_snippet(&self, storage: &str, module: &str) -> String {
        format!(
            "terraform {{\n  backend \"gcs\" {{\n    bucket = \"{storage}\"\n    prefix = \"terraform/{module}\"\n  }}\n}}"
        )
    }

    fn tf_provider_snippet(&self) -> String {
        format!(
            "provider \"google\" {{\n  project = \"{}\"\n  region  = \"{}\"\n}}",
            self.project(),
            self.settings.region
        )
    }

    fn k8s_auth_command(&self, _cluster_name: &str) -> K8sAuthCommand {
        K8sAuthCommand {
            command: "gke-gcloud-auth-plugin".into(),
            args: Vec::new(),
        }
    }
}

/// Construct the implementation for `kind`.
pub fn for_kind(kind: CloudProviderKind, settings: CloudSettings) -> Box<dyn CloudProvider> {
    match kind {
        CloudProviderKind::Aws => Box::new(Aws::new(settings)),
        CloudProviderKind::Azure => Box::new(Azure::new(settings)),
        CloudProviderKind::Gcp => Box::new(Gcp::new(settings)),
    }
}
