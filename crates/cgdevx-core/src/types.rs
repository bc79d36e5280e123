use crate::error::DevxError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Checkpoint names
// ---------------------------------------------------------------------------

/// Stage names recorded in the state store once a stage has completed.
pub mod checkpoint {
    pub const PREFLIGHT: &str = "preflight";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const ONE_TIME_SETUP: &str = "one-time-setup";
    pub const REPO_PREP: &str = "repo-prep";
    pub const VCS_TF: &str = "vcs-tf";
    pub const K8S_TF: &str = "k8s-tf";
    pub const GITOPS_VCS: &str = "gitops-vcs";
    pub const K8S_DELIVERY: &str = "k8s-delivery";
    pub const SECRETS_MANAGEMENT: &str = "secrets-management";
    pub const SECRETS_MANAGEMENT_TF: &str = "secrets-management-tf";
    pub const USERS_TF: &str = "users-tf";
    pub const CORE_SERVICES_TF: &str = "core-services-tf";
    pub const TF_STORE_HARDENING: &str = "tf-store-hardening";

    /// Marker recorded once the teardown mirroring `stage` has completed.
    pub fn destroyed(stage: &str) -> String {
        format!("destroy:{stage}")
    }
}

/// Template tokens written to the store's `params` section.
pub mod param {
    pub const CLOUD_PROVIDER: &str = "<CLOUD_PROVIDER>";
    pub const CLOUD_REGION: &str = "<CLOUD_REGION>";
    pub const PRIMARY_CLUSTER_NAME: &str = "<PRIMARY_CLUSTER_NAME>";
    pub const CC_CLUSTER_FQDN: &str = "<CC_CLUSTER_FQDN>";
    pub const OWNER_EMAIL: &str = "<OWNER_EMAIL>";
    pub const GIT_PROVIDER: &str = "<GIT_PROVIDER>";
    pub const GIT_ORGANIZATION_NAME: &str = "<GIT_ORGANIZATION_NAME>";
    pub const GITOPS_REPOSITORY_NAME: &str = "<GITOPS_REPOSITORY_NAME>";
    pub const GIT_REPOSITORY_GIT_URL: &str = "<GIT_REPOSITORY_GIT_URL>";
    pub const GIT_REPOSITORY_URL: &str = "<GIT_REPOSITORY_URL>";
    pub const VCS_BOT_SSH_PUBLIC_KEY: &str = "<VCS_BOT_SSH_PUBLIC_KEY>";
    pub const CC_CLUSTER_ENDPOINT: &str = "<CC_CLUSTER_ENDPOINT>";
    pub const ARGOCD_URL: &str = "<ARGOCD_URL>";
    pub const VAULT_URL: &str = "<VAULT_URL>";
    pub const REGISTRY_URL: &str = "<REGISTRY_URL>";
}

/// Block tokens written to the store's `fragments` section.
pub mod fragment {
    pub const TF_VCS_REMOTE_BACKEND: &str = "# <TF_VCS_REMOTE_BACKEND>";
    pub const TF_HOSTING_REMOTE_BACKEND: &str = "# <TF_HOSTING_REMOTE_BACKEND>";
    pub const TF_SECRETS_REMOTE_BACKEND: &str = "# <TF_SECRETS_REMOTE_BACKEND>";
    pub const TF_USERS_REMOTE_BACKEND: &str = "# <TF_USERS_REMOTE_BACKEND>";
    pub const TF_CORE_SERVICES_REMOTE_BACKEND: &str = "# <TF_CORE_SERVICES_REMOTE_BACKEND>";
    pub const TF_HOSTING_PROVIDER: &str = "# <TF_HOSTING_PROVIDER>";
}

/// Keys of the store's `internal` section.
pub mod internal {
    pub const GIT_USER_LOGIN: &str = "GIT_USER_LOGIN";
    pub const GIT_USER_NAME: &str = "GIT_USER_NAME";
    pub const GIT_USER_EMAIL: &str = "GIT_USER_EMAIL";
    pub const DOMAIN_ZONE_ID: &str = "DOMAIN_ZONE_ID";
    pub const TF_BINARY: &str = "TF_BINARY";
    pub const KUBECTL_BINARY: &str = "KUBECTL_BINARY";
    pub const GIT_BINARY: &str = "GIT_BINARY";
    pub const DEFAULT_SSH_PRIVATE_KEY_PATH: &str = "DEFAULT_SSH_PRIVATE_KEY_PATH";
    pub const DEFAULT_SSH_PUBLIC_KEY: &str = "DEFAULT_SSH_PUBLIC_KEY";
    pub const TF_BACKEND_STORAGE_NAME: &str = "TF_BACKEND_STORAGE_NAME";
    pub const KCTL_CONFIG_PATH: &str = "KCTL_CONFIG_PATH";
    pub const CC_CLUSTER_ENDPOINT: &str = "CC_CLUSTER_ENDPOINT";
    pub const CC_CLUSTER_CA_CERT_DATA: &str = "CC_CLUSTER_CA_CERT_DATA";
    pub const VAULT_ROOT_TOKEN: &str = "VAULT_ROOT_TOKEN";
    pub const VAULT_UNSEAL_KEYS: &str = "VAULT_UNSEAL_KEYS";
}

// ---------------------------------------------------------------------------
// Provider kinds
// ---------------------------------------------------------------------------

macro_rules! provider_kind {
    ($name:ident, $label:literal, { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $s)] $variant,)+
        }

        impl $name {
            pub fn all() -> &'static [$name] {
                &[$($name::$variant,)+]
            }

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $s,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DevxError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($s => Ok($name::$variant),)+
                    _ => Err(DevxError::UnknownVariant {
                        kind: $label,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

provider_kind!(CloudProviderKind, "cloud provider", {
    Aws => "aws",
    Azure => "azure",
    Gcp => "gcp",
});

provider_kind!(DnsRegistrarKind, "dns registrar", {
    Route53 => "route53",
    AzureDns => "azure_dns",
    CloudDns => "google_cloud_dns",
});

provider_kind!(GitProviderKind, "git provider", {
    GitHub => "github",
    GitLab => "gitlab",
});

impl GitProviderKind {
    /// Name of the review request on this provider, used in operator output.
    pub fn request_noun(self) -> &'static str {
        match self {
            GitProviderKind::GitHub => "pull request",
            GitProviderKind::GitLab => "merge request",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
