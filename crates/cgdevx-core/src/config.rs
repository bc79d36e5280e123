use crate::error::{DevxError, Result};
use crate::paths;
use crate::types::{CloudProviderKind, DnsRegistrarKind, GitProviderKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_CLUSTER_NAME: &str = "cc-cluster";
pub const DEFAULT_GITOPS_REPO_NAME: &str = "gitops";
pub const DEFAULT_GITOPS_TEMPLATE_URL: &str = "https://github.com/CloudGeometry/cg-devx-core.git";
pub const DEFAULT_GITOPS_TEMPLATE_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

impl ConfigWarning {
    fn error(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            level: WarnLevel::Warning,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// SetupParams
// ---------------------------------------------------------------------------

/// Operator input for `setup`, read from a config file or from flags.
///
/// Field names are the keys persisted in the `input` section of the state
/// store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetupParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_account_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_account_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_registrar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitops_repo_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitops_template_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitops_template_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_email: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_services: Vec<String>,
}

fn present(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

impl SetupParams {
    /// Parse a YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let params: SetupParams = serde_yaml::from_str(&data)?;
        Ok(params)
    }

    /// Rebuild params from the persisted `input` section.
    pub fn from_input(input: &BTreeMap<String, serde_yaml::Value>) -> Result<Self> {
        let mapping: serde_yaml::Mapping = input
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (serde_yaml::Value::from(k.as_str()), v.clone()))
            .collect();
        let params: SetupParams = serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))?;
        Ok(params)
    }

    /// Flatten into `(key, value)` pairs for [`crate::state::StateStore::update_input_params`].
    pub fn to_input(&self) -> Result<BTreeMap<String, serde_yaml::Value>> {
        let value = serde_yaml::to_value(self)?;
        let mut out = BTreeMap::new();
        if let serde_yaml::Value::Mapping(map) = value {
            for (k, v) in map {
                if let Some(key) = k.as_str() {
                    out.insert(key.to_string(), v);
                }
            }
        }
        Ok(out)
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merged_with(mut self, other: SetupParams) -> Self {
        macro_rules! overlay {
            ($($field:ident),+) => {
                $(if other.$field.is_some() { self.$field = other.$field; })+
            };
        }
        overlay!(
            cloud_provider,
            cloud_profile,
            cloud_account_key,
            cloud_account_secret,
            cloud_region,
            cloud_subscription_id,
            cloud_project,
            cluster_name,
            dns_registrar,
            domain_name,
            git_provider,
            git_org,
            git_access_token,
            gitops_repo_name,
            gitops_template_url,
            gitops_template_branch,
            admin_email
        );
        if !other.optional_services.is_empty() {
            self.optional_services = other.optional_services;
        }
        self
    }

    /// Fill optional fields that have a documented default.
    pub fn with_defaults(mut self) -> Self {
        self.cluster_name
            .get_or_insert_with(|| DEFAULT_CLUSTER_NAME.to_string());
        self.gitops_repo_name
            .get_or_insert_with(|| DEFAULT_GITOPS_REPO_NAME.to_string());
        self.gitops_template_url
            .get_or_insert_with(|| DEFAULT_GITOPS_TEMPLATE_URL.to_string());
        self.gitops_template_branch
            .get_or_insert_with(|| DEFAULT_GITOPS_TEMPLATE_BRANCH.to_string());
        self
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        let required = [
            ("cloud_provider", &self.cloud_provider),
            ("cloud_region", &self.cloud_region),
            ("dns_registrar", &self.dns_registrar),
            ("domain_name", &self.domain_name),
            ("git_provider", &self.git_provider),
            ("git_org", &self.git_org),
            ("git_access_token", &self.git_access_token),
            ("admin_email", &self.admin_email),
        ];
        for (key, value) in required {
            if !present(value) {
                warnings.push(ConfigWarning::error(format!("missing required parameter '{key}'")));
            }
        }

        let cloud = self
            .cloud_provider
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<CloudProviderKind>);
        if let Some(Err(e)) = &cloud {
            warnings.push(ConfigWarning::error(e.to_string()));
        }
        if let Some(Err(e)) = self
            .dns_registrar
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<DnsRegistrarKind>)
        {
            warnings.push(ConfigWarning::error(e.to_string()));
        }
        if let Some(Err(e)) = self
            .git_provider
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::parse::<GitProviderKind>)
        {
            warnings.push(ConfigWarning::error(e.to_string()));
        }

        // Credentials: a named profile OR an explicit key pair, never both.
        let has_profile = present(&self.cloud_profile);
        let has_key = present(&self.cloud_account_key);
        let has_secret = present(&self.cloud_account_secret);
        if has_profile && (has_key || has_secret) {
            warnings.push(ConfigWarning::error(
                "cloud_profile cannot be combined with cloud_account_key/cloud_account_secret",
            ));
        }
        if has_key != has_secret {
            warnings.push(ConfigWarning::error(
                "cloud_account_key and cloud_account_secret must be provided together",
            ));
        }

        match cloud {
            Some(Ok(CloudProviderKind::Azure)) if !present(&self.cloud_subscription_id) => {
                warnings.push(ConfigWarning::error(
                    "cloud_subscription_id is required for azure",
                ));
            }
            Some(Ok(CloudProviderKind::Gcp)) if !present(&self.cloud_project) => {
                warnings.push(ConfigWarning::error("cloud_project is required for gcp"));
            }
            Some(Ok(CloudProviderKind::Aws)) if !has_profile && !has_key => {
                warnings.push(ConfigWarning::warning(
                    "no cloud_profile or account keys given; ambient AWS credentials will be used",
                ));
            }
            _ => {}
        }

        if let Some(domain) = self.domain_name.as_deref().filter(|s| !s.is_empty()) {
            if !paths::is_valid_fqdn(domain) {
                warnings.push(ConfigWarning::error(format!(
                    "domain_name '{domain}' is not a valid lowercase FQDN"
                )));
            }
        }
        for (key, value) in [
            ("cluster_name", &self.cluster_name),
            ("gitops_repo_name", &self.gitops_repo_name),
        ] {
            if let Some(v) = value.as_deref() {
                if !paths::is_valid_slug(v) {
                    warnings.push(ConfigWarning::error(format!(
                        "{key} '{v}' must be lowercase alphanumeric with hyphens"
                    )));
                }
            }
        }
        if let Some(email) = self.admin_email.as_deref().filter(|s| !s.is_empty()) {
            if !email.contains('@') {
                warnings.push(ConfigWarning::error(format!(
                    "admin_email '{email}' is not an email address"
                )));
            }
        }

        warnings
    }

    /// Run [`SetupParams::validate`] and fail on any error-level finding.
    pub fn check(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DevxError::InvalidConfig(errors.join("; ")))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_params() -> SetupParams {
        SetupParams {
            cloud_provider: Some("aws".into()),
            cloud_profile: Some("default".into()),
            cloud_region: Some("us-east-1".into()),
            dns_registrar: Some("route53".into()),
            domain_name: Some("demo.example.com".into()),
            git_provider: Some("github".into()),
            git_org: Some("acme".into()),
            git_access_token: Some("ghp_token".into()),
            admin_email: Some("ops@example.com".into()),
            ..SetupParams::default()
        }
        .with_defaults()
    }

    fn errors(p: &SetupParams) -> Vec<String> {
        p.validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect()
    }

    #[test]
    fn valid_params_pass() {
        assert!(errors(&valid_params()).is_empty());
        valid_params().check().unwrap();
    }

    #[test]
    fn profile_and_keys_are_mutually_exclusive() {
        let p = SetupParams {
            cloud_account_key: Some("AKIAEXAMPLE".into()),
            cloud_account_secret: Some("secret".into()),
            ..valid_params()
        };
        let err = p.check().unwrap_err();
        assert!(matches!(err, DevxError::InvalidConfig(_)));
        assert!(err.to_string().contains("cloud_profile cannot be combined"));
    }

    #[test]
    fn key_without_secret_is_rejected() {
        let p = SetupParams {
            cloud_profile: None,
            cloud_account_key: Some("AKIAEXAMPLE".into()),
            ..valid_params()
        };
        assert!(errors(&p)
            .iter()
            .any(|m| m.contains("must be provided together")));
    }

    #[test]
    fn missing_required_keys_reported() {
        let errs = errors(&SetupParams::default());
        assert!(errs.iter().any(|m| m.contains("'cloud_provider'")));
        assert!(errs.iter().any(|m| m.contains("'git_access_token'")));
    }

    #[test]
    fn azure_requires_subscription() {
        let p = SetupParams {
            cloud_provider: Some("azure".into()),
            dns_registrar: Some("azure_dns".into()),
            ..valid_params()
        };
        assert!(errors(&p).iter().any(|m| m.contains("cloud_subscription_id")));
    }

    #[test]
    fn unknown_provider_rejected() {
        let p = SetupParams {
            git_provider: Some("bitbucket".into()),
            ..valid_params()
        };
        assert!(errors(&p).iter().any(|m| m.contains("unknown git provider")));
    }

    #[test]
    fn invalid_domain_rejected() {
        let p = SetupParams {
            domain_name: Some("not a domain".into()),
            ..valid_params()
        };
        assert!(errors(&p).iter().any(|m| m.contains("domain_name")));
    }

    #[test]
    fn aws_without_credentials_is_only_a_warning() {
        let p = SetupParams {
            cloud_profile: None,
            ..valid_params()
        };
        let all = p.validate();
        assert!(all.iter().all(|w| w.level == WarnLevel::Warning));
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn input_roundtrip_through_store_map() {
        let p = valid_params();
        let input = p.to_input().unwrap();
        assert_eq!(input["cloud_provider"], serde_yaml::Value::from("aws"));
        assert!(!input.contains_key("cloud_account_key"));
        let back = SetupParams::from_input(&input).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn merge_prefers_newer_values() {
        let base = valid_params();
        let newer = SetupParams {
            cloud_region: Some("eu-west-1".into()),
            ..SetupParams::default()
        };
        let merged = base.merged_with(newer);
        assert_eq!(merged.cloud_region.as_deref(), Some("eu-west-1"));
        assert_eq!(merged.git_org.as_deref(), Some("acme"));
    }

    #[test]
    fn config_file_rejects_unknown_keys() {
        let yaml = "cloud_provider: aws\ncloud_regoin: us-east-1\n";
        assert!(serde_yaml::from_str::<SetupParams>(yaml).is_err());
    }

    #[test]
    fn defaults_filled() {
        let p = SetupParams::default().with_defaults();
        assert_eq!(p.cluster_name.as_deref(), Some(DEFAULT_CLUSTER_NAME));
        assert_eq!(p.gitops_repo_name.as_deref(), Some(DEFAULT_GITOPS_REPO_NAME));
    }
}
