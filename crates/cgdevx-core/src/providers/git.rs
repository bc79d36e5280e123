//! Git hosting REST clients (GitHub, GitLab).
//!
//! Requests that fail at the transport level or with a 5xx status are
//! retried with [`Backoff`]; 4xx statuses are returned to the caller.

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::env::{self, EnvVars};
use crate::error::{DevxError, Result};
use crate::retry::{Backoff, Sleeper, ThreadSleeper};
use crate::types::GitProviderKind;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GitUser {
    pub login: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// A pull request (GitHub) or merge request (GitLab) to open.
#[derive(Debug, Clone)]
pub struct ReviewRequest<'a> {
    pub repo: &'a str,
    pub head: &'a str,
    pub base: &'a str,
    pub title: &'a str,
    pub body: &'a str,
}

pub trait GitProvider {
    fn kind(&self) -> GitProviderKind;
    fn org(&self) -> &str;
    fn current_user(&self) -> Result<GitUser>;
    fn repo_exists(&self, repo: &str) -> Result<bool>;
    /// `true` when the token carries every scope the platform needs.
    fn evaluate_permissions(&self) -> Result<bool>;
    /// Open a review request and return its web URL.
    fn create_pr(&self, request: &ReviewRequest<'_>) -> Result<String>;
    /// Variables the Terraform VCS module reads.
    fn env_vars(&self) -> EnvVars;
    fn ssh_url(&self, repo: &str) -> String;
    fn https_url(&self, repo: &str) -> String;
}

// ---------------------------------------------------------------------------
// Shared HTTP plumbing
// ---------------------------------------------------------------------------

struct Api {
    client: Client,
    base_url: String,
    service: &'static str,
    backoff: Backoff,
    sleeper: Box<dyn Sleeper>,
}

impl Api {
    fn new(service: &'static str, base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cgdevx/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service,
            backoff: Backoff::default(),
            sleeper: Box::new(ThreadSleeper),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request built by `build`, retrying transport errors and 5xx.
    fn send<F>(&self, what: &str, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        self.backoff.run(what, self.sleeper.as_ref(), || {
            let resp = build(&self.client).send().map_err(|e| e.to_string())?;
            if resp.status().is_server_error() {
                return Err(format!("status {}", resp.status()));
            }
            Ok(resp)
        })
    }

    fn json(&self, resp: Response) -> Result<Value> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(DevxError::Api {
                service: self.service.to_string(),
                message: format!("status {status}: {body}"),
            });
        }
        Ok(resp.json()?)
    }
}

fn field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

pub const GITHUB_API_URL: &str = "https://api.github.com";

/// OAuth scopes a classic personal access token must carry.
pub const GITHUB_REQUIRED_SCOPES: &[&str] = &["repo", "admin:org", "workflow", "delete_repo"];

pub struct GitHub {
    api: Api,
    org: String,
    token: String,
}

impl GitHub {
    pub fn new(org: &str, token: &str) -> Result<Self> {
        Self::with_base_url(GITHUB_API_URL, org, token)
    }

    pub fn with_base_url(base_url: &str, org: &str, token: &str) -> Result<Self> {
        Ok(Self {
            api: Api::new("github", base_url)?,
            org: org.to_string(),
            token: token.to_string(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff, sleeper: Box<dyn Sleeper>) -> Self {
        self.api.backoff = backoff;
        self.api.sleeper = sleeper;
        self
    }

    fn get(&self, path: &str) -> Result<Response> {
        let url = self.api.url(path);
        self.api.send(&format!("GET {path}"), |c| {
            c.get(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
        })
    }
}

impl GitProvider for GitHub {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitHub
    }

    fn org(&self) -> &str {
        &self.org
    }

    fn current_user(&self) -> Result<GitUser> {
        let resp = self.get("/user")?;
        let user = self.api.json(resp)?;
        Ok(serde_json::from_value(user)?)
    }

    fn repo_exists(&self, repo: &str) -> Result<bool> {
        let resp = self.get(&format!("/repos/{}/{repo}", self.org))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => self.api.json(resp).map(|_| true),
        }
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        let resp = self.get("/user")?;
        let scopes: Vec<String> = resp
            .headers()
            .get("x-oauth-scopes")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        self.api.json(resp)?;
        let missing: Vec<&str> = GITHUB_REQUIRED_SCOPES
            .iter()
            .copied()
            .filter(|s| !scopes.iter().any(|have| have == s))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "github token is missing scopes");
        }
        Ok(missing.is_empty())
    }

    fn create_pr(&self, request: &ReviewRequest<'_>) -> Result<String> {
        let path = format!("/repos/{}/{}/pulls", self.org, request.repo);
        let url = self.api.url(&path);
        let body = json!({
            "title": request.title,
            "head": request.head,
            "base": request.base,
            "body": request.body,
        });
        let resp = self.api.send(&format!("POST {path}"), |c| {
            c.post(&url)
                .bearer_auth(&self.token)
                .header("Accept", "application/vnd.github+json")
                .json(&body)
        })?;
        let pr = self.api.json(resp)?;
        field(&pr, "html_url")
            .map(str::to_string)
            .ok_or_else(|| DevxError::Api {
                service: "github".into(),
                message: "pull request response has no html_url".into(),
            })
    }

    fn env_vars(&self) -> EnvVars {
        env::non_empty([
            ("GITHUB_TOKEN", Some(self.token.clone())),
            ("GITHUB_OWNER", Some(self.org.clone())),
        ])
    }

    fn ssh_url(&self, repo: &str) -> String {
        format!("git@github.com:{}/{repo}.git", self.org)
    }

    fn https_url(&self, repo: &str) -> String {
        format!("https://github.com/{}/{repo}", self.org)
    }
}

// ---------------------------------------------------------------------------
// GitLab
// ---------------------------------------------------------------------------

pub const GITLAB_API_URL: &str = "https://gitlab.com/api/v4";

pub struct GitLab {
    api: Api,
    group: String,
    token: String,
}

/// URL-encode a `group/project` path for the `/projects/:id` routes.
fn project_id(group: &str, repo: &str) -> String {
    format!("{group}/{repo}").replace('/', "%2F")
}

impl GitLab {
    pub fn new(group: &str, token: &str) -> Result<Self> {
        Self::with_base_url(GITLAB_API_URL, group, token)
    }

    pub fn with_base_url(base_url: &str, group: &str, token: &str) -> Result<Self> {
        Ok(Self {
            api: Api::new("gitlab", base_url)?,
            group: group.to_string(),
            token: token.to_string(),
        })
    }

    pub fn with_backoff(mut self, backoff: Backoff, sleeper: Box<dyn Sleeper>) -> Self {
        self.api.backoff = backoff;
        self.api.sleeper = sleeper;
        self
    }

    fn get(&self, path: &str) -> Result<Response> {
        let url = self.api.url(path);
        self.api.send(&format!("GET {path}"), |c| {
            c.get(&url).header("PRIVATE-TOKEN", &self.token)
        })
    }
}

impl GitProvider for GitLab {
    fn kind(&self) -> GitProviderKind {
        GitProviderKind::GitLab
    }

    fn org(&self) -> &str {
        &self.group
    }

    fn current_user(&self) -> Result<GitUser> {
        let resp = self.get("/user")?;
        let user = self.api.json(resp)?;
        Ok(GitUser {
            login: field(&user, "username").unwrap_or_default().to_string(),
            name: field(&user, "name").map(str::to_string),
            email: field(&user, "email").map(str::to_string),
        })
    }

    fn repo_exists(&self, repo: &str) -> Result<bool> {
        let resp = self.get(&format!("/projects/{}", project_id(&self.group, repo)))?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            _ => self.api.json(resp).map(|_| true),
        }
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        let resp = self.get("/personal_access_tokens/self")?;
        let token = self.api.json(resp)?;
        let has_api = token
            .get("scopes")
            .and_then(Value::as_array)
            .is_some_and(|s| s.iter().any(|v| v.as_str() == Some("api")));
        if !has_api {
            tracing::warn!("gitlab token is missing the 'api' scope");
        }
        Ok(has_api)
    }

    fn create_pr(&self, request: &ReviewRequest<'_>) -> Result<String> {
        let path = format!("/projects/{}/merge_requests", project_id(&self.group, request.repo));
        let url = self.api.url(&path);
        let body = json!({
            "title": request.title,
            "source_branch": request.head,
            "target_branch": request.base,
            "description": request.body,
        });
        let resp = self.api.send(&format!("POST {path}"), |c| {
            c.post(&url).header("PRIVATE-TOKEN", &self.token).json(&body)
        })?;
        let mr = self.api.json(resp)?;
        field(&mr, "web_url")
            .map(str::to_string)
            .ok_or_else(|| DevxError::Api {
                service: "gitlab".into(),
                message: "merge request response has no web_url".into(),
            })
    }

    fn env_vars(&self) -> EnvVars {
        env::non_empty([
            ("GITLAB_TOKEN", Some(self.token.clone())),
            ("GITLAB_OWNER", Some(self.group.clone())),
        ])
    }

    fn ssh_url(&self, repo: &str) -> String {
        format!("git@gitlab.com:{}/{repo}.git", self.group)
    }

    fn https_url(&self, repo: &str) -> String {
        format!("https://gitlab.com/{}/{repo}", self.group)
    }
}

/// Construct the client for `kind`.
pub fn for_kind(kind: GitProviderKind, org: &str, token: &str) -> Result<Box<dyn GitProvider>> {
    Ok(match kind {
        GitProviderKind::GitHub => Box::new(GitHub::new(org, token)?),
        GitProviderKind::GitLab => Box::new(GitLab::new(org, token)?),
    })
}
