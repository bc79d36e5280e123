//! Kubernetes access: create/read/delete objects and watch them converge.
//!
//! The pipeline only depends on [`ClusterClient`]; [`Kubectl`] implements it
//! by shelling out to `kubectl` with the installation's kubeconfig.

use std::fmt;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::Duration;

use serde_json::Value;

use crate::error::{DevxError, Result};
use crate::providers::process::ToolCommand;

// ---------------------------------------------------------------------------
// Resource identity and watch events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn namespaced(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn cluster(kind: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {}", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// Object created or modified; carries the full object.
    Applied(Value),
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchNext {
    Event(WatchEvent),
    /// No event arrived within the requested timeout.
    TimedOut,
    /// The change stream ended.
    Closed,
}

/// A change stream for one resource.
pub trait ResourceWatch {
    /// Block up to `timeout` for the next change.
    fn next_event(&mut self, timeout: Duration) -> Result<WatchNext>;
}

// ---------------------------------------------------------------------------
// ClusterClient
// ---------------------------------------------------------------------------

pub trait ClusterClient {
    /// Create or update objects from a YAML/JSON manifest.
    fn apply_manifest(&self, manifest: &str) -> Result<()>;
    /// Create or update every manifest under `dir` (kustomize-aware).
    fn apply_kustomization(&self, dir: &Path) -> Result<()>;
    /// Read an object; `None` when it does not exist.
    fn get(&self, resource: &ResourceRef) -> Result<Option<Value>>;
    /// Names of objects of `kind` in `namespace` matching a label selector.
    fn list_names(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<String>>;
    /// JSON merge patch.
    fn patch(&self, resource: &ResourceRef, patch: &Value) -> Result<()>;
    /// Delete an object; succeeds when it is already gone.
    fn delete(&self, resource: &ResourceRef) -> Result<()>;
    /// Run a command in a pod and return its stdout.
    fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String>;
    /// Subscribe to changes of one resource, whether or not it exists yet.
    fn watch(&self, resource: &ResourceRef) -> Result<Box<dyn ResourceWatch>>;
}

// ---------------------------------------------------------------------------
// kubectl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Kubectl {
    binary: PathBuf,
    kubeconfig: PathBuf,
}

impl Kubectl {
    pub fn new(binary: impl Into<PathBuf>, kubeconfig: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: kubeconfig.into(),
        }
    }

    fn command(&self) -> ToolCommand {
        ToolCommand::new(self.binary.to_string_lossy())
            .arg("--kubeconfig")
            .arg(self.kubeconfig.to_string_lossy())
    }

    fn scoped(&self, resource: &ResourceRef) -> ToolCommand {
        let cmd = self.command();
        match &resource.namespace {
            Some(ns) => cmd.args(["-n", ns.as_str()]),
            None => cmd,
        }
    }
}

fn is_not_found(err: &DevxError) -> bool {
    matches!(err, DevxError::ToolFailed { stderr, .. } if stderr.contains("NotFound"))
}

impl ClusterClient for Kubectl {
    fn apply_manifest(&self, manifest: &str) -> Result<()> {
        self.command()
            .args(["apply", "-f", "-"])
            .stdin(manifest)
            .run()?;
        Ok(())
    }

    fn apply_kustomization(&self, dir: &Path) -> Result<()> {
        self.command()
            .args(["apply", "-k"])
            .arg(dir.to_string_lossy())
            .run()?;
        Ok(())
    }

    fn get(&self, resource: &ResourceRef) -> Result<Option<Value>> {
        match self
            .scoped(resource)
            .args(["get", resource.kind.as_str(), resource.name.as_str(), "-o", "json"])
            .run()
        {
            Ok(out) => Ok(Some(serde_json::from_str(&out.stdout)?)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_names(&self, kind: &str, namespace: &str, selector: &str) -> Result<Vec<String>> {
        let out = self
            .command()
            .args(["-n", namespace, "get", kind, "-l", selector])
            .args(["-o", "jsonpath={.items[*].metadata.name}"])
            .run()?;
        Ok(out.stdout.split_whitespace().map(str::to_string).collect())
    }

    fn patch(&self, resource: &ResourceRef, patch: &Value) -> Result<()> {
        self.scoped(resource)
            .args(["patch", resource.kind.as_str(), resource.name.as_str()])
            .args(["--type", "merge", "-p"])
            .arg(patch.to_string())
            .run()?;
        Ok(())
    }

    fn delete(&self, resource: &ResourceRef) -> Result<()> {
        self.scoped(resource)
            .args(["delete", resource.kind.as_str(), resource.name.as_str()])
            .args(["--ignore-not-found", "--wait=false"])
            .run()?;
        Ok(())
    }

    fn exec(&self, namespace: &str, pod: &str, command: &[&str]) -> Result<String> {
        let out = self
            .command()
            .args(["-n", namespace, "exec", pod, "--"])
            .args(command.iter().copied())
            .run()?;
        Ok(out.stdout)
    }

    fn watch(&self, resource: &ResourceRef) -> Result<Box<dyn ResourceWatch>> {
        // A field selector instead of a name so the watch also covers
        // objects that have not been created yet.
        let child = self
            .scoped(resource)
            .args(["get", resource.kind.as_str()])
            .arg(format!("--field-selector=metadata.name={}", resource.name))
            .args(["--watch", "--output-watch-events", "-o", "json"])
            .spawn_streaming()?;
        Ok(Box::new(KubectlWatch::start(child)))
    }
}

/// Watch stream fed by a reader thread parsing `kubectl --watch -o json`
/// output, which is a sequence of concatenated JSON documents.
pub struct KubectlWatch {
    rx: Receiver<WatchEvent>,
    child: Child,
}

impl KubectlWatch {
    fn start(mut child: Child) -> Self {
        let (tx, rx) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            std::thread::spawn(move || {
                let reader = BufReader::new(stdout);
                for doc in serde_json::Deserializer::from_reader(reader).into_iter::<Value>() {
                    let Ok(doc) = doc else { break };
                    let Some(event) = parse_watch_event(doc) else {
                        continue;
                    };
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            });
        }
        Self { rx, child }
    }
}

/// Map one `{"type": ..., "object": ...}` document to a [`WatchEvent`].
pub fn parse_watch_event(doc: Value) -> Option<WatchEvent> {
    let kind = doc.get("type")?.as_str()?.to_string();
    match kind.as_str() {
        "ADDED" | "MODIFIED" => doc.get("object").cloned().map(WatchEvent::Applied),
        "DELETED" => Some(WatchEvent::Deleted),
        _ => None,
    }
}

impl ResourceWatch for KubectlWatch {
    fn next_event(&mut self, timeout: Duration) -> Result<WatchNext> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(WatchNext::Event(event)),
            Err(RecvTimeoutError::Timeout) => Ok(WatchNext::TimedOut),
            Err(RecvTimeoutError::Disconnected) => Ok(WatchNext::Closed),
        }
    }
}

impl Drop for KubectlWatch {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_watch_event_types() {
        let added = json!({"type": "ADDED", "object": {"metadata": {"name": "argocd-server"}}});
        assert!(matches!(parse_watch_event(added), Some(WatchEvent::Applied(_))));
        let deleted = json!({"type": "DELETED", "object": {}});
        assert_eq!(parse_watch_event(deleted), Some(WatchEvent::Deleted));
        let bookmark = json!({"type": "BOOKMARK", "object": {}});
        assert_eq!(parse_watch_event(bookmark), None);
        assert_eq!(parse_watch_event(json!({"kind": "List"})), None);
    }

    #[test]
    fn resource_ref_display() {
        let r = ResourceRef::namespaced("deployment", "argocd", "argocd-server");
        assert_eq!(r.to_string(), "deployment/argocd-server in argocd");
        let c = ResourceRef::cluster("clusterrolebinding", "argocd-admin");
        assert_eq!(c.to_string(), "clusterrolebinding/argocd-admin");
    }

    #[test]
    fn not_found_detection() {
        let err = DevxError::ToolFailed {
            tool: "kubectl".into(),
            args: "get".into(),
            code: 1,
            stdout: String::new(),
            stderr: "Error from server (NotFound): pods \"x\" not found".into(),
        };
        assert!(is_not_found(&err));
    }
}
