//! Blocking waits for external resources to converge.
//!
//! Three flavours:
//! - HTTP endpoint reachable ([`wait_for_http`]), retried with [`Backoff`].
//! - DNS TXT record propagated ([`wait_for_txt`]), polled on a fixed
//!   interval and reported as a boolean.
//! - Kubernetes object reaching a [`Condition`] ([`wait_for_condition`]),
//!   driven by a change stream with an overall timeout.
//!
//! Every wait blocks the calling stage until it resolves.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::error::{DevxError, Result};
use crate::providers::cluster::{ClusterClient, ResourceRef, ResourceWatch, WatchEvent, WatchNext};
use crate::providers::dns::TxtResolver;
use crate::retry::{Backoff, Sleeper, ThreadSleeper};

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// GET `url` until it answers with a non-error status (< 400).
///
/// Connection failures and error statuses are retried per `backoff`.
pub fn wait_for_http(url: &str, backoff: &Backoff, sleeper: &dyn Sleeper) -> Result<u16> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    backoff.run(&format!("GET {url}"), sleeper, || {
        let resp = client.get(url).send().map_err(|e| e.to_string())?;
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            Err(format!("status {status}"))
        } else {
            Ok(status.as_u16())
        }
    })
}

/// Endpoint readiness as seen by pipeline stages.
pub trait HttpProbe {
    /// Block until `url` answers with a non-error status or `backoff` is spent.
    fn wait_ready(&self, url: &str, backoff: &Backoff) -> Result<u16>;
}

/// [`HttpProbe`] that really polls, sleeping on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpReadiness;

impl HttpProbe for HttpReadiness {
    fn wait_ready(&self, url: &str, backoff: &Backoff) -> Result<u16> {
        wait_for_http(url, backoff, &ThreadSleeper)
    }
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsPoll {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for DnsPoll {
    /// 100 x 10s, roughly 16 minutes worst case.
    fn default() -> Self {
        Self {
            attempts: 100,
            interval: Duration::from_secs(10),
        }
    }
}

/// Poll `resolver` until the TXT record `name` contains `expected`.
///
/// Returns `false` once the attempts are used up; resolution errors count
/// as failed attempts.
pub fn wait_for_txt(
    resolver: &dyn TxtResolver,
    name: &str,
    nameserver: Option<&str>,
    expected: &str,
    poll: DnsPoll,
    sleeper: &dyn Sleeper,
) -> bool {
    for attempt in 1..=poll.attempts {
        match resolver.resolve_txt(name, nameserver) {
            Ok(records) => {
                if records.iter().any(|r| r.trim_matches('"') == expected) {
                    tracing::info!(record = name, attempt, "TXT record propagated");
                    return true;
                }
                tracing::debug!(record = name, attempt, ?records, "TXT record not propagated yet");
            }
            Err(e) => {
                tracing::debug!(record = name, attempt, error = %e, "TXT lookup failed");
            }
        }
        if attempt < poll.attempts {
            sleeper.sleep(poll.interval);
        }
    }
    tracing::warn!(record = name, attempts = poll.attempts, "TXT record did not propagate");
    false
}

// ---------------------------------------------------------------------------
// Resource conditions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `status.readyReplicas` reached `n`, or `spec.replicas` when `None`.
    ReplicasReady(Option<i64>),
    /// Job reports a `Complete` condition; a `Failed` condition aborts the wait.
    JobSucceeded,
    /// Ingress load balancer has an IP or hostname.
    IngressHasAddress,
    /// cert-manager Certificate reports `Ready=True`.
    CertificateReady,
    /// Pod phase is `Running`.
    PodRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evaluation {
    Satisfied,
    Pending,
    Failed(String),
}

fn status_condition<'a>(obj: &'a Value, kind: &str) -> Option<&'a Value> {
    obj.pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(kind))
}

fn condition_true(obj: &Value, kind: &str) -> bool {
    status_condition(obj, kind)
        .and_then(|c| c.get("status"))
        .and_then(Value::as_str)
        == Some("True")
}

impl Condition {
    pub fn evaluate(&self, obj: &Value) -> Evaluation {
        let satisfied = match self {
            Condition::ReplicasReady(target) => {
                let want = target
                    .or_else(|| obj.pointer("/spec/replicas").and_then(Value::as_i64))
                    .unwrap_or(1);
                let ready = obj
                    .pointer("/status/readyReplicas")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                ready >= want
            }
            Condition::JobSucceeded => {
                if condition_true(obj, "Failed") {
                    let reason = status_condition(obj, "Failed")
                        .and_then(|c| c.get("message"))
                        .and_then(Value::as_str)
                        .unwrap_or("job failed")
                        .to_string();
                    return Evaluation::Failed(reason);
                }
                condition_true(obj, "Complete")
            }
            Condition::IngressHasAddress => obj
                .pointer("/status/loadBalancer/ingress")
                .and_then(Value::as_array)
                .is_some_and(|entries| {
                    entries
                        .iter()
                        .any(|e| e.get("ip").is_some() || e.get("hostname").is_some())
                }),
            Condition::CertificateReady => condition_true(obj, "Ready"),
            Condition::PodRunning => {
                obj.pointer("/status/phase").and_then(Value::as_str) == Some("Running")
            }
        };
        if satisfied {
            Evaluation::Satisfied
        } else {
            Evaluation::Pending
        }
    }
}

/// Consume `watch` until `resource` satisfies `condition`.
///
/// Returns the satisfying object as soon as it is observed. Fails when the
/// object is deleted, when the condition reports failure, when the stream
/// closes, or when `timeout` elapses.
pub fn wait_for_condition(
    watch: &mut dyn ResourceWatch,
    resource: &ResourceRef,
    condition: &Condition,
    timeout: Duration,
) -> Result<Value> {
    let deadline = Instant::now() + timeout;
    tracing::info!(%resource, ?condition, timeout_s = timeout.as_secs(), "waiting for resource");
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(not_ready(resource, format!("timed out after {timeout:?}")));
        }
        match watch.next_event(remaining)? {
            WatchNext::Event(WatchEvent::Applied(obj)) => match condition.evaluate(&obj) {
                Evaluation::Satisfied => {
                    tracing::info!(%resource, "resource ready");
                    return Ok(obj);
                }
                Evaluation::Pending => continue,
                Evaluation::Failed(reason) => return Err(not_ready(resource, reason)),
            },
            WatchNext::Event(WatchEvent::Deleted) => {
                return Err(DevxError::ResourceDeleted(resource.to_string()));
            }
            WatchNext::TimedOut => {
                return Err(not_ready(resource, format!("timed out after {timeout:?}")));
            }
            WatchNext::Closed => {
                return Err(not_ready(resource, "watch stream closed".to_string()));
            }
        }
    }
}

/// Wait for `resource` to satisfy `condition`.
///
/// The current object is checked first; a watch is only opened when it is
/// missing or still pending.
pub fn wait_for_resource(
    cluster: &dyn ClusterClient,
    resource: &ResourceRef,
    condition: &Condition,
    timeout: Duration,
) -> Result<Value> {
    if let Some(obj) = cluster.get(resource)? {
        match condition.evaluate(&obj) {
            Evaluation::Satisfied => {
                tracing::debug!(%resource, "resource already ready");
                return Ok(obj);
            }
            Evaluation::Failed(reason) => return Err(not_ready(resource, reason)),
            Evaluation::Pending => {}
        }
    }
    let mut watch = cluster.watch(resource)?;
    wait_for_condition(watch.as_mut(), resource, condition, timeout)
}

fn not_ready(resource: &ResourceRef, reason: String) -> DevxError {
    DevxError::NotReady {
        resource: resource.to_string(),
        reason,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RecordingSleeper;
    use crate::testing::{ready_object, FakeCluster};
    use serde_json::json;
    use std::cell::Cell;
    use std::collections::VecDeque;

    /// Replays scripted events; records how long callers were willing to wait.
    struct ScriptedWatch {
        events: VecDeque<WatchNext>,
        consumed: usize,
    }

    impl ScriptedWatch {
        fn new(events: Vec<WatchNext>) -> Self {
            Self {
                events: events.into(),
                consumed: 0,
            }
        }
    }

    impl ResourceWatch for ScriptedWatch {
        fn next_event(&mut self, _timeout: Duration) -> Result<WatchNext> {
            self.consumed += 1;
            Ok(self.events.pop_front().unwrap_or(WatchNext::Closed))
        }
    }

    fn deployment(ready: i64) -> WatchNext {
        WatchNext::Event(WatchEvent::Applied(json!({
            "spec": {"replicas": 2},
            "status": {"readyReplicas": ready}
        })))
    }

    fn argocd() -> ResourceRef {
        ResourceRef::namespaced("deployment", "argocd", "argocd-server")
    }

    #[test]
    fn returns_on_third_event_without_waiting_out_timeout() {
        let mut watch = ScriptedWatch::new(vec![deployment(0), deployment(1), deployment(2), deployment(2)]);
        let started = Instant::now();
        let obj = wait_for_condition(
            &mut watch,
            &argocd(),
            &Condition::ReplicasReady(None),
            Duration::from_secs(600),
        )
        .unwrap();
        assert_eq!(obj.pointer("/status/readyReplicas"), Some(&json!(2)));
        assert_eq!(watch.consumed, 3);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn ready_object_skips_the_watch() {
        let cluster = FakeCluster::default();
        cluster.ready_on_get.set(true);
        let obj = wait_for_resource(
            &cluster,
            &argocd(),
            &Condition::ReplicasReady(None),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(obj, ready_object());
        assert!(cluster.watched().is_empty());
    }

    #[test]
    fn missing_object_is_watched() {
        let cluster = FakeCluster::default();
        wait_for_resource(
            &cluster,
            &argocd(),
            &Condition::ReplicasReady(None),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(cluster.watched(), [argocd().to_string()]);
    }

    #[test]
    fn deletion_fails_descriptively() {
        let mut watch = ScriptedWatch::new(vec![deployment(0), WatchNext::Event(WatchEvent::Deleted)]);
        let err = wait_for_condition(
            &mut watch,
            &argocd(),
            &Condition::ReplicasReady(None),
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(matches!(err, DevxError::ResourceDeleted(_)));
        assert!(err.to_string().contains("argocd-server"));
    }

    #[test]
    fn timeout_fails() {
        let mut watch = ScriptedWatch::new(vec![deployment(0), WatchNext::TimedOut]);
        let err = wait_for_condition(
            &mut watch,
            &argocd(),
            &Condition::ReplicasReady(Some(1)),
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(matches!(err, DevxError::NotReady { .. }));
    }

    #[test]
    fn closed_stream_fails() {
        let mut watch = ScriptedWatch::new(vec![]);
        let err = wait_for_condition(
            &mut watch,
            &argocd(),
            &Condition::PodRunning,
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(err.to_string().contains("watch stream closed"));
    }

    #[test]
    fn failed_job_aborts_wait() {
        let job = WatchNext::Event(WatchEvent::Applied(json!({
            "status": {"conditions": [
                {"type": "Failed", "status": "True", "message": "BackoffLimitExceeded"}
            ]}
        })));
        let mut watch = ScriptedWatch::new(vec![job]);
        let err = wait_for_condition(
            &mut watch,
            &ResourceRef::namespaced("job", "vault", "vault-init"),
            &Condition::JobSucceeded,
            Duration::from_secs(60),
        )
        .unwrap_err();
        assert!(err.to_string().contains("BackoffLimitExceeded"));
    }

    #[test]
    fn condition_evaluation() {
        let ingress = json!({"status": {"loadBalancer": {"ingress": [{"hostname": "lb.example"}]}}});
        assert_eq!(Condition::IngressHasAddress.evaluate(&ingress), Evaluation::Satisfied);
        assert_eq!(Condition::IngressHasAddress.evaluate(&json!({})), Evaluation::Pending);

        let cert = json!({"status": {"conditions": [{"type": "Ready", "status": "True"}]}});
        assert_eq!(Condition::CertificateReady.evaluate(&cert), Evaluation::Satisfied);

        let job = json!({"status": {"conditions": [{"type": "Complete", "status": "True"}]}});
        assert_eq!(Condition::JobSucceeded.evaluate(&job), Evaluation::Satisfied);

        let pod = json!({"status": {"phase": "Pending"}});
        assert_eq!(Condition::PodRunning.evaluate(&pod), Evaluation::Pending);
    }

    struct FlakyResolver {
        calls: Cell<u32>,
        ready_after: u32,
    }

    impl TxtResolver for FlakyResolver {
        fn resolve_txt(&self, _name: &str, _nameserver: Option<&str>) -> Result<Vec<String>> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() >= self.ready_after {
                Ok(vec!["\"cgdevx-verify=abc\"".to_string()])
            } else {
                Ok(vec![])
            }
        }
    }

    #[test]
    fn txt_wait_succeeds_on_fixed_interval() {
        let resolver = FlakyResolver {
            calls: Cell::new(0),
            ready_after: 4,
        };
        let sleeper = RecordingSleeper::new();
        let poll = DnsPoll {
            attempts: 10,
            interval: Duration::from_secs(10),
        };
        assert!(wait_for_txt(&resolver, "_cgdevx.example.com", Some("8.8.8.8"), "cgdevx-verify=abc", poll, &sleeper));
        assert_eq!(resolver.calls.get(), 4);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(10); 3]);
    }

    #[test]
    fn txt_wait_reports_false_when_exhausted() {
        let resolver = FlakyResolver {
            calls: Cell::new(0),
            ready_after: u32::MAX,
        };
        let sleeper = RecordingSleeper::new();
        let poll = DnsPoll {
            attempts: 5,
            interval: Duration::from_secs(10),
        };
        assert!(!wait_for_txt(&resolver, "_cgdevx.example.com", None, "cgdevx-verify=abc", poll, &sleeper));
        assert_eq!(resolver.calls.get(), 5);
    }

    #[test]
    fn http_wait_gives_up_on_error_status() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/healthz")
            .with_status(503)
            .expect(2)
            .create();
        let sleeper = RecordingSleeper::new();
        let url = format!("{}/healthz", server.url());

        let err = wait_for_http(&url, &Backoff::new(2, Duration::from_millis(1)), &sleeper).unwrap_err();

        assert!(matches!(err, DevxError::MaxRetriesExceeded { attempts: 2, .. }));
        assert!(err.to_string().contains("503"));
        mock.assert();
    }

    #[test]
    fn http_wait_returns_first_success() {
        let mut server = mockito::Server::new();
        let mock = server.mock("GET", "/").with_status(200).create();
        let sleeper = RecordingSleeper::new();

        let status = wait_for_http(&server.url(), &Backoff::new(3, Duration::from_millis(1)), &sleeper).unwrap();

        assert_eq!(status, 200);
        assert!(sleeper.delays().is_empty());
        mock.assert();
    }
}
