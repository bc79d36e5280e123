//! DNS registrar access and TXT resolution.

use serde_json::Value;

use crate::error::{DevxError, Result};
use crate::providers::process::ToolCommand;
use crate::readiness::{self, DnsPoll};
use crate::retry::{Backoff, Sleeper};
use crate::types::DnsRegistrarKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainZone {
    pub id: String,
    pub name: String,
    pub name_servers: Vec<String>,
    /// Azure keeps zones inside a resource group.
    pub resource_group: Option<String>,
}

/// Registrar operations the pipeline needs.
pub trait DnsManager {
    fn registrar(&self) -> DnsRegistrarKind;
    fn evaluate_permissions(&self) -> Result<bool>;
    fn get_domain_zone(&self, domain: &str) -> Result<DomainZone>;
    fn upsert_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()>;
    fn delete_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()>;
}

/// TXT lookups against a specific nameserver.
pub trait TxtResolver {
    fn resolve_txt(&self, name: &str, nameserver: Option<&str>) -> Result<Vec<String>>;
}

/// Prove control of `zone` by publishing a TXT record and watching it
/// appear on the zone's authoritative nameserver.
///
/// Registrar calls are retried per `backoff`. The verification record is
/// removed afterwards; failing to remove it is logged and otherwise ignored.
pub fn evaluate_domain_ownership(
    dns: &dyn DnsManager,
    resolver: &dyn TxtResolver,
    zone: &DomainZone,
    poll: DnsPoll,
    backoff: &Backoff,
    sleeper: &dyn Sleeper,
) -> Result<bool> {
    let record = format!("_cgdevx-verify.{}", zone.name);
    let token = format!("cgdevx-{}", uuid::Uuid::new_v4().simple());
    backoff.run("dns.upsert_txt", sleeper, || dns.upsert_txt(zone, &record, &token))?;

    let nameserver = zone
        .name_servers
        .first()
        .map(|ns| ns.trim_end_matches('.').to_string());
    let owned = readiness::wait_for_txt(resolver, &record, nameserver.as_deref(), &token, poll, sleeper);

    if let Err(e) = backoff.run("dns.delete_txt", sleeper, || dns.delete_txt(zone, &record, &token)) {
        tracing::warn!(record, error = %e, "failed to remove verification record");
    }
    Ok(owned)
}

// ---------------------------------------------------------------------------
// dig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct DigResolver;

impl TxtResolver for DigResolver {
    fn resolve_txt(&self, name: &str, nameserver: Option<&str>) -> Result<Vec<String>> {
        let mut cmd = ToolCommand::new("dig").args(["+short", "TXT", name]);
        if let Some(ns) = nameserver {
            cmd = cmd.arg(format!("@{ns}"));
        }
        let out = cmd.run()?;
        Ok(out
            .stdout
            .lines()
            .map(|l| l.trim().trim_matches('"').to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Route53 (aws CLI)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct Route53;

fn aws_json(args: &[&str]) -> Result<Value> {
    let out = ToolCommand::new("aws")
        .args(args.iter().copied())
        .args(["--output", "json"])
        .run()?;
    Ok(serde_json::from_str(&out.stdout)?)
}

fn txt_change(action: &str, name: &str, value: &str) -> String {
    serde_json::json!({
        "Changes": [{
            "Action": action,
            "ResourceRecordSet": {
                "Name": name,
                "Type": "TXT",
                "TTL": 60,
                "ResourceRecords": [{"Value": format!("\"{value}\"")}]
            }
        }]
    })
    .to_string()
}

impl DnsManager for Route53 {
    fn registrar(&self) -> DnsRegistrarKind {
        DnsRegistrarKind::Route53
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        Ok(aws_json(&["route53", "list-hosted-zones", "--max-items", "1"]).is_ok())
    }

    fn get_domain_zone(&self, domain: &str) -> Result<DomainZone> {
        let zones = aws_json(&["route53", "list-hosted-zones-by-name", "--dns-name", domain])?;
        let wanted = format!("{domain}.");
        let zone = zones
            .get("HostedZones")
            .and_then(Value::as_array)
            .and_then(|zs| {
                zs.iter()
                    .find(|z| z.get("Name").and_then(Value::as_str) == Some(wanted.as_str()))
            })
            .ok_or_else(|| DevxError::Preflight(format!("no Route53 hosted zone for {domain}")))?;
        let id = zone
            .get("Id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_start_matches("/hostedzone/")
            .to_string();
        let detail = aws_json(&["route53", "get-hosted-zone", "--id", &id])?;
        let name_servers = detail
            .pointer("/DelegationSet/NameServers")
            .and_then(Value::as_array)
            .map(|ns| ns.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        Ok(DomainZone {
            id,
            name: domain.to_string(),
            name_servers,
            resource_group: None,
        })
    }

    fn upsert_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()> {
        aws_json(&[
            "route53",
            "change-resource-record-sets",
            "--hosted-zone-id",
            &zone.id,
            "--change-batch",
            &txt_change("UPSERT", name, value),
        ])?;
        Ok(())
    }

    fn delete_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()> {
        aws_json(&[
            "route53",
            "change-resource-record-sets",
            "--hosted-zone-id",
            &zone.id,
            "--change-batch",
            &txt_change("DELETE", name, value),
        ])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Azure DNS (az CLI)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct AzureDns;

fn az_json(args: &[&str]) -> Result<Value> {
    let out = ToolCommand::new("az")
        .args(args.iter().copied())
        .args(["--output", "json"])
        .run()?;
    Ok(serde_json::from_str(&out.stdout)?)
}

fn relative_name(name: &str, zone: &str) -> String {
    name.strip_suffix(&format!(".{zone}"))
        .unwrap_or(name)
        .to_string()
}

impl DnsManager for AzureDns {
    fn registrar(&self) -> DnsRegistrarKind {
        DnsRegistrarKind::AzureDns
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        Ok(az_json(&["network", "dns", "zone", "list"]).is_ok())
    }

    fn get_domain_zone(&self, domain: &str) -> Result<DomainZone> {
        let zones = az_json(&["network", "dns", "zone", "list"])?;
        let zone = zones
            .as_array()
            .and_then(|zs| {
                zs.iter()
                    .find(|z| z.get("name").and_then(Value::as_str) == Some(domain))
            })
            .ok_or_else(|| DevxError::Preflight(format!("no Azure DNS zone for {domain}")))?;
        let field = |k: &str| zone.get(k).and_then(Value::as_str).map(str::to_string);
        Ok(DomainZone {
            id: field("id").unwrap_or_default(),
            name: domain.to_string(),
            name_servers: zone
                .get("nameServers")
                .and_then(Value::as_array)
                .map(|ns| ns.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            resource_group: field("resourceGroup"),
        })
    }

    fn upsert_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()> {
        let group = zone.resource_group.as_deref().unwrap_or_default();
        let rel = relative_name(name, &zone.name);
        az_json(&[
            "network", "dns", "record-set", "txt", "add-record", "-g", group, "-z", &zone.name,
            "-n", &rel, "-v", value,
        ])?;
        Ok(())
    }

    fn delete_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()> {
        let group = zone.resource_group.as_deref().unwrap_or_default();
        let rel = relative_name(name, &zone.name);
        az_json(&[
            "network", "dns", "record-set", "txt", "remove-record", "-g", group, "-z", &zone.name,
            "-n", &rel, "-v", value,
        ])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Google Cloud DNS (gcloud CLI)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CloudDns {
    pub project: String,
}

impl CloudDns {
    fn gcloud_json(&self, args: &[&str]) -> Result<Value> {
        let out = ToolCommand::new("gcloud")
            .args(args.iter().copied())
            .args(["--project", self.project.as_str(), "--format", "json"])
            .run()?;
        if out.stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&out.stdout)?)
    }
}

impl DnsManager for CloudDns {
    fn registrar(&self) -> DnsRegistrarKind {
        DnsRegistrarKind::CloudDns
    }

    fn evaluate_permissions(&self) -> Result<bool> {
        Ok(self.gcloud_json(&["dns", "managed-zones", "list"]).is_ok())
    }

    fn get_domain_zone(&self, domain: &str) -> Result<DomainZone> {
        let filter = format!("--filter=dnsName={domain}.");
        let zones = self.gcloud_json(&["dns", "managed-zones", "list", &filter])?;
        let zone = zones
            .as_array()
            .and_then(|zs| zs.first())
            .ok_or_else(|| DevxError::Preflight(format!("no Cloud DNS zone for {domain}")))?;
        Ok(DomainZone {
            id: zone
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: domain.to_string(),
            name_servers: zone
                .get("nameServers")
                .and_then(Value::as_array)
                .map(|ns| ns.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default(),
            resource_group: None,
        })
    }

    fn upsert_txt(&self, zone: &DomainZone, name: &str, value: &str) -> Result<()> {
        let fqdn = format!("{name}.");
        let rrdata = format!("--rrdatas=\"{value}\"");
        self.gcloud_json(&[
            "dns", "record-sets", "create", &fqdn, "--zone", &zone.id, "--type", "TXT", "--ttl",
            "60", &rrdata,
        ])?;
        Ok(())
    }

    fn delete_txt(&self, zone: &DomainZone, name: &str, _value: &str) -> Result<()> {
        let fqdn = format!("{name}.");
        self.gcloud_json(&[
            "dns", "record-sets", "delete", &fqdn, "--zone", &zone.id, "--type", "TXT",
        ])?;
        Ok(())
    }
}

/// Construct the registrar for `kind`. Cloud DNS needs the GCP project.
pub fn for_kind(kind: DnsRegistrarKind, project: Option<&str>) -> Result<Box<dyn DnsManager>> {
    Ok(match kind {
        DnsRegistrarKind::Route53 => Box::new(Route53),
        DnsRegistrarKind::AzureDns => Box::new(AzureDns),
        DnsRegistrarKind::CloudDns => Box::new(CloudDns {
            project: project
                .filter(|p| !p.is_empty())
                .ok_or_else(|| DevxError::InvalidConfig("cloud_project is required for google_cloud_dns".into()))?
                .to_string(),
        }),
    })
}
