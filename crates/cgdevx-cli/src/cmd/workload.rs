use crate::output::{print_json, ConsoleReporter};
use crate::prompt::StdinOperator;
use crate::wiring::Collaborators;
use anyhow::Context;
use cgdevx_core::pipeline::{FixedAnswer, Operator};
use cgdevx_core::state::StateStore;
use cgdevx_core::workload::{self, WorkloadContext, WorkloadSpec};
use clap::Subcommand;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum WorkloadSubcommand {
    /// Seed the workload's source and GitOps repositories from templates
    Bootstrap {
        /// Workload name (lowercase, hyphens)
        #[arg(long)]
        name: String,
        /// Source repository template
        #[arg(long, default_value = workload::WL_TEMPLATE_URL)]
        template_url: String,
        /// GitOps repository template
        #[arg(long, default_value = workload::WL_GITOPS_TEMPLATE_URL)]
        gitops_template_url: String,
        /// Branch of both templates
        #[arg(long, default_value = workload::WL_TEMPLATE_BRANCH)]
        template_branch: String,
    },

    /// Register a workload in the platform GitOps repository
    Create {
        #[arg(long)]
        name: String,
    },

    /// Remove a workload's registration
    Delete {
        #[arg(long)]
        name: String,
        /// Run terraform destroy on the workload's infrastructure first
        #[arg(long)]
        destroy_resources: bool,
        /// Skip the confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(home: &Path, subcmd: WorkloadSubcommand, json: bool) -> anyhow::Result<()> {
    let store = StateStore::open_existing(home).context("workloads need a platform installation")?;
    let collaborators = Collaborators::from_store(home, &store)?;
    let platform = collaborators.platform();
    let reporter = ConsoleReporter { quiet: json };
    let ctx = WorkloadContext {
        store: &store,
        home,
        platform: &platform,
        reporter: &reporter,
    };

    match subcmd {
        WorkloadSubcommand::Bootstrap {
            name,
            template_url,
            gitops_template_url,
            template_branch,
        } => {
            let spec = WorkloadSpec {
                template_url,
                gitops_template_url,
                gitops_template_branch: template_branch.clone(),
                template_branch,
                ..WorkloadSpec::new(name)
            };
            let pushed = workload::bootstrap(&ctx, &spec)
                .with_context(|| format!("failed to bootstrap workload '{}'", spec.name))?;
            if json {
                print_json(&serde_json::json!({ "workload": spec.name, "repositories": pushed }))?;
            } else {
                println!("Bootstrapped '{}':", spec.name);
                for url in pushed {
                    println!("  {url}");
                }
            }
        }
        WorkloadSubcommand::Create { name } => {
            let spec = WorkloadSpec::new(name);
            let url = workload::create(&ctx, &spec)
                .with_context(|| format!("failed to create workload '{}'", spec.name))?;
            report(&spec, "create", &url, json)?;
        }
        WorkloadSubcommand::Delete {
            name,
            destroy_resources,
            yes,
        } => {
            let spec = WorkloadSpec::new(name);
            let operator: &dyn Operator = if yes { &FixedAnswer(true) } else { &StdinOperator };
            let url = workload::delete(&ctx, &spec, destroy_resources, operator)
                .with_context(|| format!("failed to delete workload '{}'", spec.name))?;
            report(&spec, "delete", &url, json)?;
        }
    }
    Ok(())
}

fn report(spec: &WorkloadSpec, action: &str, url: &str, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(&serde_json::json!({
            "workload": spec.name,
            "action": action,
            "review_url": url,
        }))
    } else {
        println!("Review the change at {url}");
        Ok(())
    }
}
