use crate::output::{print_json, ConsoleReporter};
use crate::prompt::StdinOperator;
use crate::wiring::Collaborators;
use anyhow::Context;
use cgdevx_core::destroy::{self, DestroyContext};
use cgdevx_core::pipeline::{FixedAnswer, Operator};
use cgdevx_core::state::StateStore;
use std::path::Path;

pub fn run(home: &Path, yes: bool, json: bool) -> anyhow::Result<()> {
    let mut store = StateStore::open_existing(home).context("nothing to destroy")?;
    let collaborators = Collaborators::from_store(home, &store)?;
    let platform = collaborators.platform();
    let reporter = ConsoleReporter { quiet: json };
    let operator: &dyn Operator = if yes { &FixedAnswer(true) } else { &StdinOperator };

    let mut ctx = DestroyContext {
        store: &mut store,
        home,
        platform: &platform,
        reporter: &reporter,
    };
    destroy::run_destroy(&mut ctx, operator)?;

    if json {
        print_json(&serde_json::json!({ "destroyed": true, "state_dir": home }))?;
    } else {
        println!("Platform destroyed; local state removed from {}", home.display());
    }
    Ok(())
}
