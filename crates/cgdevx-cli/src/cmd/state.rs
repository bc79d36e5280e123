use crate::output::{is_secret, print_json, print_table, REDACTED};
use anyhow::Context;
use cgdevx_core::paths;
use cgdevx_core::state::StateStore;
use clap::Subcommand;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Subcommand)]
pub enum StateSubcommand {
    /// Show checkpoints and recorded values (secrets redacted)
    Show,
}

pub fn run(home: &Path, subcmd: StateSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        StateSubcommand::Show => show(home, json),
    }
}

#[derive(Serialize)]
struct StateOutput<'a> {
    installed: bool,
    path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<String>,
    checkpoints: &'a [String],
    input: BTreeMap<&'a str, String>,
    params: BTreeMap<&'a str, &'a str>,
    /// Keys only; values are runtime secrets.
    internal: Vec<&'a str>,
}

fn scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn show(home: &Path, json: bool) -> anyhow::Result<()> {
    let path = paths::state_path(home);
    if !path.exists() {
        if json {
            print_json(&serde_json::json!({ "installed": false, "path": path }))?;
        } else {
            println!("No installation found at {}", path.display());
        }
        return Ok(());
    }

    let store = StateStore::load(&path).context("failed to load state")?;
    let input = store
        .input_params()
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let shown = if is_secret(k) { REDACTED.to_string() } else { scalar(v) };
            (k.as_str(), shown)
        })
        .collect();
    let params = store
        .parameters()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let out = StateOutput {
        installed: true,
        path: &path,
        updated_at: Some(store.updated_at.to_rfc3339()),
        checkpoints: store.checkpoints(),
        input,
        params,
        internal: store.internals().keys().map(String::as_str).collect(),
    };

    if json {
        return print_json(&out);
    }

    println!("State file: {}", path.display());
    if let Some(ts) = &out.updated_at {
        println!("Updated:    {ts}");
    }
    println!();

    let checkpoint_rows: Vec<Vec<String>> = out
        .checkpoints
        .iter()
        .enumerate()
        .map(|(i, c)| vec![(i + 1).to_string(), c.clone()])
        .collect();
    if checkpoint_rows.is_empty() {
        println!("No stages completed.");
    } else {
        print_table(&["#", "CHECKPOINT"], &checkpoint_rows);
    }
    println!();

    let value_rows: Vec<Vec<String>> = out
        .input
        .iter()
        .map(|(k, v)| vec!["input".to_string(), k.to_string(), v.clone()])
        .chain(
            out.params
                .iter()
                .map(|(k, v)| vec!["param".to_string(), k.to_string(), v.to_string()]),
        )
        .chain(
            out.internal
                .iter()
                .map(|k| vec!["internal".to_string(), k.to_string(), REDACTED.to_string()]),
        )
        .collect();
    print_table(&["SECTION", "KEY", "VALUE"], &value_rows);
    Ok(())
}
