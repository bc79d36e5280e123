use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::env::{EnvGuard, EnvVars};
use crate::error::{DevxError, Result};
use crate::providers::process::{self, ToolCommand};

/// Terraform output values keyed by output name.
pub type TfOutputs = BTreeMap<String, serde_json::Value>;

/// Black-box Terraform operations against one module directory.
///
/// Implementations block until the underlying process exits and report a
/// failed run verbatim; nothing is retried here.
pub trait TerraformRunner {
    fn init(&self, dir: &Path) -> Result<()>;
    fn apply(&self, dir: &Path) -> Result<()>;
    fn destroy(&self, dir: &Path) -> Result<()>;
    fn output(&self, dir: &Path) -> Result<TfOutputs>;
}

/// `init` + `apply` + `output` with `env` active for the whole run.
///
/// The variables are removed again on every exit path.
pub fn apply_module(tf: &dyn TerraformRunner, dir: &Path, env: EnvVars) -> Result<TfOutputs> {
    let _env = EnvGuard::activate(env);
    tracing::info!(module = %dir.display(), "terraform apply");
    tf.init(dir)?;
    tf.apply(dir)?;
    tf.output(dir)
}

/// `init` + `destroy` with `env` active for the whole run.
pub fn destroy_module(tf: &dyn TerraformRunner, dir: &Path, env: EnvVars) -> Result<()> {
    let _env = EnvGuard::activate(env);
    tracing::info!(module = %dir.display(), "terraform destroy");
    tf.init(dir)?;
    tf.destroy(dir)
}

/// String value of output `name`.
pub fn output_str(outputs: &TfOutputs, name: &str) -> Result<String> {
    match outputs.get(name) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(DevxError::MissingValue(format!("terraform output '{name}'"))),
    }
}

// ---------------------------------------------------------------------------
// Terraform CLI
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
}

impl TerraformCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Locate `terraform` on `PATH`.
    pub fn detect() -> Result<Self> {
        Ok(Self::new(process::locate("terraform")?))
    }

    fn command(&self, dir: &Path) -> ToolCommand {
        ToolCommand::new(self.binary.to_string_lossy()).current_dir(dir)
    }
}

impl TerraformRunner for TerraformCli {
    fn init(&self, dir: &Path) -> Result<()> {
        self.command(dir)
            .args(["init", "-input=false", "-no-color", "-upgrade"])
            .run()?;
        Ok(())
    }

    fn apply(&self, dir: &Path) -> Result<()> {
        self.command(dir)
            .args(["apply", "-input=false", "-no-color", "-auto-approve"])
            .run()?;
        Ok(())
    }

    fn destroy(&self, dir: &Path) -> Result<()> {
        self.command(dir)
            .args(["destroy", "-input=false", "-no-color", "-auto-approve"])
            .run()?;
        Ok(())
    }

    fn output(&self, dir: &Path) -> Result<TfOutputs> {
        let out = self.command(dir).args(["output", "-json"]).run()?;
        parse_outputs(&out.stdout)
    }
}

/// Parse `terraform output -json`: `{"name": {"value": ..., "sensitive": ...}}`.
pub fn parse_outputs(json: &str) -> Result<TfOutputs> {
    if json.trim().is_empty() {
        return Ok(TfOutputs::new());
    }
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(json)?;
    Ok(raw
        .into_iter()
        .map(|(name, entry)| {
            let value = entry
                .get("value")
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            (name, value)
        })
        .collect())
}
