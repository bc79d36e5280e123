use cgdevx_core::pipeline::Reporter;
use serde::Serialize;

pub const REDACTED: &str = "********";

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{}", json);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    println!("{}", line(headers.to_vec()));
    println!(
        "{}",
        widths.iter().map(|&w| "-".repeat(w)).collect::<Vec<_>>().join("  ")
    );
    for row in rows {
        println!("{}", line(row.iter().map(String::as_str).collect()));
    }
}

/// Two-column `label: value` listing; absent values print as `-`.
pub fn print_fields(fields: &[(&str, Option<String>)]) {
    let width = fields.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (label, value) in fields {
        println!("{:width$}  {}", format!("{label}:"), value.as_deref().unwrap_or("-"), width = width + 1);
    }
}

/// Whether a state key holds a credential that must never be printed.
pub fn is_secret(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["token", "secret", "password", "unseal", "private", "account_key"]
        .iter()
        .any(|marker| key.contains(marker))
}

// ---------------------------------------------------------------------------
// Console reporter
// ---------------------------------------------------------------------------

/// Stage progress on stdout. Silent in `--json` mode so stdout stays parseable.
pub struct ConsoleReporter {
    pub quiet: bool,
}

impl Reporter for ConsoleReporter {
    fn stage_started(&self, name: &str, description: &str) {
        if !self.quiet {
            println!("==> [{name}] {description}");
        }
    }

    fn stage_skipped(&self, name: &str, reason: &str) {
        if !self.quiet {
            println!("--- [{name}] skipped: {reason}");
        }
    }

    fn stage_finished(&self, name: &str) {
        if !self.quiet {
            println!("    [{name}] done");
        }
    }

    fn info(&self, message: &str) {
        if !self.quiet {
            println!("    {message}");
        }
    }
}
