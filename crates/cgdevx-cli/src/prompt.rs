use cgdevx_core::pipeline::Operator;
use std::io::{BufRead, Write};

/// Asks on stderr and reads the answer from stdin. Anything but `y`/`yes`
/// declines, including a closed stdin.
pub struct StdinOperator;

impl Operator for StdinOperator {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{prompt} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        match std::io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
