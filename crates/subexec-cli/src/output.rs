// Outcome rendering

use std::io::{self, IsTerminal, Write};

use colored::Colorize;
use subexec::Outcome;

use crate::error::CliResult;

/// Bytes printed for an outcome
///
/// Values print as text followed by a newline, raw bytes exactly as
/// captured. Pairs print as a JSON object with `stdout`, `stderr` and
/// `exitCode`.
pub fn render(outcome: &Outcome) -> CliResult<Vec<u8>> {
    let mut rendered = match outcome {
        Outcome::Value(text) if text.is_empty() => return Ok(Vec::new()),
        Outcome::Value(text) => text.clone().into_bytes(),
        Outcome::Bytes(bytes) => return Ok(bytes.clone()),
        Outcome::Pair(output) => serde_json::to_vec_pretty(output)?,
        Outcome::RawPair(output) => serde_json::to_vec_pretty(output)?,
    };
    rendered.push(b'\n');
    Ok(rendered)
}

/// Print an outcome to stdout
pub fn print_outcome(outcome: &Outcome) -> CliResult<()> {
    let rendered = render(outcome)?;
    let mut stdout = io::stdout().lock();
    stdout.write_all(&rendered)?;
    stdout.flush()?;
    Ok(())
}

/// Print an error message to stderr
pub fn print_error(msg: &str) {
    if io::stderr().is_terminal() {
        eprintln!("{} {}", "error:".red().bold(), msg);
    } else {
        eprintln!("error: {}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use subexec::{ExecOutput, RawOutput};

    #[test]
    fn test_render_value() {
        let text = render(&Outcome::Value("STDOUT".into())).unwrap();
        assert_eq!(text, b"STDOUT\n");
        assert!(render(&Outcome::Value(String::new())).unwrap().is_empty());
    }

    #[test]
    fn test_render_pair() {
        let text = render(&Outcome::Pair(ExecOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: 2,
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&text).unwrap();
        assert_eq!(
            value,
            json!({ "stdout": "out", "stderr": "err", "exitCode": 2 })
        );
    }

    #[test]
    fn test_render_raw() {
        let bytes = vec![0xff, b'\n', 0x00];
        assert_eq!(render(&Outcome::Bytes(bytes.clone())).unwrap(), bytes);

        let text = render(&Outcome::RawPair(RawOutput {
            stdout: vec![0xff],
            stderr: vec![],
            exit_code: 0,
        }))
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&text).unwrap();
        assert_eq!(value, json!({ "stdout": [255], "stderr": [], "exitCode": 0 }));
    }
}
