use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

impl OutputMode {
    pub fn sink(self) -> Box<dyn ProgressSink> {
        match self {
            OutputMode::Interactive => Box::new(StderrProgress),
            OutputMode::NonInteractive => Box::new(JsonOutput),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_to(&mut stdout, value)
    }

    pub fn write_to<W: Write, T: Serialize>(writer: &mut W, value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Writes one progress line per event to stderr.
pub struct StderrProgress;

impl ProgressSink for StderrProgress {
    fn event(&self, event: ProgressEvent) {
        let line = match event.elapsed {
            Some(elapsed) => format!("{} ({:.1}s)", event.message, elapsed.as_secs_f64()),
            None => event.message,
        };
        let _ = writeln!(io::stderr().lock(), "{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_to_appends_newline() {
        let mut buffer = Vec::new();
        JsonOutput::write_to(&mut buffer, &serde_json::json!({"cleared": true})).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.ends_with("}\n"));
        assert!(text.contains("\"cleared\": true"));
    }
}
