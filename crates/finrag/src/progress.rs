//! Progress reporting for `finrag ingest` and `finrag embed pending`.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::str::FromStr;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Walking the documents root; total unknown.
    Scanning { root: String },
    /// `n` of `total` files indexed; `current` is the file just finished.
    Indexing { n: u64, total: u64, current: String },
    /// `n` of `total` chunks embedded.
    Embedding { n: u64, total: u64 },
}

impl ProgressEvent {
    fn phase(&self) -> &'static str {
        match self {
            ProgressEvent::Scanning { .. } => "scanning",
            ProgressEvent::Indexing { .. } => "indexing",
            ProgressEvent::Embedding { .. } => "embedding",
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// `ingest  indexing  12 / 1,204 files  (reports/q1.pdf)`
pub struct HumanProgress;

impl ProgressReporter for HumanProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning { root } => format!("ingest  scanning {root}..."),
            ProgressEvent::Indexing { n, total, current } => format!(
                "ingest  indexing  {} / {} files  ({current})",
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Embedding { n, total } => format!(
                "embed  {} / {} chunks",
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
        let _ = stderr.flush();
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let mut obj = serde_json::json!({ "event": "progress", "phase": event.phase() });
        match &event {
            ProgressEvent::Scanning { root } => obj["root"] = root.as_str().into(),
            ProgressEvent::Indexing { n, total, current } => {
                obj["n"] = (*n).into();
                obj["total"] = (*total).into();
                obj["current"] = current.as_str().into();
            }
            ProgressEvent::Embedding { n, total } => {
                obj["n"] = (*n).into();
                obj["total"] = (*total).into();
            }
        }
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{obj}");
        let _ = stderr.flush();
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(HumanProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl FromStr for ProgressMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "off" | "none" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            "auto" => Ok(ProgressMode::default_for_tty()),
            other => anyhow::bail!("Unknown progress mode: {other}. Use auto, human, json, or off."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separators() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn modes_parse() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert_eq!("none".parse::<ProgressMode>().unwrap(), ProgressMode::Off);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
