use crate::fs::Tsb;

/// Byte-addressed persistent key-value storage, keyed by disk address.
/// Key derivation from the (track, sector, block) triple is up to the
/// implementation but must be deterministic.
pub trait BlockStore {
    fn get(&self, tsb: Tsb) -> Option<Vec<u8>>;
    fn set(&mut self, tsb: Tsb, bytes: Vec<u8>);
}

/// User-visible text output. Kernel diagnostics go to the log facade,
/// never here.
pub trait OutputSink {
    fn put_text(&mut self, text: &str);
    fn advance_line(&mut self);
}

/// An output sink that accumulates lines in memory, for tests and for
/// hosts that render the console themselves.
pub struct CapturedSink {
    lines: Vec<String>,
}

impl CapturedSink {
    pub fn new() -> CapturedSink {
        CapturedSink {
            lines: vec![String::new()],
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Everything written so far, with line breaks flattened out
    pub fn text(&self) -> String {
        self.lines.join("")
    }
}

impl OutputSink for CapturedSink {
    fn put_text(&mut self, text: &str) {
        if let Some(line) = self.lines.last_mut() {
            line.push_str(text);
        }
    }

    fn advance_line(&mut self) {
        self.lines.push(String::new());
    }
}
