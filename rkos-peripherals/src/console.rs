use std::io::{self, Write};

use rkos_core::devices::OutputSink;

use log::warn;

/// Output sink that renders straight to the host terminal
pub struct ConsoleSink {
    out: io::Stdout,
}

impl ConsoleSink {
    pub fn new() -> ConsoleSink {
        ConsoleSink { out: io::stdout() }
    }
}

impl OutputSink for ConsoleSink {
    fn put_text(&mut self, text: &str) {
        let mut handle = self.out.lock();
        if handle.write_all(text.as_bytes()).and_then(|_| handle.flush()).is_err() {
            warn!("console write failed");
        }
    }

    fn advance_line(&mut self) {
        self.put_text("\n");
    }
}
