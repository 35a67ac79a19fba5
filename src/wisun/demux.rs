//! # Line Demultiplexer
//!
//! Splits one received chunk into the dongle's tagged events. Line breaks and
//! runs of blanks are treated as token separators; each `OK`, `EVENT`,
//! `ERXUDP` or `EEDSCAN` token starts a new message, and the following tokens
//! are its payload. Text before the first tag is noise and dropped.

/// A message-starting token.
pub const MESSAGE_TAGS: [&str; 4] = ["OK", "EVENT", "ERXUDP", "EEDSCAN"];

/// The events found in one chunk, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Batch {
    pub count: usize,
    pub msgs: Vec<Vec<String>>,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// True for a batch made only of `OK` acknowledgements (or nothing).
    pub fn is_only_ok(&self) -> bool {
        self.msgs.iter().all(|m| m.len() == 1 && m[0] == "OK")
    }

    /// Whether the batch holds `EVENT <code>`.
    pub fn has_event(&self, code: &str) -> bool {
        self.msgs.iter().any(|m| is_event(m, code))
    }
}

/// Whether `msg` is `EVENT <code> ...`.
pub fn is_event(msg: &[String], code: &str) -> bool {
    msg.len() >= 2 && msg[0] == "EVENT" && msg[1] == code
}

/// Demultiplexes a chunk of dongle output.
pub fn demultiplex(chunk: &[u8]) -> Batch {
    let text = String::from_utf8_lossy(chunk);
    let mut batch = Batch::default();
    let mut current: Vec<String> = Vec::new();

    for token in text.split([' ', '\r', '\n']).filter(|t| !t.is_empty()) {
        if MESSAGE_TAGS.contains(&token) {
            if !current.is_empty() {
                batch.msgs.push(std::mem::take(&mut current));
            }
            batch.count += 1;
            current.push(token.to_string());
        } else if batch.count != 0 {
            current.push(token.to_string());
        }
    }

    if !current.is_empty() {
        batch.msgs.push(current);
    }

    batch
}
