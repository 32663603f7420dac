//! Fenced block extraction.

use chrono::Utc;
use std::collections::HashSet;

use super::{BlockKind, ExtractedBlock};

const FENCE: &str = "```";

/// Hands out block ids. One allocator lives for the whole session so that
/// two replies prepared within the same millisecond still get distinct ids.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: u64,
}

impl IdAllocator {
    pub fn allocate(&mut self, kind: BlockKind) -> String {
        let sequence = self.next;
        self.next += 1;
        format!("{}-{}-{}", kind.marker(), Utc::now().timestamp_millis(), sequence)
    }
}

/// Reply text with blocks replaced by placeholder tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    pub blocks: Vec<ExtractedBlock>,
}

pub fn extract(raw: &str, ids: &mut IdAllocator) -> Extraction {
    let (open, close) = token_delimiters(raw);
    let mut text = String::with_capacity(raw.len());
    let mut blocks = Vec::new();
    let mut counts = [0usize; 2];
    let mut cursor = 0;

    while let Some((start, kind, body_start)) = next_opening(raw, cursor) {
        text.push_str(&raw[cursor..start]);

        let (body_end, resume) = match raw[body_start..].find(FENCE) {
            Some(rel) => {
                let close = body_start + rel;
                match opening_at(raw, close) {
                    // An unclosed block stops where the next one of its kind opens.
                    Some((next_kind, _)) if next_kind == kind => (close, close),
                    _ => (close, close + FENCE.len()),
                }
            }
            None => (raw.len(), raw.len()),
        };

        let slot = kind as usize;
        let placeholder = format!("{open}{}{}{close}", kind.token_label(), counts[slot]);
        counts[slot] += 1;

        text.push_str(&placeholder);
        blocks.push(ExtractedBlock {
            kind,
            id: ids.allocate(kind),
            payload: raw[body_start..body_end].trim().to_string(),
            placeholder,
        });
        cursor = resume;
    }

    text.push_str(&raw[cursor..]);
    Extraction { text, blocks }
}

/// Find the next opening fence at or after `from`: returns the fence start,
/// its kind, and where the body begins.
fn next_opening(raw: &str, from: usize) -> Option<(usize, BlockKind, usize)> {
    let mut search = from;
    while let Some(rel) = raw[search..].find(FENCE) {
        let at = search + rel;
        if let Some((kind, body_start)) = opening_at(raw, at) {
            return Some((at, kind, body_start));
        }
        search = at + FENCE.len();
    }
    None
}

fn opening_at(raw: &str, at: usize) -> Option<(BlockKind, usize)> {
    let rest = raw[at..].strip_prefix(FENCE)?;
    BlockKind::ALL.into_iter().find_map(|kind| {
        let after = rest.strip_prefix(kind.marker())?;
        let newline = if after.starts_with("\r\n") {
            2
        } else if after.starts_with('\n') {
            1
        } else {
            return None;
        };
        Some((kind, at + FENCE.len() + kind.marker().len() + newline))
    })
}

/// Private-use characters that open and close tokens, picked so that neither
/// occurs in the reply. With distinct open and close characters a token can
/// only ever match at the position it was inserted.
fn token_delimiters(raw: &str) -> (char, char) {
    let used: HashSet<char> = raw
        .chars()
        .filter(|c| matches!(c, '\u{E000}'..='\u{F8FF}' | '\u{F0000}'..='\u{FFFFD}'))
        .collect();
    let mut free = ('\u{E000}'..='\u{F8FF}')
        .chain('\u{F0000}'..='\u{FFFFD}')
        .filter(|c| !used.contains(c));
    let open = free.next().unwrap_or('\u{E000}');
    let close = free.next().unwrap_or('\u{E001}');
    (open, close)
}
