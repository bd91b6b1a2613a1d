//! Heading-aware Markdown chunker.
//!
//! Splits a Markdown document into titled [`ChunkDraft`]s for storage and
//! retrieval. Every `#`, `##` or `###` heading starts a new section whose
//! title is `"{filename} • {heading}"`; body lines accumulate under the most
//! recent heading.
//!
//! # Algorithm
//!
//! 1. Normalize `\r\n` to `\n` and scan line by line.
//! 2. A heading line flushes the buffered section and becomes the new title.
//!    Text before the first heading is titled with the bare filename.
//! 3. On flush the buffer is joined and trimmed; empty sections are dropped.
//! 4. Sections longer than `max_chars` characters are cut into fixed-size
//!    slices. The cut ignores word and sentence boundaries.
//!
//! # Example
//!
//! ```rust
//! use supportai_core::chunk::chunk_markdown;
//!
//! let chunks = chunk_markdown("guide.md", "# Install\nRun the installer.", 900);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].title, "guide.md • Install");
//! ```

use crate::models::ChunkDraft;

/// Default maximum characters per chunk.
pub const DEFAULT_MAX_CHARS: usize = 900;

/// Split `markdown` into titled sections of at most `max_chars` characters.
///
/// Pure and infallible. A `max_chars` of zero is treated as one.
pub fn chunk_markdown(filename: &str, markdown: &str, max_chars: usize) -> Vec<ChunkDraft> {
    let max_chars = max_chars.max(1);
    let normalized = markdown.replace("\r\n", "\n");

    let mut chunks = Vec::new();
    let mut title = filename.to_string();
    let mut buf: Vec<&str> = Vec::new();

    for line in normalized.split('\n') {
        if let Some(heading) = parse_heading(line) {
            flush(&title, &buf, max_chars, &mut chunks);
            buf.clear();
            title = format!("{} • {}", filename, heading);
            continue;
        }
        buf.push(line);
    }
    flush(&title, &buf, max_chars, &mut chunks);

    chunks
}

/// Returns the heading text if `line` is a level 1–3 ATX heading.
fn parse_heading(line: &str) -> Option<&str> {
    let hashes = line.bytes().take_while(|b| *b == b'#').count();
    if !(1..=3).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn flush(title: &str, buf: &[&str], max_chars: usize, out: &mut Vec<ChunkDraft>) {
    let joined = buf.join("\n");
    let text = joined.trim();
    if text.is_empty() {
        return;
    }

    if text.chars().count() <= max_chars {
        out.push(ChunkDraft {
            title: title.to_string(),
            text: text.to_string(),
        });
        return;
    }

    let chars: Vec<char> = text.chars().collect();
    for slice in chars.chunks(max_chars) {
        let part: String = slice.iter().collect();
        let part = part.trim();
        if !part.is_empty() {
            out.push(ChunkDraft {
                title: title.to_string(),
                text: part.to_string(),
            });
        }
    }
}
