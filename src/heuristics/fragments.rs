use crate::models::SubtitleEntry;

/// Merge fragment entries: timed entries shorter than `min_entry_ms` are
/// folded into the preceding entry (or the following one when first).
///
/// Captions are often split mid-phrase; cleaning fragment-sized pieces in
/// isolation produces false filler matches at the seams.
pub fn merge_fragments(entries: &[SubtitleEntry], min_entry_ms: u64) -> Vec<SubtitleEntry> {
    let mut merged: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());
    let mut carry: Option<SubtitleEntry> = None;

    for entry in entries {
        let text = entry.text.trim();
        if text.is_empty() {
            continue;
        }

        let mut current = SubtitleEntry::new(entry.start_ms, entry.end_ms, text);

        // A leading fragment waits to be prepended to the next entry
        if let Some(fragment) = carry.take() {
            current = join(&fragment, &current);
        }

        let is_fragment = current.is_timed() && current.duration_ms() < min_entry_ms;

        match merged.last_mut() {
            Some(previous) if is_fragment && previous.is_timed() => {
                *previous = join(previous, &current);
            }
            None if is_fragment => carry = Some(current),
            _ => merged.push(current),
        }
    }

    if let Some(fragment) = carry {
        merged.push(fragment);
    }

    merged
}

fn join(first: &SubtitleEntry, second: &SubtitleEntry) -> SubtitleEntry {
    SubtitleEntry::new(
        first.start_ms.min(second.start_ms),
        first.end_ms.max(second.end_ms),
        format!("{} {}", first.text, second.text),
    )
}

/// Render entries as text: one line per entry, blank line on long pauses
///
/// Untimed entries are treated as paragraphs of their own.
pub fn render_paragraphs(entries: &[SubtitleEntry], paragraph_gap_ms: u64) -> String {
    let mut text = String::new();

    for (i, entry) in entries.iter().enumerate() {
        if i > 0 {
            let previous = &entries[i - 1];
            let long_pause = entry.start_ms.saturating_sub(previous.end_ms) > paragraph_gap_ms;
            if long_pause || !entry.is_timed() {
                text.push_str("\n\n");
            } else {
                text.push('\n');
            }
        }
        text.push_str(&entry.text);
    }

    text
}
