//! Locating and rewriting the marker-delimited regions that hold a tag
//! list inside a note:
//!
//! ```text
//! <!--tag-list #apple 1700000000000-->
//! [[fruit]]
//! [[pie]]
//! <!--end-tag-list #apple 1700000000000-->
//! ```
//!
//! Everything here is a pure function of the note text. Writing the result
//! back is the caller's job.

use crate::host::basename;

pub fn start_marker(tag: &str, id: i64) -> String {
    format!("<!--tag-list {} {}-->", tag, id)
}

pub fn end_marker(tag: &str, id: i64) -> String {
    format!("<!--end-tag-list {} {}-->", tag, id)
}

/// Render member notes as wikilinks: "Recipes/pie.md" -> "[[pie]]".
pub fn render_links<'a, I>(notes: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    notes
        .into_iter()
        .map(|id| format!("[[{}]]", basename(id)))
        .collect()
}

/// Byte offsets of a region's markers. Either may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLocation {
    /// Offset of the first byte of the start marker.
    pub start: Option<usize>,
    /// Offset of the first byte of the end marker.
    pub end: Option<usize>,
    start_len: usize,
    end_len: usize,
}

impl RegionLocation {
    pub fn is_missing(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Find the markers for (`tag`, `id`). When the start marker exists, the
/// end marker is only searched for after it.
pub fn locate(content: &str, tag: &str, id: i64) -> RegionLocation {
    let start_m = start_marker(tag, id);
    let end_m = end_marker(tag, id);

    let start = content.find(&start_m);
    let end = match start {
        Some(s) => {
            let after = s + start_m.len();
            content[after..].find(&end_m).map(|e| after + e)
        }
        None => content.find(&end_m),
    };

    RegionLocation {
        start,
        end,
        start_len: start_m.len(),
        end_len: end_m.len(),
    }
}

/// Text between the two markers, when both exist.
pub fn current_body<'a>(content: &'a str, location: &RegionLocation) -> Option<&'a str> {
    match (location.start, location.end) {
        (Some(start), Some(end)) => content.get(start + location.start_len..end),
        _ => None,
    }
}

/// Replace `remove_len` bytes at `offset` with `insert_text`.
#[derive(Debug, PartialEq, Eq)]
pub struct TextEdit {
    pub offset: usize,
    pub remove_len: usize,
    pub insert_text: String,
}

impl TextEdit {
    pub fn apply(&self, content: &str) -> String {
        let mut out = String::with_capacity(content.len() + self.insert_text.len());
        out.push_str(&content[..self.offset]);
        out.push_str(&self.insert_text);
        out.push_str(&content[self.offset + self.remove_len..]);
        out
    }
}

/// End of the line holding `offset`: the index of the next '\n', or the
/// end of the text.
fn line_end(content: &str, offset: usize) -> usize {
    content[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(content.len())
}

/// The span a region occupies. With no end marker the region runs to the
/// end of the start marker's line (`include_newline` also takes the '\n').
fn region_span(content: &str, location: &RegionLocation, include_newline: bool) -> Option<(usize, usize)> {
    let start = location.start?;
    let stop = match location.end {
        Some(end) => end + location.end_len,
        None => {
            let eol = line_end(content, start);
            if include_newline && eol < content.len() {
                eol + 1
            } else {
                eol
            }
        }
    };
    Some((start, stop))
}

/// Outcome of converging a region towards a desired list of links.
#[derive(Debug, PartialEq, Eq)]
pub enum Convergence {
    /// The region already shows exactly the desired links.
    Unchanged,
    /// The start marker is gone; nothing was touched.
    MarkerMissing,
    /// The region body was rewritten.
    Rewritten(String),
    /// The desired list was empty, so the whole region was removed.
    Removed(String),
}

impl Convergence {
    /// New note content, when the note has to be written.
    pub fn content(&self) -> Option<&str> {
        match self {
            Convergence::Rewritten(c) | Convergence::Removed(c) => Some(c.as_str()),
            Convergence::Unchanged | Convergence::MarkerMissing => None,
        }
    }
}

/// Bring the region for (`tag`, `id`) in line with `desired` links.
///
/// Content outside the region is never altered. Converging twice with the
/// same links yields `Unchanged` the second time. A start marker that no
/// longer exists is not recreated.
pub fn converge(content: &str, tag: &str, id: i64, desired: &[String]) -> Convergence {
    let location = locate(content, tag, id);
    if location.start.is_none() {
        return Convergence::MarkerMissing;
    }

    let body = desired.join("\n");
    if !desired.is_empty() {
        if let Some(existing) = current_body(content, &location) {
            if existing.trim() == body {
                return Convergence::Unchanged;
            }
        }
    }

    if desired.is_empty() {
        return match remove_region_at(content, &location) {
            Some(updated) => Convergence::Removed(updated),
            None => Convergence::MarkerMissing,
        };
    }

    let Some((start, stop)) = region_span(content, &location, false) else {
        return Convergence::MarkerMissing;
    };
    let edit = TextEdit {
        offset: start,
        remove_len: stop - start,
        insert_text: format!("{}\n{}\n{}", start_marker(tag, id), body, end_marker(tag, id)),
    };
    Convergence::Rewritten(edit.apply(content))
}

fn remove_region_at(content: &str, location: &RegionLocation) -> Option<String> {
    let (start, stop) = region_span(content, location, true)?;
    let edit = TextEdit {
        offset: start,
        remove_len: stop - start,
        insert_text: String::new(),
    };
    Some(edit.apply(content))
}

/// Remove the region for (`tag`, `id`): start marker through end marker, or
/// through the end of the start marker's line when the end marker is gone.
/// Returns `None` if there is no start marker.
pub fn remove_region(content: &str, tag: &str, id: i64) -> Option<String> {
    remove_region_at(content, &locate(content, tag, id))
}

/// Insert an empty marker pair at `cursor` (a byte offset, moved back to
/// the nearest char boundary), or at the end of the note when `None`.
pub fn insert_markers(content: &str, tag: &str, id: i64, cursor: Option<usize>) -> String {
    let mut offset = cursor.unwrap_or(content.len()).min(content.len());
    while !content.is_char_boundary(offset) {
        offset -= 1;
    }
    // Keep the pair on its own line when appending after text.
    let lead = if offset == content.len() && !content.is_empty() && !content.ends_with('\n') {
        "\n"
    } else {
        ""
    };
    let edit = TextEdit {
        offset,
        remove_len: 0,
        insert_text: format!("{}{}\n{}\n", lead, start_marker(tag, id), end_marker(tag, id)),
    };
    edit.apply(content)
}
