
use crate::host::TagMetadata;
use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// The tags of one note. Each tag carries its leading `#`.
pub type TagSet = BTreeSet<String>;

// Compile regexes once, reuse across calls
static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#[A-Za-z0-9_-]+").unwrap());

static ANCHORED_REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<!--tag-list\s[^>]+-->.*?<!--end-tag-list\s[^>]+-->").unwrap()
});

static ORPHAN_MARKER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--(?:end-)?tag-list\s[^>]+-->").unwrap());

/// Remove every generated region (start marker through the nearest end
/// marker), then any marker left without a partner.
pub fn strip_anchored_regions(content: &str) -> Cow<'_, str> {
    match ANCHORED_REGION_RE.replace_all(content, "") {
        Cow::Borrowed(s) => ORPHAN_MARKER_RE.replace_all(s, ""),
        Cow::Owned(s) => Cow::Owned(ORPHAN_MARKER_RE.replace_all(&s, "").into_owned()),
    }
}

/// Every `#tag` token in `text`, without any markdown awareness.
pub fn scan_inline_tags(text: &str) -> TagSet {
    TAG_RE.find_iter(text).map(|m| m.as_str().to_string()).collect()
}

/// Parse a front-matter `tags` value ("a, b" or "[a, b]") into tags.
pub fn parse_frontmatter_tags_field(field: &str) -> TagSet {
    let field = field.trim();
    let field = field
        .strip_prefix('[')
        .and_then(|f| f.strip_suffix(']'))
        .unwrap_or(field);

    field
        .split(',')
        .map(|entry| entry.trim().trim_matches(|c| c == '"' || c == '\''))
        .filter(|entry| !entry.is_empty())
        .map(normalize_tag)
        .collect()
}

/// Ensure a tag carries exactly one leading `#`.
pub fn normalize_tag(tag: &str) -> String {
    format!("#{}", tag.trim().trim_start_matches('#'))
}

/// Whether `tag` is exactly one `#tag` token, i.e. something the inline
/// scan would find and a marker can carry.
pub fn is_valid_tag(tag: &str) -> bool {
    TAG_RE
        .find(tag)
        .is_some_and(|m| m.start() == 0 && m.end() == tag.len())
}

/// One way of deriving a note's tags.
///
/// A source returns `None` when it cannot speak for the note, letting the
/// next source in priority order try.
pub trait TagSource: Send + Sync {
    fn name(&self) -> &'static str;

    fn extract(&self, content: &str, metadata: Option<&TagMetadata>) -> Option<TagSet>;
}

/// Host-parsed tags, unioned with the front-matter `tags` field.
pub struct MetadataTagSource;

impl TagSource for MetadataTagSource {
    fn name(&self) -> &'static str {
        "metadata"
    }

    fn extract(&self, _content: &str, metadata: Option<&TagMetadata>) -> Option<TagSet> {
        let metadata = metadata?;
        let mut tags: TagSet = metadata
            .tags
            .iter()
            .filter(|t| !t.trim_start_matches('#').is_empty())
            .map(|t| normalize_tag(t))
            .collect();
        if let Some(field) = &metadata.frontmatter_tags {
            tags.extend(parse_frontmatter_tags_field(field));
        }
        Some(tags)
    }
}

/// Regex scan of the raw text with generated regions removed first.
pub struct InlineTagSource;

impl TagSource for InlineTagSource {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn extract(&self, content: &str, _metadata: Option<&TagMetadata>) -> Option<TagSet> {
        Some(scan_inline_tags(&strip_anchored_regions(content)))
    }
}

/// Priority-ordered list of tag sources; the first source that answers wins.
pub struct TagExtractor {
    sources: Vec<Box<dyn TagSource>>,
}

impl TagExtractor {
    pub fn new(sources: Vec<Box<dyn TagSource>>) -> Self {
        Self { sources }
    }

    /// Metadata first (when enabled), inline scan as the fallback.
    pub fn with_defaults(use_metadata: bool) -> Self {
        let mut sources: Vec<Box<dyn TagSource>> = Vec::new();
        if use_metadata {
            sources.push(Box::new(MetadataTagSource));
        }
        sources.push(Box::new(InlineTagSource));
        Self::new(sources)
    }

    pub fn extract(&self, content: &str, metadata: Option<&TagMetadata>) -> TagSet {
        for source in &self.sources {
            if let Some(tags) = source.extract(content, metadata) {
                tracing::trace!("Tags from {} source: {:?}", source.name(), tags);
                return tags;
            }
        }
        TagSet::new()
    }
}
