//! Tag scanner for the template language
//!
//! Locates delimiters in raw template text. Scanning is two-phase: one
//! combined scan finds the nearest opening delimiter of any kind, then a
//! kind-specific sub-scan finds that tag's own closer. Tag bodies may
//! contain foreign openers but not their own closing pattern; fragment
//! definitions are the one exception and nest by `{=`/`=}` depth.

/// The fixed set of tag kinds recognized by the scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    /// `{{ expr }}` — interpolation, no escaping
    Emit,
    /// `{@ expr @}` — interpolation through the escape utility
    EmitEscaped,
    /// `{% code %}` — host code hook
    Code,
    /// `{# text #}` — comment, discarded
    Comment,
    /// `{_ text _}` — localized literal
    Localize,
    /// `{$ name $}` — block reference
    Block,
    /// `{= name(params) body =}` — fragment definition
    Fragment,
    /// `#import name` to end of line
    Import,
    /// `#extends name` to end of line
    Extends,
}

impl TagKind {
    /// Map the character after `{` to a tag kind
    fn from_marker(c: u8) -> Option<TagKind> {
        match c {
            b'{' => Some(TagKind::Emit),
            b'@' => Some(TagKind::EmitEscaped),
            b'%' => Some(TagKind::Code),
            b'#' => Some(TagKind::Comment),
            b'_' => Some(TagKind::Localize),
            b'$' => Some(TagKind::Block),
            b'=' => Some(TagKind::Fragment),
            _ => None,
        }
    }

    /// The closing pattern, for scanning
    fn close_pattern(&self) -> &'static str {
        match self {
            TagKind::Emit => "}}",
            TagKind::EmitEscaped => "@}",
            TagKind::Code => "%}",
            TagKind::Comment => "#}",
            TagKind::Localize => "_}",
            TagKind::Block => "$}",
            TagKind::Fragment => "=}",
            TagKind::Import | TagKind::Extends => "\n",
        }
    }

    /// The closing delimiter, for error messages
    pub fn close_label(&self) -> &'static str {
        match self {
            TagKind::Import | TagKind::Extends => "newline",
            other => other.close_pattern(),
        }
    }
}

/// An opening delimiter located in the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opening {
    pub kind: TagKind,
    /// Byte offset of the delimiter
    pub at: usize,
    /// Byte length of the delimiter
    pub len: usize,
}

/// The extent of a tag body once its closer is found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closing {
    /// Byte offset one past the last body byte
    pub body_end: usize,
    /// Byte offset where scanning resumes after the closer
    pub resume: usize,
}

/// Find the nearest opening delimiter at or after `from`.
///
/// All delimiters are ASCII, so a byte scan is safe in UTF-8 input.
pub fn next_opening(input: &str, from: usize) -> Option<Opening> {
    let bytes = input.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'{' && i + 1 < bytes.len() {
            if let Some(kind) = TagKind::from_marker(bytes[i + 1]) {
                return Some(Opening { kind, at: i, len: 2 });
            }
        }
        if bytes[i] == b'#' {
            if input[i..].starts_with("#import") {
                return Some(Opening {
                    kind: TagKind::Import,
                    at: i,
                    len: "#import".len(),
                });
            }
            if input[i..].starts_with("#extends") {
                return Some(Opening {
                    kind: TagKind::Extends,
                    at: i,
                    len: "#extends".len(),
                });
            }
        }
        i += 1;
    }
    None
}

/// Find `kind`'s closing delimiter starting at `body_start`.
///
/// Returns `None` when the closer never appears — an unterminated tag.
pub fn find_close(input: &str, kind: TagKind, body_start: usize) -> Option<Closing> {
    if kind == TagKind::Fragment {
        return find_fragment_close(input, body_start);
    }
    let pattern = kind.close_pattern();
    input[body_start..].find(pattern).map(|rel| {
        let body_end = body_start + rel;
        Closing {
            body_end,
            resume: body_end + pattern.len(),
        }
    })
}

/// Depth-aware closer scan for fragment definitions: `{=`/`=}` pairs nest.
fn find_fragment_close(input: &str, body_start: usize) -> Option<Closing> {
    let bytes = input.as_bytes();
    let mut i = body_start;
    let mut depth = 0usize;
    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'=' {
            depth += 1;
            i += 2;
        } else if bytes[i] == b'=' && bytes[i + 1] == b'}' {
            if depth == 0 {
                return Some(Closing {
                    body_end: i,
                    resume: i + 2,
                });
            }
            depth -= 1;
            i += 2;
        } else {
            i += 1;
        }
    }
    None
}
