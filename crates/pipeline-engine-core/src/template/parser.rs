//! Scanner for template text.
//!
//! Converts a string into a typed segment list (`Literal | Var`) in a single
//! left-to-right pass. Malformed template syntax never fails the scan — text
//! that does not form a valid variable reference stays literal, which is what
//! makes permissive resolution a pure substitution.

/// One piece of a scanned template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Plain text, emitted verbatim.
    Literal(String),
    /// A variable reference.
    Var(VarRef),
}

/// A parsed variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarRef {
    /// Dotted path, e.g. `user.info.name` or `items.0`.
    pub path: String,
    /// The original source text, e.g. `${user.info.name}` or `$user.name`.
    /// Preserved so permissive resolution can substitute it back unchanged.
    pub raw: String,
}

impl VarRef {
    /// Root name of the path (the part before the first dot).
    pub fn root(&self) -> &str {
        self.path.split('.').next().unwrap_or(&self.path)
    }

    /// True if the reference has at least one path segment after the root.
    pub fn has_path(&self) -> bool {
        self.path.contains('.')
    }
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_bare_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// Bracketed segments additionally allow `-` so hyphenated node ids can be
// referenced: `${fetch-data.stdout}`.
fn is_bracketed_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_valid_bracketed_path(content: &str) -> bool {
    if content.is_empty() {
        return false;
    }
    let mut segments = content.split('.');
    let root = match segments.next() {
        Some(root) => root,
        None => return false,
    };
    let root_ok = !root.is_empty()
        && root.chars().next().is_some_and(is_name_start)
        && root.chars().all(is_bracketed_segment_char);
    if !root_ok {
        return false;
    }
    segments.all(|seg| {
        !seg.is_empty()
            && (seg.chars().all(|c| c.is_ascii_digit())
                || (seg.chars().next().is_some_and(is_name_start)
                    && seg.chars().all(is_bracketed_segment_char)))
    })
}

/// Scans `text` into literal and variable segments.
pub fn parse(text: &str) -> Vec<Segment> {
    let chars: Vec<char> = text.chars().collect();
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '$' {
            literal.push(c);
            i += 1;
            continue;
        }

        // `$$` escapes template interpretation and stays literal.
        if chars.get(i + 1) == Some(&'$') {
            literal.push_str("$$");
            i += 2;
            continue;
        }

        // Bracketed form: ${path}. A missing close brace or an invalid path
        // leaves the text untouched.
        if chars.get(i + 1) == Some(&'{') {
            if let Some(rel_close) = chars[i + 2..].iter().position(|&c| c == '}') {
                let close = i + 2 + rel_close;
                let content: String = chars[i + 2..close].iter().collect();
                if is_valid_bracketed_path(&content) {
                    flush_literal(&mut segments, &mut literal);
                    segments.push(Segment::Var(VarRef {
                        raw: format!("${{{content}}}"),
                        path: content,
                    }));
                    i = close + 1;
                    continue;
                }
            }
            literal.push('$');
            i += 1;
            continue;
        }

        // Bare form: $name(.segment)*.
        if chars.get(i + 1).copied().is_some_and(is_name_start) {
            let mut end = i + 1;
            while end < chars.len() && is_bare_segment_char(chars[end]) {
                end += 1;
            }
            // Consume a dot only when a valid segment follows; `$var.` is a
            // variable followed by period punctuation.
            while chars.get(end) == Some(&'.')
                && chars.get(end + 1).copied().is_some_and(is_bare_segment_char)
            {
                end += 1;
                while end < chars.len() && is_bare_segment_char(chars[end]) {
                    end += 1;
                }
            }
            let path: String = chars[i + 1..end].iter().collect();
            flush_literal(&mut segments, &mut literal);
            segments.push(Segment::Var(VarRef {
                raw: format!("${path}"),
                path,
            }));
            i = end;
            continue;
        }

        // Lone `$` or `$` followed by something that cannot start a name.
        literal.push('$');
        i += 1;
    }

    flush_literal(&mut segments, &mut literal);
    segments
}

fn flush_literal(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

/// Returns the variable reference when `text` is *exactly* one template with
/// no surrounding text. Leading or trailing characters (including
/// whitespace) disqualify it — that is the caller's escape hatch for forcing
/// string conversion.
pub fn simple_template(text: &str) -> Option<VarRef> {
    let segments = parse(text);
    match segments.as_slice() {
        [Segment::Var(var)] => Some(var.clone()),
        _ => None,
    }
}
