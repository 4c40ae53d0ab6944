//! Plain-text views over raw page content
//!
//! Rendered pages arrive either as markup or as already-flattened text.
//! Both are reduced to a list of text nodes: runs of visible text split at
//! tag boundaries and line breaks, with whitespace collapsed.

/// Elements whose content is never visible text
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Split raw content into discrete, non-empty text nodes
pub fn text_nodes(raw: &str) -> Vec<String> {
    let mut nodes = Vec::new();
    let mut current = String::new();
    let mut rest = raw;

    while let Some(ch) = rest.chars().next() {
        match ch {
            '<' => {
                flush(&mut current, &mut nodes);
                rest = skip_tag(rest);
            }
            '\n' | '\r' => {
                flush(&mut current, &mut nodes);
                rest = &rest[1..];
            }
            _ => {
                current.push(ch);
                rest = &rest[ch.len_utf8()..];
            }
        }
    }
    flush(&mut current, &mut nodes);

    nodes
}

/// Full-document text: every node joined by a single space
pub fn document_text(nodes: &[String]) -> String {
    nodes.join(" ")
}

fn flush(current: &mut String, nodes: &mut Vec<String>) {
    let text = normalize_ws(&decode_entities(current));
    if !text.is_empty() {
        nodes.push(text);
    }
    current.clear();
}

/// Advance past the tag starting at `s[0] == '<'`, including the body of
/// non-visible elements such as `<script>`.
fn skip_tag(s: &str) -> &str {
    let end = match s.find('>') {
        Some(i) => i + 1,
        // Unterminated tag: nothing after it is visible
        None => return "",
    };

    let name: String = s[1..end]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if SKIPPED_ELEMENTS.contains(&name.as_str()) && !s[..end].ends_with("/>") {
        let close = format!("</{}", name);
        let lower = s[end..].to_ascii_lowercase();
        return match lower.find(&close) {
            Some(i) => {
                let after = end + i;
                match s[after..].find('>') {
                    Some(j) => &s[after + j + 1..],
                    None => "",
                }
            }
            None => "",
        };
    }

    &s[end..]
}

pub fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

pub fn normalize_ws(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim().to_string()
}
