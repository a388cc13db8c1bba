/// Body markup normalisation and summary elision.
///
/// Bodies arrive as a loose HTML subset.  We keep `b`, `i`, `u`, line breaks,
/// hyperlinks and images that point at local files; every other tag is
/// dropped but its text is kept.  Plain newlines become `<br/>`.
use std::sync::OnceLock;

use regex::Regex;
use unicode_width::UnicodeWidthChar;

const ELLIPSIS: char = '…';

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<\s*(/?)\s*([A-Za-z][A-Za-z0-9]*)([^<>]*?)/?\s*>").expect("valid tag regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid attr regex")
    })
}

fn attr<'a>(attrs: &'a str, wanted: &str) -> Option<&'a str> {
    attr_re().captures_iter(attrs).find_map(|caps| {
        if !caps[1].eq_ignore_ascii_case(wanted) {
            return None;
        }
        caps.get(2).or_else(|| caps.get(3)).map(|v| v.as_str())
    })
}

/// Escapes text for use inside a double-quoted attribute or as element
/// content.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn is_local_image(src: &str) -> bool {
    src.starts_with('/') || src.starts_with("file://")
}

pub fn normalize_body(body: &str) -> String {
    let body = body.replace("\r\n", "\n");
    let mut out = String::with_capacity(body.len());
    let mut last = 0;
    let mut open_links = 0usize;

    for caps in tag_re().captures_iter(&body) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&body[last..whole.start()]);
        last = whole.end();

        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        let attrs = caps.get(3).map_or("", |a| a.as_str());

        match (name.as_str(), closing) {
            ("br", _) => out.push_str("<br/>"),
            ("b" | "i" | "u", false) => {
                out.push('<');
                out.push_str(&name);
                out.push('>');
            }
            ("b" | "i" | "u", true) => {
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
            }
            ("a", false) => {
                if let Some(href) = attr(attrs, "href") {
                    out.push_str(&format!("<a href=\"{}\">", escape(href)));
                    open_links += 1;
                }
            }
            ("a", true) => {
                if open_links > 0 {
                    out.push_str("</a>");
                    open_links -= 1;
                }
            }
            ("img", false) => {
                let alt = attr(attrs, "alt").unwrap_or("");
                match attr(attrs, "src") {
                    Some(src) if is_local_image(src) => {
                        out.push_str(&format!(
                            "<img src=\"{}\" alt=\"{}\"/>",
                            escape(src),
                            escape(alt)
                        ));
                    }
                    _ => out.push_str(&escape(alt)),
                }
            }
            _ => {}
        }
    }
    out.push_str(&body[last..]);

    for _ in 0..open_links {
        out.push_str("</a>");
    }
    out.replace('\n', "<br/>")
}

/// Shortens `text` to at most `max_width` display columns, ending in `…`
/// when anything was cut.
pub fn elide(text: &str, max_width: usize) -> String {
    let total: usize = text.chars().map(|c| c.width().unwrap_or(0)).sum();
    if total <= max_width {
        return text.to_string();
    }
    if max_width == 0 {
        return String::new();
    }

    let budget = max_width - 1;
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push(ELLIPSIS);
    out
}
