//! Body text extraction: base64 decoding, HTML stripping, whitespace
//! normalization, and domain derivation.

use base64::Engine;
use regex::Regex;
use std::sync::OnceLock;

fn script_style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b[^>]*>.*?</(script|style|head)>")
            .expect("static regex")
    })
}

fn block_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<(br|/p|/div|/tr|/li|/h[1-6])\s*/?>").expect("static regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

/// Reduce an HTML fragment to plain text: script/style/head blocks dropped,
/// block-level closers turned into newlines, remaining tags stripped, common
/// entities decoded, whitespace normalized.
pub fn html_to_text(html: &str) -> String {
    let no_blocks = script_style_re().replace_all(html, " ");
    let with_breaks = block_break_re().replace_all(&no_blocks, "\n");
    let stripped = tag_re().replace_all(&with_breaks, " ");
    let decoded = decode_entities(&stripped);
    normalize_whitespace(&decoded)
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
}

/// Collapse runs of spaces/tabs and limit consecutive blank lines to one.
pub fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0usize;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
            out.push('\n');
        } else {
            blank_run = 0;
            out.push_str(&collapsed);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

/// Decode a base64-encoded body part. If the input does not look like base64,
/// or decoding yields empty or non-UTF-8 output, the original is kept.
pub fn decode_body(raw: &str) -> String {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() < 16 || compact.len() % 4 != 0 {
        return raw.to_string();
    }
    if !compact
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
    {
        return raw.to_string();
    }
    match base64::engine::general_purpose::STANDARD.decode(&compact) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(decoded) if !decoded.trim().is_empty() => decoded,
            _ => raw.to_string(),
        },
        Err(_) => raw.to_string(),
    }
}

/// Full extraction pipeline for a raw provider body.
pub fn extract_text(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    let decoded = decode_body(raw);
    html_to_text(&decoded)
}

/// Lowercased domain part of an email address.
pub fn from_domain(email: &str) -> Option<String> {
    let at = email.rfind('@')?;
    let domain = &email[at + 1..];
    if domain.is_empty() {
        return None;
    }
    Some(domain.trim_end_matches('>').to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_decodes_entities() {
        let html = "<div><p>Hello &amp; welcome</p><p>Second&nbsp;line</p></div>";
        let text = html_to_text(html);
        assert_eq!(text, "Hello & welcome\nSecond line");
    }

    #[test]
    fn drops_script_and_style_blocks() {
        let html = "<style>.a{color:red}</style><script>alert(1)</script>Visible";
        assert_eq!(html_to_text(html), "Visible");
    }

    #[test]
    fn collapses_blank_lines() {
        let text = "a\n\n\n\nb";
        assert_eq!(normalize_whitespace(text), "a\n\nb");
    }

    #[test]
    fn decodes_valid_base64_bodies() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("plain text body here");
        assert_eq!(decode_body(&encoded), "plain text body here");
    }

    #[test]
    fn keeps_original_when_base64_decodes_to_non_utf8() {
        // 0xFF 0xFE ... is valid base64 but not valid UTF-8.
        let encoded = base64::engine::general_purpose::STANDARD.encode([0xFFu8; 24]);
        assert_eq!(decode_body(&encoded), encoded);
    }

    #[test]
    fn keeps_original_for_plain_prose() {
        let prose = "This is just a sentence, not base64.";
        assert_eq!(decode_body(prose), prose);
    }

    #[test]
    fn empty_body_extracts_to_empty() {
        assert_eq!(extract_text("   "), "");
        assert_eq!(extract_text("<div> </div>"), "");
    }

    #[test]
    fn from_domain_lowercases() {
        assert_eq!(
            from_domain("User@Streamlit.DiscourseMail.com").as_deref(),
            Some("streamlit.discoursemail.com")
        );
        assert_eq!(from_domain("not-an-address"), None);
        assert_eq!(from_domain("trailing@"), None);
    }
}
