//! Rewriting `<img src="...">` in stored rich text
//!
//! Rich text keeps bare file hashes in its image sources so that links
//! survive a change of download URL. These helpers swap hashes and URLs in
//! place and leave the rest of the markup byte-for-byte intact.

use std::sync::OnceLock;

use regex::Regex;

use crate::digest::is_hash;
use crate::urls::try_file_hash;

fn img_src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let attrs = r"(?:\s[^<>]*)?";
        Regex::new(&format!(r#"(?i:<img{attrs}\ssrc="(.*?)"{attrs}/?>)"#))
            .expect("img src pattern is valid")
    })
}

/// Replace the source of every `<img>` tag with `f(source)`.
pub fn replace_img_src<F>(html: &str, mut f: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    for caps in img_src_regex().captures_iter(html) {
        let Some(src) = caps.get(1) else { continue };
        out.push_str(&html[last..src.start()]);
        out.push_str(&f(src.as_str()));
        last = src.end();
    }
    out.push_str(&html[last..]);
    out
}

/// Turn download URLs in image sources into bare file hashes. Returns the
/// new markup and every hash found, in document order. Sources that are not
/// download URLs are kept as they are.
pub fn img_src_to_file_hash(html: &str) -> (String, Vec<String>) {
    let mut hashes = Vec::new();
    let out = replace_img_src(html, |src| match try_file_hash(src) {
        Some(hash) => {
            hashes.push(hash.clone());
            hash
        }
        None => src.to_string(),
    });
    (out, hashes)
}

/// Turn bare file hashes in image sources into whatever `to_url` returns.
pub(crate) fn img_src_hashes_to<F>(html: &str, to_url: F) -> String
where
    F: Fn(&str) -> String,
{
    replace_img_src(html, |src| {
        if is_hash(src) {
            to_url(src)
        } else {
            src.to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "TEaLOxaZn9lXgYlXbV93DLShatn8oOeYolHwClSofF0";

    #[test]
    fn test_replace_img_src() {
        let html = r#"<img> <img/>
<img src="1">
<img src="2"/>
<imG src="3" />
<IMG Src="4" / >
<img a src="5" b>
<img a src="x"b>
<img +src="x">
<img+ src="x">
"#;
        let expected = r#"<img> <img/>
<img src="1~">
<img src="2~"/>
<imG src="3~" />
<IMG Src="4~" / >
<img a src="5~" b>
<img a src="x"b>
<img +src="x">
<img+ src="x">
"#;
        assert_eq!(replace_img_src(html, |src| format!("{}~", src)), expected);
    }

    #[test]
    fn test_img_src_round_trip() {
        let stored = format!(r#"<p>hi</p><img src="{}"><img src="/static/logo.png">"#, HASH);

        let served = img_src_hashes_to(&stored, |hash| format!("/download?f={}&o=posts.1", hash));
        assert_eq!(
            served,
            format!(
                r#"<p>hi</p><img src="/download?f={}&o=posts.1"><img src="/static/logo.png">"#,
                HASH
            )
        );

        let (back, hashes) = img_src_to_file_hash(&served);
        assert_eq!(back, stored);
        assert_eq!(hashes, vec![HASH.to_string()]);
    }

    #[test]
    fn test_no_images() {
        let (out, hashes) = img_src_to_file_hash("<p>plain</p>");
        assert_eq!(out, "<p>plain</p>");
        assert!(hashes.is_empty());
    }
}
