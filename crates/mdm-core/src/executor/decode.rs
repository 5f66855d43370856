//! Byte-to-text decoding for downloader output: UTF-8, then GBK, then lossy.

use std::borrow::Cow;

/// Decode one raw output line. Never fails; trailing `\r`/`\n` are stripped.
pub fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    let raw = &raw[..end];

    if let Ok(text) = std::str::from_utf8(raw) {
        return text.to_string();
    }
    let (text, had_errors) = encoding_rs::GBK.decode_without_bom_handling(raw);
    if !had_errors {
        return text.into_owned();
    }
    match String::from_utf8_lossy(raw) {
        Cow::Borrowed(s) => s.to_string(),
        Cow::Owned(s) => s,
    }
}

/// Split one `\n`-terminated chunk into display lines; `\r` redraws become separate lines.
pub fn split_redraws(chunk: &[u8]) -> impl Iterator<Item = &[u8]> {
    chunk
        .split(|b| *b == b'\r' || *b == b'\n')
        .filter(|seg| !seg.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_passes_through() {
        assert_eq!(decode_line("[download] 日本語.mp4\r\n".as_bytes()), "[download] 日本語.mp4");
    }

    #[test]
    fn gbk_fallback() {
        // "中文" in GBK
        assert_eq!(decode_line(&[0xD6, 0xD0, 0xCE, 0xC4, b'\n']), "中文");
    }

    #[test]
    fn lossy_as_last_resort() {
        let text = decode_line(&[0xFF, b'o', b'k']);
        assert!(text.ends_with("ok"));
        assert!(text.contains('\u{FFFD}'));
    }

    #[test]
    fn carriage_returns_split_lines() {
        let parts: Vec<&[u8]> = split_redraws(b"[download] 1%\r[download] 2%\r\n").collect();
        assert_eq!(parts, vec![&b"[download] 1%"[..], &b"[download] 2%"[..]]);
    }
}
