use std::fmt;

use encoding_rs::SHIFT_JIS;

pub const UTF8_BOM: [u8; 3] = [0xef, 0xbb, 0xbf];

/// Text encodings the sync target understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// UTF-8 with a leading byte-order mark (`utf-8-sig`).
    Utf8Bom,
    /// Shift-JIS as written by Windows (`cp932`).
    ShiftJis,
    /// UTF-8 without a byte-order mark.
    Utf8,
}

impl Charset {
    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8Bom => "utf-8-sig",
            Charset::ShiftJis => "cp932",
            Charset::Utf8 => "utf-8",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

pub fn has_bom(content: &[u8]) -> bool {
    content.starts_with(&UTF8_BOM)
}

// Candidates are tried in a fixed order. Shift-JIS only wins when the bytes
// are not also valid UTF-8, otherwise plain ASCII would be tagged cp932.
pub fn detect(content: &[u8]) -> Charset {
    if content.is_empty() || has_bom(content) {
        return Charset::Utf8Bom;
    }

    if std::str::from_utf8(content).is_err()
        && SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(content)
            .is_some()
    {
        return Charset::ShiftJis;
    }

    Charset::Utf8
}

/// Returns the bytes to store remotely and the charset they are stored under.
///
/// Plain UTF-8 gets a BOM prepended since the reading device relies on it.
/// Content that already carries the BOM, or is Shift-JIS, is kept as-is.
pub fn normalize(content: Vec<u8>) -> (Vec<u8>, Charset) {
    match detect(&content) {
        Charset::Utf8 => {
            let mut with_bom = Vec::with_capacity(UTF8_BOM.len() + content.len());
            with_bom.extend_from_slice(&UTF8_BOM);
            with_bom.extend_from_slice(&content);
            (with_bom, Charset::Utf8Bom)
        }
        charset => (content, charset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_bom_tagged() {
        assert_eq!(detect(b""), Charset::Utf8Bom);
    }

    #[test]
    fn test_bom_prefix() {
        let mut content = UTF8_BOM.to_vec();
        content.extend_from_slice("UTF-8 のテキストです。".as_bytes());
        assert_eq!(detect(&content), Charset::Utf8Bom);
    }

    #[test]
    fn test_shift_jis() {
        let (encoded, _, had_errors) = SHIFT_JIS.encode("Shift_JIS のテキストです。");
        assert!(!had_errors);
        assert_eq!(detect(&encoded), Charset::ShiftJis);
    }

    #[test]
    fn test_utf8_without_bom() {
        assert_eq!(detect("UTF-8 BOM 無し のテキストです。".as_bytes()), Charset::Utf8);
        assert_eq!(detect(b"hello"), Charset::Utf8);
    }

    #[test]
    fn test_garbage_falls_back_to_utf8() {
        // 0x81 0x20 is an incomplete Shift-JIS pair and invalid UTF-8
        assert_eq!(detect(&[0x81, 0x20, 0xff]), Charset::Utf8);
    }

    #[test]
    fn test_normalize_prefixes_bom_once() {
        let (stored, charset) = normalize(b"hello".to_vec());
        assert_eq!(charset, Charset::Utf8Bom);
        assert_eq!(stored, b"\xef\xbb\xbfhello");

        let (again, charset) = normalize(stored.clone());
        assert_eq!(charset, Charset::Utf8Bom);
        assert_eq!(again, stored);
    }

    #[test]
    fn test_normalize_keeps_shift_jis() {
        let (encoded, _, _) = SHIFT_JIS.encode("テストです");
        let (stored, charset) = normalize(encoded.to_vec());
        assert_eq!(charset, Charset::ShiftJis);
        assert_eq!(stored, encoded.to_vec());
    }
}
