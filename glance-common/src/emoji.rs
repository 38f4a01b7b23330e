//! Emoji constants and normalization
//!
//! Every emoji the gateway compares against is defined here from explicit
//! code points. Comparing raw source-text bytes has bitten this codebase
//! before: editors and terminals re-encode pasted glyphs, and variation
//! selectors or ZWJ sequences make visually identical emoji compare
//! unequal. All comparisons go through [`normalize`] (Unicode NFC) first.

use unicode_normalization::UnicodeNormalization;

/// Person (standing), the human-context anchor for curation rules
pub const PERSON: &str = "\u{1F9CD}";

/// Slightly smiling face, emitted by the face analyzer
pub const FACE: &str = "\u{1F642}";

/// No-one-under-eighteen, emitted by the content moderation analyzer
pub const NSFW: &str = "\u{1F51E}";

/// Memo, emitted for extracted text
pub const TEXT: &str = "\u{1F4DD}";

/// NFC-normalize an emoji string.
///
/// Applied at the ingress of the clustering and voting stages so that
/// equivalent sequences coalesce into one group.
pub fn normalize(emoji: &str) -> String {
    emoji.nfc().collect()
}

/// Whether two emoji strings are equivalent under NFC.
pub fn same(a: &str, b: &str) -> bool {
    a.nfc().eq(b.nfc())
}
