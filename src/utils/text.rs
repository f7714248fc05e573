//! Subject normalisation used when deriving cache fingerprints.
//!
//! Company names and design questions arrive from mobile clients with
//! inconsistent spacing and full-width punctuation. Normalising before
//! hashing keeps `"北京ABC装饰 "` and `"北京ＡＢＣ装饰"` on the same
//! cache entry.

/// Fold full-width ASCII variants (U+FF01..=U+FF5E) to their half-width
/// equivalents and the ideographic space (U+3000) to a plain space.
/// CJK characters are left untouched.
pub fn fold_width(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => {
                char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
            }
            _ => c,
        })
        .collect()
}

/// Collapse runs of whitespace to a single space and trim the ends.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_gap = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            in_gap = true;
        } else {
            if in_gap && !out.is_empty() {
                out.push(' ');
            }
            in_gap = false;
            out.push(c);
        }
    }
    out
}

/// Canonical form of a free-text subject for fingerprinting: width-folded,
/// whitespace-collapsed, ASCII letters lowercased.
pub fn normalise_subject(s: &str) -> String {
    collapse_whitespace(&fold_width(s))
        .chars()
        .map(|c| if c.is_ascii_uppercase() { c.to_ascii_lowercase() } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_width_ascii_variants() {
        assert_eq!(fold_width("ＡＢＣ１２３"), "ABC123");
        assert_eq!(fold_width("（北京）"), "(北京)");
        assert_eq!(fold_width("a\u{3000}b"), "a b");
    }

    #[test]
    fn test_fold_width_leaves_cjk() {
        assert_eq!(fold_width("装饰工程"), "装饰工程");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a  b\t c \n"), "a b c");
        assert_eq!(collapse_whitespace(""), "");
        assert_eq!(collapse_whitespace("   "), "");
    }

    #[test]
    fn test_normalise_subject_equivalence() {
        assert_eq!(
            normalise_subject(" 北京ＡＢＣ装饰  工程 "),
            normalise_subject("北京abc装饰 工程")
        );
        assert_eq!(normalise_subject("Acme　Decor"), "acme decor");
    }
}
