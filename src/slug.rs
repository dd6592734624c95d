//! Strict slug derivation for article titles.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const SEPARATOR: char = '-';

/// Letters that survive canonical decomposition unchanged but still have an
/// obvious ASCII spelling.
fn transliterate(c: char) -> Option<&'static str> {
    let s = match c {
        'đ' | 'Đ' => "d",
        'ð' | 'Ð' => "d",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'œ' | 'Œ' => "oe",
        'ø' | 'Ø' => "o",
        'ł' | 'Ł' => "l",
        'þ' | 'Þ' => "th",
        'ı' => "i",
        _ => return None,
    };
    Some(s)
}

/// Lowercase, ASCII-only, words joined by `-`.
///
/// Anything that is not an ASCII letter, digit, whitespace or hyphen after
/// decomposition is dropped rather than turned into a separator, so
/// `"Don't stop"` becomes `"dont-stop"`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;

    for c in input.nfd() {
        if is_combining_mark(c) {
            continue;
        }
        if c.is_ascii_alphanumeric() {
            push_alnum(&mut slug, c, &mut pending_separator);
        } else if c.is_whitespace() || c == SEPARATOR {
            pending_separator = true;
        } else if let Some(ascii) = transliterate(c) {
            for a in ascii.chars() {
                push_alnum(&mut slug, a, &mut pending_separator);
            }
        }
    }

    slug
}

fn push_alnum(slug: &mut String, c: char, pending_separator: &mut bool) {
    if *pending_separator && !slug.is_empty() {
        slug.push(SEPARATOR);
    }
    *pending_separator = false;
    slug.push(c.to_ascii_lowercase());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vietnamese_title() {
        assert_eq!(slugify("Việt Nam vô địch"), "viet-nam-vo-dich");
    }

    #[test]
    fn test_uppercase_d_with_stroke() {
        assert_eq!(slugify("ĐỘI TUYỂN"), "doi-tuyen");
    }

    #[test]
    fn test_punctuation_is_removed_not_hyphenated() {
        assert_eq!(slugify("Don't stop: the (new) iPhone!"), "dont-stop-the-new-iphone");
    }

    #[test]
    fn test_existing_hyphens_are_kept_single() {
        assert_eq!(slugify("Thắng 2-0 -- trên sân nhà"), "thang-2-0-tren-san-nha");
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        assert_eq!(slugify("   Hello   World   "), "hello-world");
    }

    #[test]
    fn test_leading_punctuation_does_not_leave_separator() {
        assert_eq!(slugify("- \"Quoted\" -"), "quoted");
    }

    #[test]
    fn test_transliterated_letters() {
        assert_eq!(slugify("Straße Ørsted Łódź"), "strasse-orsted-lodz");
    }

    #[test]
    fn test_only_symbols_yields_empty() {
        assert_eq!(slugify("!!! ??? ***"), "");
        assert_eq!(slugify(""), "");
    }

    #[test]
    fn test_deterministic() {
        let title = "Giá vàng hôm nay 18/10: tăng mạnh";
        assert_eq!(slugify(title), slugify(title));
        assert_eq!(slugify(title), "gia-vang-hom-nay-1810-tang-manh");
    }
}
