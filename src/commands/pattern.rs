//! Glob-style pattern matching for `CONFIG GET`.
//!
//! Supports `*`, `?`, `[abc]`, `[^abc]`, `[a-z]` and `\x` escapes, like the
//! Redis `stringmatch` routine.

/// A compiled glob pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: Vec<u8>,
    nocase: bool,
}

impl GlobPattern {
    pub fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.as_bytes().to_vec(),
            nocase: false,
        }
    }

    /// A pattern that ignores ASCII case.
    pub fn nocase(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_ascii_lowercase().into_bytes(),
            nocase: true,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.nocase {
            matches_at(&self.pattern, text.to_ascii_lowercase().as_bytes())
        } else {
            matches_at(&self.pattern, text.as_bytes())
        }
    }
}

fn matches_at(pattern: &[u8], text: &[u8]) -> bool {
    let Some((&first, rest)) = pattern.split_first() else {
        return text.is_empty();
    };

    match first {
        b'*' => {
            // Runs of stars behave like a single one.
            let rest = trim_leading_stars(rest);
            if rest.is_empty() {
                return true;
            }
            (0..=text.len()).any(|skip| matches_at(rest, &text[skip..]))
        }
        b'?' => !text.is_empty() && matches_at(rest, &text[1..]),
        b'[' => match text.split_first() {
            Some((&c, text_rest)) => match match_class(rest, c) {
                Some((true, after)) => matches_at(after, text_rest),
                _ => false,
            },
            None => false,
        },
        b'\\' if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && matches_at(&rest[1..], &text[1..])
        }
        c => text.first() == Some(&c) && matches_at(rest, &text[1..]),
    }
}

fn trim_leading_stars(pattern: &[u8]) -> &[u8] {
    let stars = pattern.iter().take_while(|&&b| b == b'*').count();
    &pattern[stars..]
}

/// Matches `c` against a character class whose opening `[` was consumed.
///
/// Returns whether it matched and the pattern after the closing `]`, or
/// `None` when the class is not terminated.
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut i) = match class.first() {
        Some(b'^') => (true, 1),
        _ => (false, 0),
    };
    let mut matched = false;

    while i < class.len() && class[i] != b']' {
        if class[i] == b'\\' && i + 1 < class.len() {
            matched |= class[i + 1] == c;
            i += 2;
        } else if i + 2 < class.len() && class[i + 1] == b'-' && class[i + 2] != b']' {
            let (lo, hi) = if class[i] <= class[i + 2] {
                (class[i], class[i + 2])
            } else {
                (class[i + 2], class[i])
            };
            matched |= (lo..=hi).contains(&c);
            i += 3;
        } else {
            matched |= class[i] == c;
            i += 1;
        }
    }

    if i >= class.len() {
        return None;
    }
    Some((matched != negate, &class[i + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_pattern() {
        let p = GlobPattern::new("h*llo");
        assert!(p.matches("hello"));
        assert!(p.matches("hallo"));
        assert!(p.matches("hllo"));
        assert!(p.matches("heeeello"));
        assert!(!p.matches("hell"));

        let p = GlobPattern::new("h?llo");
        assert!(p.matches("hello"));
        assert!(!p.matches("hllo"));

        let p = GlobPattern::new("h[ae]llo");
        assert!(p.matches("hello"));
        assert!(p.matches("hallo"));
        assert!(!p.matches("hillo"));

        let p = GlobPattern::new("h[^e]llo");
        assert!(!p.matches("hello"));
        assert!(p.matches("hallo"));

        let p = GlobPattern::new("key[0-9]");
        assert!(p.matches("key7"));
        assert!(!p.matches("keyx"));

        let p = GlobPattern::new("*");
        assert!(p.matches(""));
        assert!(p.matches("anything"));
    }

    #[test]
    fn test_escape_and_unterminated_class() {
        assert!(GlobPattern::new("a\\*b").matches("a*b"));
        assert!(!GlobPattern::new("a\\*b").matches("axb"));
        assert!(!GlobPattern::new("a[bc").matches("ab"));
    }

    #[test]
    fn test_nocase() {
        let p = GlobPattern::nocase("DB*");
        assert!(p.matches("dbfilename"));
        assert!(!GlobPattern::new("DB*").matches("dbfilename"));
    }
}
