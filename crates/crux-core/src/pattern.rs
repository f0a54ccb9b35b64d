//! Symbol-name pattern matching.

/// How a symbol name matched a query pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    /// The pattern contained `*` or `?` and glob-matched the name.
    Wildcard,
    StartsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaseSensitivity {
    #[default]
    Sensitive,
    Insensitive,
}

/// True when `pattern` should be treated as a glob.
pub fn is_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// Glob match supporting `*` (any run) and `?` (any single char).
pub fn wild_match(pattern: &str, text: &str, cs: CaseSensitivity) -> bool {
    let (pattern, text) = match cs {
        CaseSensitivity::Sensitive => (pattern.to_string(), text.to_string()),
        CaseSensitivity::Insensitive => (pattern.to_lowercase(), text.to_lowercase()),
    };
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

/// Classifies how `name` matches `pattern`, or `None` on a miss.
///
/// Wildcard patterns only ever produce [`MatchKind::Wildcard`]; plain
/// patterns produce [`MatchKind::Exact`] on equality and
/// [`MatchKind::StartsWith`] on a proper prefix.
pub fn match_symbol_name(pattern: &str, name: &str, cs: CaseSensitivity) -> Option<MatchKind> {
    if is_wildcard(pattern) {
        return wild_match(pattern, name, cs).then_some(MatchKind::Wildcard);
    }

    let equal = match cs {
        CaseSensitivity::Sensitive => pattern == name,
        CaseSensitivity::Insensitive => pattern.eq_ignore_ascii_case(name),
    };
    if equal {
        return Some(MatchKind::Exact);
    }

    let prefixed = match cs {
        CaseSensitivity::Sensitive => name.starts_with(pattern),
        CaseSensitivity::Insensitive => {
            name.len() >= pattern.len() && name[..pattern.len()].eq_ignore_ascii_case(pattern)
        }
    };
    prefixed.then_some(MatchKind::StartsWith)
}
