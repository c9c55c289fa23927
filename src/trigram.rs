//! Trigram extraction and pattern reduction
//!
//! A trigram is three consecutive ASCII-lowercased bytes packed into a
//! 24-bit integer `(c1<<16)|(c2<<8)|c3`. Trigrams containing newline,
//! carriage return, or NUL are dropped so no trigram spans lines.
//!
//! `pattern_to_trigrams` reduces a search pattern to a set of trigrams
//! that every matching string must contain (AND semantics). Unindexable
//! patterns (`.*`, `a|b`, ...) reduce to the empty set and callers fall
//! back to a full scan.

use std::collections::HashSet;

/// Extract the set of 24-bit trigrams from text after ASCII lower-casing.
pub fn extract_trigrams(text: &str) -> HashSet<u32> {
    let bytes = text.as_bytes();
    let mut out = HashSet::new();
    if bytes.len() < 3 {
        return out;
    }
    for window in bytes.windows(3) {
        if window.iter().any(|&b| b == b'\n' || b == b'\r' || b == 0) {
            continue;
        }
        let c1 = window[0].to_ascii_lowercase() as u32;
        let c2 = window[1].to_ascii_lowercase() as u32;
        let c3 = window[2].to_ascii_lowercase() as u32;
        out.insert((c1 << 16) | (c2 << 8) | c3);
    }
    out
}

/// Stable 64-bit content hash: the first 8 bytes of the blake3 digest as a
/// little-endian signed integer. This is a change-detection shortcut, not a
/// byte-exactness guarantee; callers that need exactness compare content.
pub fn content_hash(content: &[u8]) -> i64 {
    let digest = blake3::hash(content);
    let mut first = [0u8; 8];
    first.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(first)
}

/// Trigrams required by every string matching `pattern`.
///
/// For a literal pattern this is exactly `extract_trigrams(pattern)`. For a
/// regex, each top-level alternation branch is reduced to the trigrams of
/// its literal fragments; the result is the intersection across branches.
/// An empty result means the pattern is unindexable.
pub fn pattern_to_trigrams(pattern: &str, is_regex: bool) -> HashSet<u32> {
    match pattern_branch_trigrams(pattern, is_regex) {
        Some(branches) => {
            let mut iter = branches.into_iter();
            let mut acc = match iter.next() {
                Some(first) => first,
                None => return HashSet::new(),
            };
            for set in iter {
                acc.retain(|t| set.contains(t));
            }
            acc
        }
        None => HashSet::new(),
    }
}

/// Per-branch required-trigram sets for a pattern, or None when any branch
/// is unindexable. Candidate selection unions the per-branch intersections:
/// a file matching the pattern matches some branch and therefore carries
/// all of that branch's trigrams.
pub fn pattern_branch_trigrams(pattern: &str, is_regex: bool) -> Option<Vec<HashSet<u32>>> {
    if !is_regex {
        let set = extract_trigrams(pattern);
        if set.is_empty() {
            return None;
        }
        return Some(vec![set]);
    }

    let branches = split_top_level_alternation(pattern);
    let mut out = Vec::with_capacity(branches.len());
    for branch in branches {
        let set = branch_trigrams(&branch);
        if set.is_empty() {
            return None;
        }
        out.push(set);
    }
    Some(out)
}

/// Split on un-escaped `|` at group depth zero, outside character classes.
fn split_top_level_alternation(pattern: &str) -> Vec<String> {
    let mut branches = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                current.push(c);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '[' if !in_class => {
                in_class = true;
                current.push(c);
            }
            ']' if in_class => {
                in_class = false;
                current.push(c);
            }
            '(' if !in_class => {
                depth += 1;
                current.push(c);
            }
            ')' if !in_class => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            '|' if !in_class && depth == 0 => {
                branches.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    branches.push(current);
    branches
}

/// Escaped metacharacters that count as literal characters in a run.
fn escaped_literal(c: char) -> Option<char> {
    match c {
        '.' | '(' | ')' | '[' | ']' | '{' | '}' | '*' | '+' | '?' | '|' | '^' | '$' => Some(c),
        _ => None,
    }
}

/// Reduce a single alternation branch to the union of trigrams from its
/// contiguous literal runs. Runs shorter than three characters contribute
/// nothing. `*`, `?` and `{` make the preceding character optional, so it
/// is removed from the run before the break; `+` keeps it.
fn branch_trigrams(branch: &str) -> HashSet<u32> {
    let mut trigrams = HashSet::new();
    let mut run = String::new();
    let mut chars = branch.chars().peekable();

    let mut flush = |run: &mut String| {
        if run.len() >= 3 {
            trigrams.extend(extract_trigrams(run));
        }
        run.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(esc) => match escaped_literal(esc) {
                    Some(lit) => run.push(lit),
                    // \d, \w, \b and friends match a class, not a literal
                    None => flush(&mut run),
                },
                None => flush(&mut run),
            },
            '*' | '?' | '{' => {
                run.pop();
                flush(&mut run);
                if c == '{' {
                    skip_until(&mut chars, '}');
                }
            }
            '+' => flush(&mut run),
            '.' | '^' | '$' => flush(&mut run),
            '[' => {
                flush(&mut run);
                skip_char_class(&mut chars);
            }
            '(' => {
                // Group contents may alternate internally; they contribute
                // nothing to the required set.
                flush(&mut run);
                skip_group(&mut chars);
            }
            ')' => flush(&mut run),
            _ => run.push(c),
        }
    }
    flush(&mut run);
    trigrams
}

fn skip_until(chars: &mut std::iter::Peekable<std::str::Chars>, end: char) {
    for c in chars.by_ref() {
        if c == end {
            break;
        }
    }
}

/// Skip a character class body. A `]` directly after `[` or `[^` is a
/// literal member, and escapes are honored.
fn skip_char_class(chars: &mut std::iter::Peekable<std::str::Chars>) {
    let mut first = true;
    if chars.peek() == Some(&'^') {
        chars.next();
    }
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            ']' if !first => break,
            _ => {}
        }
        first = false;
    }
}

/// Skip a balanced group, honoring escapes and classes inside it.
fn skip_group(chars: &mut std::iter::Peekable<std::str::Chars>) {
    let mut depth = 1usize;
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' => skip_char_class(chars),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(s: &str) -> u32 {
        let b = s.as_bytes();
        assert_eq!(b.len(), 3);
        ((b[0].to_ascii_lowercase() as u32) << 16)
            | ((b[1].to_ascii_lowercase() as u32) << 8)
            | b[2].to_ascii_lowercase() as u32
    }

    #[test]
    fn extracts_lowercased_trigrams() {
        let set = extract_trigrams("AActor");
        assert!(set.contains(&tri("aac")));
        assert!(set.contains(&tri("act")));
        assert!(set.contains(&tri("cto")));
        assert!(set.contains(&tri("tor")));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn trigrams_never_span_lines() {
        let set = extract_trigrams("ab\ncd");
        assert!(set.is_empty());
        let set = extract_trigrams("abc\ndef");
        assert_eq!(set.len(), 2);
        assert!(set.contains(&tri("abc")));
        assert!(set.contains(&tri("def")));
    }

    #[test]
    fn short_text_has_no_trigrams() {
        assert!(extract_trigrams("ab").is_empty());
        assert!(extract_trigrams("").is_empty());
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = content_hash(b"class AActor {};");
        let b = content_hash(b"class AActor {};");
        let c = content_hash(b"class APawn {};");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn literal_pattern_is_exactly_its_trigrams() {
        let pattern = "FTimerHandle";
        assert_eq!(
            pattern_to_trigrams(pattern, false),
            extract_trigrams(pattern)
        );
    }

    #[test]
    fn unindexable_patterns_return_empty() {
        assert!(pattern_to_trigrams(".*", true).is_empty());
        assert!(pattern_to_trigrams("a|b", true).is_empty());
        assert!(pattern_to_trigrams("a+", true).is_empty());
        assert!(pattern_to_trigrams("[abc]+", true).is_empty());
    }

    #[test]
    fn star_makes_preceding_char_optional() {
        // "ab*c" matches "ac"; only runs around the quantified char count,
        // and both are too short to contribute.
        assert!(pattern_to_trigrams("ab*c", true).is_empty());
        // "abcd*efg" matches "abcefg"; "abc" and "efg" remain required.
        let set = pattern_to_trigrams("abcd*efg", true);
        assert!(set.contains(&tri("abc")));
        assert!(set.contains(&tri("efg")));
        assert!(!set.contains(&tri("bcd")));
    }

    #[test]
    fn plus_keeps_preceding_char() {
        let set = pattern_to_trigrams("abc+def", true);
        assert!(set.contains(&tri("abc")));
        assert!(set.contains(&tri("def")));
        assert!(!set.contains(&tri("cde")));
    }

    #[test]
    fn escaped_metacharacters_are_literals() {
        let set = pattern_to_trigrams(r"Foo\.Bar", true);
        assert!(set.contains(&tri("foo")));
        assert!(set.contains(&tri("o.b")));
        assert!(set.contains(&tri("bar")));
    }

    #[test]
    fn character_class_breaks_runs() {
        let set = pattern_to_trigrams("foo[0-9]bar", true);
        assert!(set.contains(&tri("foo")));
        assert!(set.contains(&tri("bar")));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn alternation_intersects_branches() {
        let set = pattern_to_trigrams("DestroyActor|DestroyPawn", true);
        // Shared "destroy" prefix survives the intersection.
        assert!(set.contains(&tri("des")));
        assert!(set.contains(&tri("roy")));
        // Branch-specific tails do not.
        assert!(!set.contains(&tri("paw")));
        assert!(!set.contains(&tri("tor")));
    }

    #[test]
    fn alternation_with_unindexable_branch_is_unindexable() {
        assert!(pattern_to_trigrams("DestroyActor|ab", true).is_empty());
        assert!(pattern_branch_trigrams("DestroyActor|ab", true).is_none());
    }

    #[test]
    fn branch_sets_cover_all_alternatives() {
        let branches =
            pattern_branch_trigrams("DestroyActor|DestroyPawn|SetTimer|FTimerHandle", true)
                .expect("all branches indexable");
        assert_eq!(branches.len(), 4);
        assert!(branches[2].contains(&tri("set")));
        assert!(branches[3].contains(&tri("fti")));
    }

    #[test]
    fn group_with_inner_alternation_contributes_nothing() {
        let set = pattern_to_trigrams("foobar(baz|qux)quux", true);
        assert!(set.contains(&tri("foo")));
        assert!(set.contains(&tri("quu")));
        assert!(!set.contains(&tri("baz")));
        assert!(!set.contains(&tri("qux")));
    }

    #[test]
    fn class_with_bracket_member_is_skipped_cleanly() {
        let set = pattern_to_trigrams("abc[]x]def", true);
        assert!(set.contains(&tri("abc")));
        assert!(set.contains(&tri("def")));
    }
}
