//! Path normalization and module derivation
//!
//! Every path stored or emitted by the service is forward-slashed; the
//! watcher runs on Windows hosts, so incoming paths may carry backslashes
//! and drive letters.

/// Canonicalise a path to forward slashes. Drive letters are kept; UNC
/// verbatim prefixes (`\\?\C:`) are stripped.
pub fn normalize_slashes(path: &str) -> String {
    let path = path.strip_prefix("\\\\?\\").unwrap_or(path);
    path.replace('\\', "/")
}

/// Longest common prefix of a set of forward-slashed paths, cut at a
/// directory boundary so the result never splits a path segment.
pub fn longest_common_prefix<'a, I>(paths: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut iter = paths.into_iter();
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut prefix = first.to_string();

    for path in iter {
        let common = prefix
            .bytes()
            .zip(path.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common);
        if prefix.is_empty() {
            return prefix;
        }
    }

    // Cut back to the last separator so "/a/foo" + "/a/foobar" yields
    // "/a/" rather than "/a/foo"
    match prefix.rfind('/') {
        Some(pos) => prefix.truncate(pos + 1),
        None => prefix.clear(),
    }
    prefix
}

/// Strip `prefix` from a path if present; result keeps no leading slash.
pub fn strip_path_prefix<'a>(path: &'a str, prefix: &str) -> &'a str {
    if prefix.is_empty() {
        return path;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.trim_start_matches('/'),
        None => path,
    }
}

/// Derive the project-qualified dotted module of a file from its path
/// relative to the project root: `Source/MyGame/Combat/Weapon.h` in
/// project `MyGame` becomes `MyGame.Source.MyGame.Combat`.
pub fn derive_module(project: &str, relative_path: &str) -> String {
    let normalized = normalize_slashes(relative_path);
    let mut segments: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
    // Last segment is the file name
    segments.pop();

    let mut module = String::from(project);
    for segment in segments {
        module.push('.');
        module.push_str(segment);
    }
    module
}

/// Header-like suffixes are preferred over implementation files in
/// find-type ordering.
pub fn is_header_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".h") || lower.ends_with(".hpp") || lower.ends_with(".hxx")
}

pub fn is_implementation_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".cpp") || lower.ends_with(".cc") || lower.ends_with(".cxx")
}

/// File name portion of a forward-slashed path.
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
