// Fuzzy name scoring
//
// A candidate's score is a weighted combination of name-match quality,
// declaration kind, Unreal specifier flags, and a path signal that pushes
// headers and engine/public code up. The weights are fixed constants; the
// specifier table is deliberately not per-workspace configurable.

use crate::store::TypeKind;
use crate::utils::paths;

/// Minimum fraction of query-name trigrams a fuzzy candidate must share.
/// Bounds the candidate set independently of dataset size.
pub fn trigram_threshold(query_len: usize) -> f32 {
    if query_len <= 5 {
        0.60
    } else if query_len <= 15 {
        0.75
    } else {
        0.80
    }
}

/// Name-match component. `None` means the candidate does not qualify at
/// all (edit-distance ratio under 0.4).
pub fn name_match_score(query_lower: &str, name: &str) -> Option<f32> {
    let name_lower = name.to_ascii_lowercase();
    if name_lower == query_lower {
        return Some(1.0);
    }
    if name_lower.starts_with(query_lower) {
        return Some(0.9);
    }
    if let Some(pos) = name_lower.find(query_lower) {
        let normalized = pos as f32 / name_lower.len() as f32;
        return Some(0.7 - normalized);
    }
    let ratio = similarity_ratio(query_lower, &name_lower);
    if ratio >= 0.4 {
        Some(ratio * 0.5)
    } else {
        None
    }
}

pub fn kind_weight(kind: TypeKind) -> f32 {
    match kind {
        TypeKind::Class => 0.04,
        TypeKind::Struct => 0.03,
        TypeKind::Enum => 0.02,
        TypeKind::Delegate | TypeKind::Event => 0.01,
        TypeKind::Interface | TypeKind::Namespace => 0.0,
    }
}

/// Boost for Unreal reflection specifiers, capped at 0.08.
pub fn specifier_boost(specifiers: &[String]) -> f32 {
    let mut boost = 0.0f32;
    for specifier in specifiers {
        boost += match specifier.as_str() {
            "BlueprintType" | "Blueprintable" => 0.05,
            s if s.starts_with("Blueprint") => 0.04,
            "EditAnywhere" => 0.03,
            "EditDefaultsOnly" | "VisibleAnywhere" => 0.02,
            "UCLASS" | "USTRUCT" | "UENUM" | "UFUNCTION" | "UPROPERTY" => 0.01,
            _ => 0.0,
        };
    }
    boost.min(0.08)
}

/// Path signal: headers and engine/public paths rank above private and
/// implementation files, with a small penalty for very deep paths.
pub fn path_signal(path: &str) -> f32 {
    let mut signal = 0.0f32;
    if paths::is_header_path(path) {
        signal += 5.0;
    }
    if path.contains("/Runtime/") {
        signal += 2.0;
    }
    if path.contains("/Public/") || path.contains("/Classes/") {
        signal += 1.5;
    }
    if path.contains("/Private/") {
        signal += 0.5;
    }
    signal - path.len() as f32 * 0.001
}

/// Similarity as 1 - levenshtein / max_len.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / max_len as f32
}

/// Two-row Levenshtein over chars.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_beats_prefix_beats_substring() {
        let exact = name_match_score("aactor", "AActor").unwrap();
        let prefix = name_match_score("aactor", "AActorComponent").unwrap();
        let substring = name_match_score("actor", "AMyActorBase").unwrap();
        assert_eq!(exact, 1.0);
        assert_eq!(prefix, 0.9);
        assert!(substring < prefix);
    }

    #[test]
    fn earlier_substring_positions_score_higher() {
        let early = name_match_score("timer", "FTimerHandle").unwrap();
        let late = name_match_score("timer", "FWorldSubsystemTimer").unwrap();
        assert!(early > late);
    }

    #[test]
    fn distant_names_do_not_qualify() {
        assert!(name_match_score("aactor", "UTexture2D").is_none());
    }

    #[test]
    fn close_misspelling_qualifies_through_edit_distance() {
        // "aacter" vs "aactor": one substitution over six chars
        let score = name_match_score("aacter", "AActor").unwrap();
        assert!(score > 0.4 && score < 0.5);
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
    }

    #[test]
    fn specifier_boost_is_capped() {
        let specifiers: Vec<String> = vec![
            "BlueprintType".into(),
            "Blueprintable".into(),
            "EditAnywhere".into(),
        ];
        assert_eq!(specifier_boost(&specifiers), 0.08);
        assert_eq!(specifier_boost(&["EditAnywhere".into()]), 0.03);
        assert_eq!(specifier_boost(&[]), 0.0);
    }

    #[test]
    fn headers_dominate_the_path_signal() {
        let header = path_signal("/Engine/Runtime/Core/Public/Actor.h");
        let implementation = path_signal("/Engine/Runtime/Core/Private/Actor.cpp");
        assert!(header > implementation);
        assert!(header > 5.0);
    }

    #[test]
    fn kind_weights_follow_the_table() {
        assert_eq!(kind_weight(TypeKind::Class), 0.04);
        assert_eq!(kind_weight(TypeKind::Struct), 0.03);
        assert_eq!(kind_weight(TypeKind::Enum), 0.02);
        assert_eq!(kind_weight(TypeKind::Delegate), 0.01);
        assert_eq!(kind_weight(TypeKind::Event), 0.01);
    }

    #[test]
    fn thresholds_step_with_query_length() {
        assert_eq!(trigram_threshold(4), 0.60);
        assert_eq!(trigram_threshold(10), 0.75);
        assert_eq!(trigram_threshold(20), 0.80);
    }
}
