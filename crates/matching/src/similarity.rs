const HONORIFICS: &[&str] = &["mr", "mrs", "miss", "ms", "dr", "prof"];

/// Lower-cased alphanumeric words with honorifics dropped.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|w| !HONORIFICS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Similarity of two person names in [0.0, 1.0].
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_name(a);
    let b = normalize_name(b);

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    gestalt_ratio(&a, &b)
}

/// Ratcliff/Obershelp ratio `2·M / (|a| + |b|)`, where `M` counts characters
/// in recursively found longest common substrings.
pub fn gestalt_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    (2 * matching_chars(&a, &b)) as f32 / total as f32
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let (i, j, len) = longest_common_substring(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..i], &b[..j]) + matching_chars(&a[i + len..], &b[j + len..])
}

/// Returns `(start_in_a, start_in_b, length)`; earliest match wins ties.
fn longest_common_substring(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut best = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] { prev[j - 1] + 1 } else { 0 };
            if curr[j] > best.2 {
                best = (i - curr[j], j - curr[j], curr[j]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    best
}
