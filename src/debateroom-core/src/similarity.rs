//! String similarity used by the coalescing policy.

/// Scores how alike two strings are, from 0 (nothing shared) to 100 (identical).
pub trait SimilarityScorer: Send + Sync {
    fn ratio(&self, a: &str, b: &str) -> u8;
}

/// Normalized insertion/deletion edit ratio over Unicode scalar values.
///
/// `round(100 * (|a| + |b| - indel(a, b)) / (|a| + |b|))`, which is the same as
/// `round(200 * lcs(a, b) / (|a| + |b|))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EditRatio;

impl SimilarityScorer for EditRatio {
    fn ratio(&self, a: &str, b: &str) -> u8 {
        ratio(a, b)
    }
}

/// See [`EditRatio`].
pub fn ratio(a: &str, b: &str) -> u8 {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let total = a_chars.len() + b_chars.len();

    if total == 0 {
        return 100;
    }

    let common = longest_common_subsequence(&a_chars, &b_chars);
    ((200 * common) as f64 / total as f64).round() as u8
}

fn longest_common_subsequence(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for &ca in a {
        for (j, &cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings() {
        assert_eq!(ratio("hello", "hello"), 100);
        assert_eq!(ratio("", ""), 100);
    }

    #[test]
    fn test_disjoint_strings() {
        assert_eq!(ratio("abc", "xyz"), 0);
        assert_eq!(ratio("abc", ""), 0);
    }

    #[test]
    fn test_partial_overlap() {
        // lcs("this is a test", "this is a test!") = 14, total = 29
        assert_eq!(ratio("this is a test", "this is a test!"), 97);
        // lcs("kitten", "sitting") = 4 ("ittn"), total = 13
        assert_eq!(ratio("kitten", "sitting"), 62);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        // lcs = 6 of the 7 chars on the left, 14 chars total
        assert_eq!(ratio("학교는 연구를", "학교는 연구"), 92);
        assert_eq!(ratio("학교", "학교"), 100);
    }

    #[test]
    fn test_symmetric() {
        let pairs = [("school", "scholar"), ("토론 주제", "주제 토론"), ("a", "ab")];
        for (a, b) in pairs {
            assert_eq!(ratio(a, b), ratio(b, a));
        }
    }
}
