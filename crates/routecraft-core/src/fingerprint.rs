//! Prompt fingerprinting -- a cheap, deterministic digest used as the
//! cache key and as the handle the adaptive weight manager and score
//! cache use to recognize "the same kind of request" across calls.
//!
//! A fingerprint is not a hash of the raw bytes: near-duplicate prompts
//! (same shape, different literal numbers or nouns) should land on the
//! same fingerprint so the cache actually helps. See
//! [`fingerprints_similar`] for the approximate-match predicate used
//! where exact fingerprint equality is too strict.

use std::sync::LazyLock;

use regex::Regex;

/// Coarse content tags attached to a fingerprint, used by the classifier
/// as cheap pre-computed hints rather than re-scanning the prompt per
/// dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureTag {
    Code,
    Reasoning,
    MultiStep,
    Short,
    Medium,
    Long,
    XLong,
}

/// A fingerprint computed from a single prompt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Normalized, truncated digest used as a cache/history key.
    pub digest: String,
    /// Tags detected during normalization, cheap to recompute but cached
    /// here so downstream dimensions don't redo the scan.
    pub tags: Vec<FeatureTag>,
    /// Word count of the original (non-truncated) prompt.
    pub word_count: u32,
}

const MAX_DIGEST_LEN: usize = 150;
const HEAD_LEN: usize = 100;
const TAIL_LEN: usize = 50;

static CODE_FENCE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```|`[^`]+`").unwrap());
static MULTI_STEP: LazyLock<[Regex; 7]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)\bstep\s*\d+\b").unwrap(),
        Regex::new(r"(?i)\bfirst\b.*\bthen\b").unwrap(),
        Regex::new(r"(?i)\bfinally\b").unwrap(),
        Regex::new(r"(?i)\d+\.\s").unwrap(),
        Regex::new(r"(?i)\bafter that\b").unwrap(),
        Regex::new(r"第[一二三四五六七八九十\d]+步").unwrap(),
        Regex::new(r"然后|接着|最后").unwrap(),
    ]
});
static REASONING_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(analyze|design|architect|explain|compare|prove|derive)\b").unwrap()
});

/// Collapse runs of whitespace, unify quote characters, and fold common
/// CJK punctuation to its ASCII equivalent so trivially-different prompts
/// (extra spaces, curly vs straight quotes) fingerprint identically.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        let mapped = match ch {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{FF0C}' => ',',
            '\u{3002}' => '.',
            '\u{FF1F}' => '?',
            '\u{FF01}' => '!',
            c if c.is_whitespace() => ' ',
            c => c,
        };
        if mapped == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(mapped);
    }
    out.trim().to_lowercase()
}

/// Truncate a normalized string to a head+tail digest once it exceeds
/// [`MAX_DIGEST_LEN`] characters, so very long prompts still collapse to a
/// bounded-size cache key while keeping enough of both ends to
/// disambiguate.
fn truncate_digest(normalized: &str) -> String {
    let chars: Vec<char> = normalized.chars().collect();
    if chars.len() <= MAX_DIGEST_LEN {
        return normalized.to_string();
    }
    let head: String = chars[..HEAD_LEN].iter().collect();
    let tail: String = chars[chars.len() - TAIL_LEN..].iter().collect();
    format!("{head}...{tail}")
}

/// Compute the fingerprint for a prompt (and an optional system prompt,
/// which contributes tags but not to the digest itself).
pub fn compute(prompt: &str, system_prompt: Option<&str>) -> Fingerprint {
    let normalized = normalize(prompt);
    let digest = truncate_digest(&normalized);
    let word_count = prompt.split_whitespace().count() as u32;

    let mut tags = Vec::new();
    let combined_for_tags = match system_prompt {
        Some(sys) => format!("{prompt}\n{sys}"),
        None => prompt.to_string(),
    };

    if CODE_FENCE.is_match(&combined_for_tags) {
        tags.push(FeatureTag::Code);
    }
    if REASONING_WORD.is_match(prompt) {
        tags.push(FeatureTag::Reasoning);
    }
    if MULTI_STEP.iter().any(|re| re.is_match(prompt)) {
        tags.push(FeatureTag::MultiStep);
    }

    tags.push(match word_count {
        0..=20 => FeatureTag::Short,
        21..=80 => FeatureTag::Medium,
        81..=250 => FeatureTag::Long,
        _ => FeatureTag::XLong,
    });

    Fingerprint { digest, tags, word_count }
}

/// Whether any of the seven multi-step regexes (EN+CJK numbering, "step N",
/// "first ... then", "finally", "after that", "第N步", "然后/接着/最后")
/// match `text`. Exposed separately from [`compute`]'s `MultiStep` tag
/// because the classifier's `multi_step_patterns` dimension scans
/// `system + " " + prompt`, not the prompt alone.
pub fn matches_multi_step(text: &str) -> bool {
    MULTI_STEP.iter().any(|re| re.is_match(text))
}

/// Approximate similarity between two fingerprints: same length bucket,
/// same code/reasoning/multi-step tags, and digests that share a long
/// enough prefix. Used where exact digest equality is too strict (e.g.
/// deciding whether a cached score is still representative of a
/// near-duplicate follow-up prompt).
pub fn fingerprints_similar(a: &Fingerprint, b: &Fingerprint) -> bool {
    if a.tags != b.tags {
        return false;
    }
    let shared_prefix = a
        .digest
        .chars()
        .zip(b.digest.chars())
        .take_while(|(x, y)| x == y)
        .count();
    let shorter = a.digest.chars().count().min(b.digest.chars().count());
    if shorter == 0 {
        return a.digest == b.digest;
    }
    (shared_prefix as f64 / shorter as f64) >= 0.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_quotes() {
        let fp = compute("Hello   \u{201C}world\u{201D}  ", None);
        assert_eq!(fp.digest, "hello \"world\"");
    }

    #[test]
    fn long_prompt_truncates_to_head_and_tail() {
        let long_prompt = "a ".repeat(200);
        let fp = compute(&long_prompt, None);
        assert!(fp.digest.contains("..."));
        assert!(fp.digest.len() < long_prompt.len());
    }

    #[test]
    fn code_fence_sets_code_tag() {
        let fp = compute("please review ```fn main() {}```", None);
        assert!(fp.tags.contains(&FeatureTag::Code));
    }

    #[test]
    fn reasoning_word_sets_reasoning_tag() {
        let fp = compute("analyze the trade-offs here", None);
        assert!(fp.tags.contains(&FeatureTag::Reasoning));
    }

    #[test]
    fn multi_step_pattern_sets_tag() {
        let fp = compute("first do X, then do Y, finally do Z", None);
        assert!(fp.tags.contains(&FeatureTag::MultiStep));
    }

    #[test]
    fn cjk_multi_step_pattern_detected() {
        let fp = compute("第一步分析需求,然后实现代码", None);
        assert!(fp.tags.contains(&FeatureTag::MultiStep));
    }

    #[test]
    fn word_count_buckets_into_length_tag() {
        let short = compute("hi there", None);
        assert!(short.tags.contains(&FeatureTag::Short));

        let long_prompt = "word ".repeat(300);
        let long = compute(&long_prompt, None);
        assert!(long.tags.contains(&FeatureTag::XLong));
    }

    #[test]
    fn similar_prompts_with_different_numbers_match() {
        let a = compute("deploy service to region us-east-1 with 4 replicas", None);
        let b = compute("deploy service to region us-east-1 with 8 replicas", None);
        assert!(fingerprints_similar(&a, &b));
    }

    #[test]
    fn different_tag_sets_are_not_similar() {
        let a = compute("what is the capital of france", None);
        let b = compute("analyze this algorithm step by step, then prove it", None);
        assert!(!fingerprints_similar(&a, &b));
    }
}
