//! Topical categorisation of converted documents.
//!
//! [`categorize`] is a pure function of its three inputs: filename, content
//! sample and [`CategorizerConfig`]. Each category scores
//! `filename_hits × filename_weight + content_hits × content_weight`, where a
//! hit is a case-insensitive substring occurrence of one of its keywords, so
//! `convex` also counts inside `nonconvex` and `convexity`.
//!
//! Abbreviations such as `opt` or `ml` would match inside far too many words
//! that way. They live in a separate `filename_abbreviations` table, are
//! matched against the filename only, and only as whole words (`opt_intro.pdf`
//! yes, `adopt.pdf` no), each hit weighing `filename_weight`.
//!
//! The highest non-zero score wins, ties go to the category declared first
//! (keywords table order, then abbreviation-only categories), and a document
//! with no hits at all is `uncategorized`.

use crate::config::CategorizerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topical bucket; also the name of the chapter subdirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Optimization,
    Statistics,
    MachineLearning,
    Uncategorized,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::Optimization,
        Category::Statistics,
        Category::MachineLearning,
        Category::Uncategorized,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Optimization => "optimization",
            Category::Statistics => "statistics",
            Category::MachineLearning => "machine_learning",
            Category::Uncategorized => "uncategorized",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assign a category from filename and the leading content of a document.
pub fn categorize(filename: &str, content: &str, config: &CategorizerConfig) -> Category {
    let name = normalise_filename(filename);
    let sample = content_sample(content, config.content_sample_chars).to_lowercase();
    let filename_weight = u64::from(config.filename_weight);
    let content_weight = u64::from(config.content_weight);

    let mut scores: Vec<(Category, u64)> = Vec::new();
    for (category, keywords) in config.keywords.iter() {
        let score: u64 = normalised(keywords)
            .map(|k| {
                count_substring(&name, &k) * filename_weight
                    + count_substring(&sample, &k) * content_weight
            })
            .sum();
        add_score(&mut scores, category, score);
    }
    for (category, abbreviations) in config.filename_abbreviations.iter() {
        let score: u64 = normalised(abbreviations)
            .map(|a| count_word(&name, &a) * filename_weight)
            .sum();
        add_score(&mut scores, category, score);
    }

    let mut best = Category::Uncategorized;
    let mut best_score = 0u64;
    for (category, score) in scores {
        // Strictly greater: an equal score never displaces an earlier category.
        if score > best_score {
            best = category;
            best_score = score;
        }
    }
    best
}

fn normalised(keywords: &[String]) -> impl Iterator<Item = String> + '_ {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
}

fn add_score(scores: &mut Vec<(Category, u64)>, category: Category, score: u64) {
    match scores.iter_mut().find(|(c, _)| *c == category) {
        Some((_, total)) => *total += score,
        None => scores.push((category, score)),
    }
}

/// Lowercase a filename and turn word separators into spaces so
/// `opt_intro.pdf` yields the words `opt intro pdf`.
fn normalise_filename(filename: &str) -> String {
    filename
        .to_lowercase()
        .chars()
        .map(|c| if matches!(c, '_' | '-' | '.') { ' ' } else { c })
        .collect()
}

/// First `max_chars` characters of `content`, cut on a char boundary.
fn content_sample(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &content[..byte_idx],
        None => content,
    }
}

/// Count non-overlapping occurrences of `needle` anywhere in `haystack`.
fn count_substring(haystack: &str, needle: &str) -> u64 {
    haystack.matches(needle).count() as u64
}

/// Count non-overlapping occurrences of `word` in `haystack` that are not
/// embedded in a longer alphanumeric run.
fn count_word(haystack: &str, word: &str) -> u64 {
    haystack
        .match_indices(word)
        .filter(|(start, _)| {
            let end = start + word.len();
            let before = haystack[..*start].chars().next_back();
            let after = haystack[end..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryKeywords;

    fn config(keywords: CategoryKeywords) -> CategorizerConfig {
        CategorizerConfig {
            keywords,
            filename_abbreviations: CategoryKeywords::new(),
            ..CategorizerConfig::default()
        }
    }

    #[test]
    fn filename_keyword_wins() {
        let cfg = CategorizerConfig::default();
        assert_eq!(categorize("opt_intro.pdf", "", &cfg), Category::Optimization);
        assert_eq!(categorize("stats_basics.pdf", "", &cfg), Category::Statistics);
        assert_eq!(
            categorize("intro-to-machine-learning.pdf", "", &cfg),
            Category::MachineLearning
        );
    }

    #[test]
    fn no_hits_is_uncategorized() {
        let cfg = CategorizerConfig::default();
        assert_eq!(
            categorize("poems.pdf", "Roses are red.", &cfg),
            Category::Uncategorized
        );
    }

    #[test]
    fn content_counts_when_filename_is_silent() {
        let cfg = CategorizerConfig::default();
        let content = "We study Bayesian regression and the variance of an estimator.";
        assert_eq!(categorize("chapter3.pdf", content, &cfg), Category::Statistics);
    }

    #[test]
    fn filename_outweighs_single_content_hit() {
        let keywords = CategoryKeywords::new()
            .with(Category::Optimization, &["convex"])
            .with(Category::Statistics, &["regression"]);
        let cfg = config(keywords);
        // filename: 1 × 3 = 3 for optimization; content: 2 × 1 = 2 for statistics
        assert_eq!(
            categorize("convex.pdf", "regression regression", &cfg),
            Category::Optimization
        );
    }

    #[test]
    fn tie_goes_to_first_declared() {
        let keywords = CategoryKeywords::new()
            .with(Category::Statistics, &["model"])
            .with(Category::MachineLearning, &["model"]);
        assert_eq!(
            categorize("x.pdf", "a model", &config(keywords)),
            Category::Statistics
        );

        let reversed = CategoryKeywords::new()
            .with(Category::MachineLearning, &["model"])
            .with(Category::Statistics, &["model"]);
        assert_eq!(
            categorize("x.pdf", "a model", &config(reversed)),
            Category::MachineLearning
        );
    }

    #[test]
    fn keywords_match_inside_longer_words() {
        let cfg = CategorizerConfig::default();
        assert_eq!(
            categorize(
                "nonconvex_programs.pdf",
                "convexity of sets and probabilistic models",
                &cfg
            ),
            Category::Optimization
        );
        let keywords = CategoryKeywords::new().with(Category::Statistics, &["Regression"]);
        assert_eq!(
            categorize("x.pdf", "REGRESSIONS everywhere", &config(keywords)),
            Category::Statistics
        );
    }

    #[test]
    fn abbreviations_are_whole_word_and_filename_only() {
        let cfg = CategorizerConfig::default();
        assert_eq!(categorize("opt_intro.pdf", "", &cfg), Category::Optimization);
        assert_eq!(categorize("ml-notes.pdf", "", &cfg), Category::MachineLearning);
        assert_eq!(categorize("adopt.pdf", "", &cfg), Category::Uncategorized);
        assert_eq!(categorize("html.pdf", "", &cfg), Category::Uncategorized);
        // never counted in content
        assert_eq!(
            categorize("notes.pdf", "opt stats ml", &cfg),
            Category::Uncategorized
        );
    }

    #[test]
    fn abbreviation_and_keyword_scores_add_up() {
        let cfg = CategorizerConfig {
            keywords: CategoryKeywords::new().with(Category::Statistics, &["regression"]),
            filename_abbreviations: CategoryKeywords::new()
                .with(Category::Optimization, &["opt"]),
            ..CategorizerConfig::default()
        };
        // optimization: 1 × 3 = 3; statistics: 4 × 1 = 4
        let content = "regression ".repeat(4);
        assert_eq!(categorize("opt.pdf", &content, &cfg), Category::Statistics);
        // tie (3 vs 3): statistics is declared first
        let content = "regression ".repeat(3);
        assert_eq!(categorize("opt.pdf", &content, &cfg), Category::Statistics);
        let content = "regression ".repeat(2);
        assert_eq!(categorize("opt.pdf", &content, &cfg), Category::Optimization);
    }

    #[test]
    fn multi_word_keyword_matches() {
        let cfg = CategorizerConfig::default();
        assert_eq!(
            categorize("ch1.pdf", "Minimise the objective function subject to", &cfg),
            Category::Optimization
        );
    }

    #[test]
    fn content_beyond_sample_is_ignored() {
        let mut cfg = CategorizerConfig::default();
        cfg.content_sample_chars = 10;
        let content = format!("{}statistics", "x ".repeat(20));
        assert_eq!(categorize("a.pdf", &content, &cfg), Category::Uncategorized);
    }

    #[test]
    fn sample_cut_respects_char_boundaries() {
        assert_eq!(content_sample("∑∑∑", 2), "∑∑");
        assert_eq!(content_sample("ab", 10), "ab");
    }

    #[test]
    fn same_inputs_same_category() {
        let cfg = CategorizerConfig::default();
        let content = "convex sets and probability";
        let first = categorize("notes.pdf", content, &cfg);
        for _ in 0..10 {
            assert_eq!(categorize("notes.pdf", content, &cfg), first);
        }
    }

    #[test]
    fn empty_keyword_table_is_uncategorized() {
        let cfg = config(CategoryKeywords::new());
        assert_eq!(
            categorize("optimization.pdf", "optimization", &cfg),
            Category::Uncategorized
        );
    }
}
