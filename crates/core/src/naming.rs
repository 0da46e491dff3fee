//! Output naming convention engine.
//!
//! Generates deterministic, filesystem-safe names for generated artifacts:
//!
//! - output directory: `{YYYY-MM-DD}-{prompt file slug}`
//! - output file stem: `{subject slug}-{style slug}`
//! - collision variant: `{stem}-2`, `{stem}-3`, ...
//!
//! # Examples
//!
//! ```
//! use artgen_core::naming::{output_stem, slugify, with_collision_suffix};
//!
//! assert_eq!(slugify("A Cat, in the Hat!"), "a-cat-in-the-hat");
//! assert_eq!(output_stem("a cat", "by Artist 2"), "a-cat-by-artist");
//! assert_eq!(with_collision_suffix("a-cat", 3), "a-cat-3");
//! ```

use std::path::Path;
use std::sync::LazyLock;

use chrono::NaiveDate;
use unicode_normalization::UnicodeNormalization;

/// Maximum length of any slug, and of the combined subject+style stem.
pub const MAX_NAME_LEN: usize = 180;

/// Stem used when both subject and style slug to nothing.
pub const FALLBACK_STEM: &str = "image";

static NON_WORD_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[^\w\s-]").expect("valid regex"));

static SEPARATOR_RUN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[-\s]+").expect("valid regex"));

/// Weights (`:0.5`) and bare numbers carry no meaning in a file name.
static NUMERIC_TOKEN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r":[-+]?\d*\.?\d+|[-+]?\d+").expect("valid regex"));

/// Convert arbitrary text into a lowercase, hyphen-separated ASCII slug.
///
/// Accented characters are folded to their ASCII base; anything that is not
/// a word character, whitespace or hyphen is dropped; runs of whitespace and
/// hyphens collapse to one hyphen. The result is at most [`MAX_NAME_LEN`]
/// characters and `slugify(slugify(x)) == slugify(x)`.
pub fn slugify(text: &str) -> String {
    let ascii: String = text.nfkd().filter(char::is_ascii).collect();
    let lowered = ascii.to_lowercase();
    let stripped = NON_WORD_RE.replace_all(&lowered, "");
    let collapsed = SEPARATOR_RUN_RE.replace_all(&stripped, "-");
    let trimmed = collapsed.trim_matches(|c| c == '-' || c == '_');
    truncate_slug(trimmed, MAX_NAME_LEN)
}

/// Truncate an ASCII slug to `max` bytes without leaving a trailing
/// separator.
fn truncate_slug(slug: &str, max: usize) -> String {
    let cut = if slug.len() > max { &slug[..max] } else { slug };
    cut.trim_end_matches(|c| c == '-' || c == '_').to_string()
}

/// Slug for use inside a file name, with numeric tokens removed.
pub fn name_fragment(text: &str) -> String {
    let slug = slugify(text);
    let without_numbers = NUMERIC_TOKEN_RE.replace_all(&slug, "");
    slugify(&without_numbers)
}

/// File stem for a subject/style pair.
///
/// The whole stem stays within [`MAX_NAME_LEN`]. The style is kept intact
/// and the subject is shortened to fit.
pub fn output_stem(subject: &str, style: &str) -> String {
    let style = name_fragment(style);
    let subject = name_fragment(subject);

    let subject_budget = if style.is_empty() {
        MAX_NAME_LEN
    } else {
        MAX_NAME_LEN.saturating_sub(style.len() + 1)
    };
    let subject = truncate_slug(&subject, subject_budget);

    match (subject.is_empty(), style.is_empty()) {
        (true, true) => FALLBACK_STEM.to_string(),
        (true, false) => style,
        (false, true) => subject,
        (false, false) => format!("{subject}-{style}"),
    }
}

/// Directory label for a prompt file: the slug of its name up to the first `.`.
pub fn dir_label(source: &Path) -> String {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = file_name.split('.').next().unwrap_or_default();
    slugify(base)
}

/// Name of the dated output directory, e.g. `2024-03-01-landscapes`.
pub fn dated_dir_name(date: NaiveDate, label: &str) -> String {
    if label.is_empty() {
        date.format("%Y-%m-%d").to_string()
    } else {
        format!("{}-{label}", date.format("%Y-%m-%d"))
    }
}

/// Stem for the `attempt`-th candidate slot: `stem`, then `stem-2`, `stem-3`...
pub fn with_collision_suffix(stem: &str, attempt: u32) -> String {
    if attempt <= 1 {
        stem.to_string()
    } else {
        format!("{stem}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  spaced   out  "), "spaced-out");
        assert_eq!(slugify("a cat's toy"), "a-cats-toy");
    }

    #[test]
    fn slug_keeps_underscores_inside() {
        assert_eq!(slugify("snake_case name"), "snake_case-name");
        assert_eq!(slugify("_edge_"), "edge");
    }

    #[test]
    fn slug_folds_accents() {
        assert_eq!(slugify("Café Crème"), "cafe-creme");
        assert_eq!(slugify("日本"), "");
    }

    #[test]
    fn slug_collapses_hyphen_runs() {
        assert_eq!(slugify("a -- b - - c"), "a-b-c");
    }

    #[test]
    fn slug_is_idempotent() {
        let long = "long words ".repeat(40);
        for text in [
            "A Cat, in the Hat!",
            "weird -_- input __",
            "Ünïcödé tëxt",
            long.as_str(),
            "-leading and trailing-",
        ] {
            let once = slugify(text);
            assert_eq!(slugify(&once), once, "input: {text:?}");
        }
    }

    #[test]
    fn slug_length_is_bounded() {
        let slug = slugify(&"abc def ".repeat(100));
        assert!(slug.len() <= MAX_NAME_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn fragment_strips_numbers_and_weights() {
        assert_eq!(name_fragment("cat:0.5 dog:2"), "cat-dog");
        // The hyphen before a number goes with it.
        assert_eq!(name_fragment("trending on artstation 4k"), "trending-on-artstationk");
        assert_eq!(name_fragment("version 2 of 3"), "version-of");
    }

    #[test]
    fn stem_joins_subject_and_style() {
        assert_eq!(output_stem("a cat", "in oil paint"), "a-cat-in-oil-paint");
    }

    #[test]
    fn stem_truncates_subject_first() {
        let subject = "s".repeat(300);
        let style = "t".repeat(100);
        let stem = output_stem(&subject, &style);
        assert!(stem.len() <= MAX_NAME_LEN);
        assert!(stem.ends_with(&style));
        assert_eq!(stem.len(), MAX_NAME_LEN);
    }

    #[test]
    fn stem_with_maximal_style_drops_subject() {
        let style = "t".repeat(400);
        let stem = output_stem("a cat", &style);
        assert_eq!(stem, "t".repeat(MAX_NAME_LEN));
    }

    #[test]
    fn stem_falls_back_when_empty() {
        assert_eq!(output_stem("!!!", "123"), FALLBACK_STEM);
        assert_eq!(output_stem("", "oil"), "oil");
    }

    #[test]
    fn label_uses_name_before_first_dot() {
        assert_eq!(dir_label(Path::new("prompts/My Prompts.v2.txt")), "my-prompts");
        assert_eq!(dir_label(Path::new("plain")), "plain");
    }

    #[test]
    fn dated_dir() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(dated_dir_name(date, "landscapes"), "2024-03-01-landscapes");
        assert_eq!(dated_dir_name(date, ""), "2024-03-01");
    }

    #[test]
    fn collision_suffixes() {
        assert_eq!(with_collision_suffix("x", 0), "x");
        assert_eq!(with_collision_suffix("x", 1), "x");
        assert_eq!(with_collision_suffix("x", 2), "x-2");
    }
}
