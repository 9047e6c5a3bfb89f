// Cheap content-quality heuristic for saved records. Not a relevance
// signal (that is the scorer's job): this estimates how usable the
// extracted text itself is.

use patchwork_common::ExtractionMethod;

/// Score extracted content in [0, 1] from length, title presence, and
/// which extraction tier produced it.
pub fn score(text: &str, has_title: bool, method: ExtractionMethod) -> f64 {
    let length_component: f64 = match text.len() {
        0..=499 => 0.1,
        500..=1_999 => 0.4,
        2_000..=9_999 => 0.7,
        _ => 0.9,
    };
    let title_component: f64 = if has_title { 0.1 } else { 0.0 };
    let method_component: f64 = match method {
        ExtractionMethod::Readability => 0.1,
        ExtractionMethod::ContentExtractor => 0.05,
        ExtractionMethod::Fallback => 0.0,
        ExtractionMethod::Insufficient => return 0.0,
    };
    (length_component + title_component + method_component).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_content_scores_zero() {
        assert_eq!(score("anything", true, ExtractionMethod::Insufficient), 0.0);
    }

    #[test]
    fn longer_readable_content_scores_higher() {
        let short = score(&"x".repeat(600), false, ExtractionMethod::Fallback);
        let long = score(&"x".repeat(20_000), true, ExtractionMethod::Readability);
        assert!(long > short);
        assert!(long <= 1.0);
    }

    #[test]
    fn title_adds_a_bump() {
        let without = score(&"x".repeat(3_000), false, ExtractionMethod::Readability);
        let with = score(&"x".repeat(3_000), true, ExtractionMethod::Readability);
        assert!(with > without);
    }
}
