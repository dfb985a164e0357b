use super::lines::parse_amount;
use super::{PriceExtraction, is_positive};
use regex::Regex;
use std::sync::LazyLock;

static DOLLAR_AMOUNT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\s*([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{2})?)").unwrap());

/// Collect every `$` amount in order; totals are left unrounded.
pub fn extract(text: &str) -> PriceExtraction {
    if text.is_empty() {
        return PriceExtraction::default();
    }

    let prices: Vec<f64> = DOLLAR_AMOUNT
        .captures_iter(text)
        .map(|c| parse_amount(&c[1]))
        .filter(|&p| is_positive(p))
        .collect();

    PriceExtraction {
        total: prices.iter().fold(0.0, |acc, p| acc + p),
        has_labor: text.to_lowercase().contains("labor"),
        prices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_inline_amounts() {
        let found = extract("Parts: $50.00, $25.50 Labor charge");
        assert_eq!(found.prices, vec![50.0, 25.5]);
        assert_eq!(found.total, 75.5);
        assert!(found.has_labor);
    }

    #[test]
    fn empty_notes() {
        assert_eq!(extract(""), PriceExtraction::default());
    }

    #[test]
    fn no_amounts_total_is_positive_zero() {
        let found = extract("just a note, labor done");
        assert!(found.prices.is_empty());
        assert!(found.total.is_sign_positive());
        assert!(found.has_labor);
        assert_eq!(
            serde_json::to_string(&found).unwrap(),
            r#"{"prices":[],"total":0.0,"hasLabor":true}"#
        );
    }

    #[test]
    fn skips_zero_and_keeps_order() {
        let found = extract("$0.00 credit, then $ 1,200 and $3.10");
        assert_eq!(found.prices, vec![1200.0, 3.1]);
        assert!(!found.has_labor);
    }

    #[test]
    fn labor_match_is_case_insensitive() {
        assert!(extract("LABOR only").has_labor);
        assert!(extract("laboratory test").has_labor);
    }
}
