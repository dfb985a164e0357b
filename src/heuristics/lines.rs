use regex::Regex;
use std::sync::LazyLock;

static INVOICE_NO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Invoice\s*#?\s*([0-9]+)").unwrap());

static INVOICE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^Invoice\s*#?\s*[0-9]+").unwrap());

// "$1,234.56", "$ 150", "$148.64"
static PRICE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\s*([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{2})?)$").unwrap());

static QTY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]+(?:\.[0-9]+)?)$").unwrap());

static PART_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^part\s*#?\s*([A-Z0-9\-_,\s]+)$").unwrap());

/// Column headers and labels that vendor screens paste along with the data.
const NOISE: &[&str] = &["Instructions:", "NAME", "QTY", "PRICE", "TAX"];

/// What a single cleaned line of office notes looks like.
#[derive(Debug, Clone, PartialEq)]
pub enum Line<'a> {
    Invoice,
    Noise,
    Labor,
    Price(f64),
    Quantity(f64),
    PartNumber(&'a str),
    Description(&'a str),
    Other,
}

/// Whitespace plus the byte-order mark pasted text often starts with.
fn is_blank(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

/// Split on runs of newlines, carriage returns and tabs; tabs separate
/// spreadsheet columns, so each cell is its own line.
pub fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split(['\n', '\r', '\t'])
        .map(|line| line.trim_matches(is_blank))
        .filter(|line| !line.is_empty())
}

/// First `Invoice #<digits>` anywhere in the raw notes.
pub fn invoice_number(text: &str) -> Option<String> {
    INVOICE_NO.captures(text).map(|c| c[1].to_string())
}

/// Comma-stripped decimal; `0.0` when the digits overflow into garbage.
pub fn parse_amount(raw: &str) -> f64 {
    raw.replace(',', "").parse::<f64>().unwrap_or(0.0)
}

/// Classify a trimmed line. Rules are tried in priority order.
pub fn classify(line: &str) -> Line<'_> {
    if line.is_empty() {
        return Line::Noise;
    }
    if INVOICE_LINE.is_match(line) {
        return Line::Invoice;
    }
    if NOISE.iter().any(|n| n.eq_ignore_ascii_case(line)) {
        return Line::Noise;
    }
    if line.eq_ignore_ascii_case("labor") {
        return Line::Labor;
    }
    if let Some(cap) = PRICE_LINE.captures(line) {
        return Line::Price(parse_amount(&cap[1]));
    }
    if let Some(cap) = QTY_LINE.captures(line) {
        return Line::Quantity(parse_amount(&cap[1]));
    }
    if let Some(part) = PART_LINE.captures(line).and_then(|c| c.get(1)) {
        return Line::PartNumber(part.as_str().trim());
    }
    // Length in UTF-16 units.
    if line.encode_utf16().count() > 3 && !line.starts_with('$') {
        return Line::Description(line);
    }
    Line::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tabs_are_line_breaks() {
        let lines: Vec<_> = split_lines("a\tb\r\n\n  c  \t\t").collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn byte_order_mark_is_trimmed() {
        let lines: Vec<_> = split_lines("\u{feff}Labor\n$60.00 \u{feff}").collect();
        assert_eq!(lines, vec!["Labor", "$60.00"]);
        assert_eq!(classify(lines[0]), Line::Labor);
    }

    #[test]
    fn length_counts_utf16_units() {
        // two astral chars are four UTF-16 units
        assert_eq!(classify("🔧🔧"), Line::Description("🔧🔧"));
        assert_eq!(classify("Öl"), Line::Other);
    }

    #[test]
    fn classifies_prices_with_thousands() {
        assert_eq!(classify("$1,234.56"), Line::Price(1234.56));
        assert_eq!(classify("$ 150"), Line::Price(150.0));
        // three decimals is not a price
        assert_eq!(classify("$1.234"), Line::Other);
    }

    #[test]
    fn bare_numbers_are_quantities() {
        assert_eq!(classify("2"), Line::Quantity(2.0));
        assert_eq!(classify("0.5"), Line::Quantity(0.5));
        assert_eq!(classify("148.64"), Line::Quantity(148.64));
    }

    #[test]
    fn noise_is_exact_and_case_insensitive() {
        assert_eq!(classify("qty"), Line::Noise);
        assert_eq!(classify("instructions:"), Line::Noise);
        assert_eq!(
            classify("Instructions: replace pump"),
            Line::Description("Instructions: replace pump")
        );
    }

    #[test]
    fn part_number_capture_is_trimmed() {
        assert_eq!(
            classify("part #PEN273564Z, PAC-051-0319"),
            Line::PartNumber("PEN273564Z, PAC-051-0319")
        );
        assert_eq!(classify("Part# abc_12 "), Line::PartNumber("abc_12"));
    }

    #[test]
    fn short_and_invoice_lines() {
        assert_eq!(classify("ok"), Line::Other);
        assert_eq!(classify("Invoice #54253"), Line::Invoice);
        assert_eq!(classify("LABOR"), Line::Labor);
    }

    #[test]
    fn invoice_number_found_anywhere() {
        assert_eq!(
            invoice_number("see invoice # 771 attached"),
            Some("771".to_string())
        );
        assert_eq!(invoice_number("no number here"), None);
    }
}
