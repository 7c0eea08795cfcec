//! Tokenisation, Vietnamese stop words and query-shape heuristics.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Function words dropped before lexical scoring.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "và", "của", "các", "là", "có", "được", "cho", "trong", "với", "này", "những", "một",
        "để", "theo", "từ", "khi", "đã", "thì", "ra", "vào", "tại", "về", "như", "nhưng",
        "cũng", "bị", "hoặc", "nếu", "mà", "đến", "gì", "nào", "thế", "ở", "lại", "sẽ",
        "rằng", "đó", "nên", "vì", "do", "trên", "dưới", "sau", "trước", "còn", "vẫn",
        "đang", "rất", "hay", "the", "a", "an", "of", "and", "or", "to", "in", "is",
    ]
    .into_iter()
    .collect()
});

/// Terms that signal a question about amounts, rates or tables.
const NUMERIC_KEYWORDS: &[&str] = &["bảng", "mức", "bao nhiêu", "số tiền", "tỷ lệ", "%"];

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").unwrap());

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// Lowercase, split on anything that is not a letter or digit, drop stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !is_stop_word(t))
        .map(str::to_string)
        .collect()
}

/// Whether a query asks for figures, in which case table chunks are favoured.
pub fn is_numeric_query(query: &str) -> bool {
    if DIGITS.is_match(query) {
        return true;
    }
    let lower = query.to_lowercase();
    NUMERIC_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_stop_words_and_punctuation() {
        let tokens = tokenize("Học phí của các ngành, năm 2024?");
        assert_eq!(tokens, vec!["học", "phí", "ngành", "năm", "2024"]);
    }

    #[test]
    fn test_numeric_query() {
        assert!(is_numeric_query("Mức học phí ngành CNTT"));
        assert!(is_numeric_query("điều 12"));
        assert!(is_numeric_query("tăng 5%"));
        assert!(!is_numeric_query("quy trình xin nghỉ phép"));
    }
}
