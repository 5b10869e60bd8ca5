//! Word tokenization shared by indexing and queries.

use std::collections::HashSet;
use std::sync::OnceLock;

const STOP_WORDS: &[&str] = &[
    // English
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "did", "do", "does", "for",
    "from", "had", "has", "have", "how", "if", "in", "into", "is", "it", "its", "not", "of", "on",
    "or", "so", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "to", "was", "we", "were", "what", "when", "where", "which", "who", "why", "will", "with",
    "you", "your",
    // Russian
    "и", "в", "во", "не", "что", "он", "на", "я", "с", "со", "как", "а", "то", "все", "она",
    "так", "его", "но", "да", "ты", "к", "у", "же", "вы", "за", "бы", "по", "только", "ее",
    "мне", "было", "вот", "от", "меня", "еще", "нет", "о", "из", "ему", "теперь", "когда",
    "даже", "ну", "ли", "если", "уже", "или", "ни", "быть", "был", "него", "до", "вас", "нибудь",
    "опять", "уж", "вам", "ведь", "там", "потом", "себя", "ничего", "ей", "может", "они", "тут",
    "где", "есть", "надо", "ней", "для", "мы", "тебя", "их", "чем", "была", "сам", "чтоб", "без",
    "будто", "чего", "раз", "тоже", "себе", "под", "будет", "ж", "тогда", "кто", "этот", "того",
    "потому", "этого", "какой", "совсем", "ним", "здесь", "этом", "один", "почти", "мой", "тем",
    "чтобы", "нее", "были", "куда", "зачем", "всех", "можно", "при", "об", "это",
];

fn stop_words() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| STOP_WORDS.iter().copied().collect())
}

/// Split text into lower-cased alphanumeric terms.
///
/// Stop words and single letters are dropped; single digits are kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let stop = stop_words();
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(|word| word.trim_matches('_'))
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| {
            let mut chars = word.chars();
            let short = chars.next().is_some() && chars.next().is_none();
            let numeric = word.chars().all(|c| c.is_numeric());
            (!short || numeric) && !stop.contains(word.as_str())
        })
        .collect()
}

/// Distinct query terms in first-seen order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(
            tokenize("The Quick brown-fox, jumps!"),
            vec!["quick", "brown", "fox", "jumps"]
        );
    }

    #[test]
    fn test_tokenize_drops_stop_words_in_both_languages() {
        assert_eq!(tokenize("Как настроить VPN для офиса"), vec!["настроить", "vpn", "офиса"]);
        assert_eq!(tokenize("what is the deadline"), vec!["deadline"]);
    }

    #[test]
    fn test_tokenize_keeps_digits_and_identifiers() {
        assert_eq!(tokenize("step 2 of max_retry x"), vec!["step", "2", "max_retry"]);
    }

    #[test]
    fn test_query_terms_dedupes() {
        assert_eq!(query_terms("Invoice invoice INVOICE total"), vec!["invoice", "total"]);
    }
}
