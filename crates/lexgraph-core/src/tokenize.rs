//! Raw text to token sequences.

/// Splits raw text into tokens.
///
/// Implemented for any `Fn(&str) -> Vec<String>`, so ad-hoc tokenizers can
/// be passed as closures.
pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<String>,
{
    fn tokenize(&self, text: &str) -> Vec<String> {
        self(text)
    }
}

/// Word tokenizer that separates punctuation from words.
///
/// Runs of alphanumeric characters form one token, with a single inner
/// apostrophe, hyphen or period allowed between alphanumerics ("don't",
/// "state-of-the-art", "3.14"). Every other non-whitespace character is a
/// token of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let mut tokens = Vec::new();
        let mut current = String::new();

        for (i, &c) in chars.iter().enumerate() {
            if c.is_alphanumeric() || c == '_' {
                current.push(c);
                continue;
            }
            let joins = matches!(c, '\'' | '-' | '.')
                && !current.is_empty()
                && chars.get(i + 1).is_some_and(|n| n.is_alphanumeric());
            if joins {
                current.push(c);
                continue;
            }
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            if !c.is_whitespace() {
                tokens.push(c.to_string());
            }
        }
        if !current.is_empty() {
            tokens.push(current);
        }
        tokens
    }
}

/// Splits on whitespace only.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}
