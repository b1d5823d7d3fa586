//! Rule-based sentence segmentation and tokenization
//!
//! Sentences end at `.`, `!` or `?` followed by whitespace (or end of text),
//! and at every newline. Tokens are runs of alphanumeric chars or single
//! punctuation marks. All offsets are chars.

use super::{Sentence, Token, Tokenizer};

/// Default tokenizer
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTokenizer;

impl RuleTokenizer {
    pub fn new() -> Self {
        Self
    }

    fn build_sentence(&self, text: &str, start: Boundary, end: Boundary) -> Option<Sentence> {
        let raw = text.get(start.byte..end.byte)?;
        let trimmed = raw.trim_end();
        if trimmed.is_empty() {
            return None;
        }
        Some(Sentence {
            text: trimmed.to_string(),
            offset: start.char,
            tokens: self.tokenize(trimmed),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Boundary {
    char: usize,
    byte: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

impl Tokenizer for RuleTokenizer {
    fn segment(&self, text: &str) -> Vec<Sentence> {
        let mut sentences = Vec::new();
        let mut start: Option<Boundary> = None;
        let mut chars = text.char_indices().enumerate().peekable();

        while let Some((char_pos, (byte_pos, c))) = chars.next() {
            if c == '\n' {
                if let Some(from) = start.take() {
                    let to = Boundary { char: char_pos, byte: byte_pos };
                    sentences.extend(self.build_sentence(text, from, to));
                }
                continue;
            }

            if start.is_none() {
                if c.is_whitespace() {
                    continue;
                }
                start = Some(Boundary { char: char_pos, byte: byte_pos });
            }

            if matches!(c, '.' | '!' | '?') {
                let at_break = chars.peek().map_or(true, |(_, (_, next))| next.is_whitespace());
                if at_break {
                    if let Some(from) = start.take() {
                        let to = Boundary {
                            char: char_pos + 1,
                            byte: byte_pos + c.len_utf8(),
                        };
                        sentences.extend(self.build_sentence(text, from, to));
                    }
                }
            }
        }

        if let Some(from) = start {
            let to = Boundary {
                char: text.chars().count(),
                byte: text.len(),
            };
            sentences.extend(self.build_sentence(text, from, to));
        }

        sentences
    }

    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut word: Option<(usize, String)> = None;

        for (pos, c) in text.chars().enumerate() {
            if is_word_char(c) {
                word.get_or_insert_with(|| (pos, String::new())).1.push(c);
                continue;
            }

            if let Some((start, word_text)) = word.take() {
                tokens.push(Token {
                    text: word_text,
                    start,
                    end: pos,
                });
            }
            if !c.is_whitespace() {
                tokens.push(Token {
                    text: c.to_string(),
                    start: pos,
                    end: pos + 1,
                });
            }
        }

        if let Some((start, word_text)) = word {
            let end = start + word_text.chars().count();
            tokens.push(Token {
                text: word_text,
                start,
                end,
            });
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sentences: &[Sentence]) -> Vec<&str> {
        sentences.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_segment_on_terminal_punctuation() {
        let text = "Pierre Dupont est ingénieur. Il habite au 77 boulevard Saint-Germain à Paris";
        let sentences = RuleTokenizer.segment(text);

        assert_eq!(
            texts(&sentences),
            vec![
                "Pierre Dupont est ingénieur.",
                "Il habite au 77 boulevard Saint-Germain à Paris"
            ]
        );
        assert_eq!(sentences[0].offset, 0);
        assert_eq!(sentences[1].offset, 29);
    }

    #[test]
    fn test_segment_on_newlines_and_skips_blank_lines() {
        let sentences = RuleTokenizer.segment("COUR D'APPEL\n\n  ARRÊT du 12 mars\nFin");
        assert_eq!(texts(&sentences), vec!["COUR D'APPEL", "ARRÊT du 12 mars", "Fin"]);
        assert_eq!(sentences[1].offset, 16);
    }

    #[test]
    fn test_inner_periods_do_not_split() {
        let sentences = RuleTokenizer.segment("La S.A.R.L. LE BON BURGER est là. Fin.");
        assert_eq!(
            texts(&sentences),
            vec!["La S.A.R.L.", "LE BON BURGER est là.", "Fin."]
        );
    }

    #[test]
    fn test_tokenize_words_and_punctuation() {
        let tokens = RuleTokenizer.tokenize("Saint-Germain, n°12");
        let words: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();

        assert_eq!(words, vec!["Saint", "-", "Germain", ",", "n", "°", "12"]);
        assert_eq!((tokens[2].start, tokens[2].end), (6, 13));
        assert_eq!((tokens[6].start, tokens[6].end), (17, 19));
    }

    #[test]
    fn test_tokenize_offsets_are_chars() {
        let tokens = RuleTokenizer.tokenize("était à Nîmes");
        assert_eq!(tokens[2].text, "Nîmes");
        assert_eq!((tokens[2].start, tokens[2].end), (8, 13));
    }
}
