//! Free-text contact intake parsing.
//!
//! A contact message is a single line with a name and a phone number in any
//! order, e.g. `Ivan Petrov +41791234567` or `+7 (999) 123-45-67, Anna Muller`.
//!
//! Rules:
//! - The phone is the first run of digits, optionally led by `+`, that may
//!   contain spaces, `-`, `(` and `)` and holds at least [`MIN_PHONE_DIGITS`]
//!   digits. It is normalized to `+` (if present) followed by digits only.
//! - The name is what remains once the phone is removed: tokens containing at
//!   least one letter, with surrounding punctuation stripped. At least two
//!   tokens are required.

use crate::error::PipelineError;
use crate::models::ContactInfo;

pub const MIN_PHONE_DIGITS: usize = 7;
pub const MAX_PHONE_DIGITS: usize = 15;

pub fn parse_contact(text: &str) -> Result<ContactInfo, PipelineError> {
    let line = text.trim();
    if line.is_empty() {
        return Err(PipelineError::ParseFailed("empty message".into()));
    }

    let (start, end, phone) = find_phone(line)
        .ok_or_else(|| PipelineError::ParseFailed("no phone number found".into()))?;

    let rest = format!("{} {}", &line[..start], &line[end..]);
    let name_tokens: Vec<&str> = rest
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-' && c != '\''))
        .map(|t| t.trim_matches(|c: char| c == '-' || c == '\''))
        .filter(|t| t.chars().any(char::is_alphabetic))
        .collect();

    if name_tokens.len() < 2 {
        return Err(PipelineError::ParseFailed(
            "first and last name required".into(),
        ));
    }

    Ok(ContactInfo {
        full_name: name_tokens.join(" "),
        phone,
    })
}

/// Locate the phone span. Returns `(byte_start, byte_end, normalized)`.
fn find_phone(line: &str) -> Option<(usize, usize, String)> {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut i = 0;

    while i < chars.len() {
        let (start, c) = chars[i];
        let plus = c == '+';
        let opens = plus || c.is_ascii_digit() || c == '(';
        if !opens {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        let mut digits = String::new();
        let mut last_digit_end = start;
        if c.is_ascii_digit() {
            digits.push(c);
            last_digit_end = start + c.len_utf8();
        }
        while j < chars.len() {
            let (pos, ch) = chars[j];
            if ch.is_ascii_digit() {
                digits.push(ch);
                last_digit_end = pos + ch.len_utf8();
            } else if !matches!(ch, ' ' | '-' | '(' | ')') {
                break;
            }
            j += 1;
        }

        if digits.len() >= MIN_PHONE_DIGITS && digits.len() <= MAX_PHONE_DIGITS {
            let phone = if plus { format!("+{}", digits) } else { digits };
            return Some((start, last_digit_end, phone));
        }
        i = j.max(i + 1);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_then_phone() {
        let c = parse_contact("Ivan Petrov +41791234567").unwrap();
        assert_eq!(c.full_name, "Ivan Petrov");
        assert_eq!(c.phone, "+41791234567");
    }

    #[test]
    fn test_phone_then_name_with_separators() {
        let c = parse_contact("+7 (999) 123-45-67, Anna Muller").unwrap();
        assert_eq!(c.full_name, "Anna Muller");
        assert_eq!(c.phone, "+79991234567");
    }

    #[test]
    fn test_cyrillic_name_without_plus() {
        let c = parse_contact("Иван Петров 89991234567").unwrap();
        assert_eq!(c.full_name, "Иван Петров");
        assert_eq!(c.phone, "89991234567");
    }

    #[test]
    fn test_plain_greeting_fails() {
        let err = parse_contact("hello").unwrap_err();
        assert!(matches!(err, PipelineError::ParseFailed(_)));
    }

    #[test]
    fn test_short_number_fails() {
        assert!(parse_contact("Ivan Petrov 12345").is_err());
    }

    #[test]
    fn test_single_name_token_fails() {
        assert!(parse_contact("Ivan +41791234567").is_err());
    }

    #[test]
    fn test_year_like_numbers_do_not_count() {
        // "2024" is too short to be a phone; the real one follows.
        let c = parse_contact("Anna Muller 2024 +41791112233").unwrap();
        assert_eq!(c.phone, "+41791112233");
    }
}
