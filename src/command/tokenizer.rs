//! Quote-aware tokenizer for command message bodies (component H).

/// Strips a recognized command prefix (`!`, `/`, ...) from `body`, returning
/// the remainder, or `None` if `body` doesn't start with one.
pub fn strip_prefix<'a>(body: &'a str, prefixes: &[char]) -> Option<&'a str> {
    let mut chars = body.chars();
    let first = chars.next()?;
    prefixes.contains(&first).then(|| chars.as_str())
}

/// Splits `input` into whitespace-separated tokens, treating `"..."` and
/// `'...'` spans as single tokens. A quote with no matching close later in
/// the string is treated as a literal character rather than as punctuation.
pub fn tokenize(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let n = chars.len();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut i = 0;

    while i < n {
        let c = chars[i];
        if c == '"' || c == '\'' {
            if let Some(end) = find_matching_quote(&chars, i, c) {
                current.push_str(&chars[i + 1..end].iter().collect::<String>());
                in_token = true;
                i = end + 1;
                continue;
            }
            current.push(c);
            in_token = true;
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            if in_token {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
            i += 1;
            continue;
        }
        current.push(c);
        in_token = true;
        i += 1;
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn find_matching_quote(chars: &[char], start: usize, quote: char) -> Option<usize> {
    chars.iter().enumerate().skip(start + 1).find(|&(_, &c)| c == quote).map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_recognized_prefix() {
        assert_eq!(strip_prefix("!echo hi", &['!', '/']), Some("echo hi"));
        assert_eq!(strip_prefix("/ping", &['!', '/']), Some("ping"));
        assert_eq!(strip_prefix("hello", &['!', '/']), None);
    }

    #[test]
    fn tokenizes_quoted_spans_as_single_tokens() {
        assert_eq!(
            tokenize(r#"echo "hello world" 'and more'"#),
            vec!["echo", "hello world", "and more"]
        );
    }

    #[test]
    fn mismatched_quote_falls_through_as_literal() {
        assert_eq!(tokenize(r#"echo don't stop"#), vec!["echo", "don't", "stop"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("   ").is_empty());
    }
}
