/// Split `text` into shell-like tokens.
///
/// Tokens are separated by unescaped whitespace. Single and double quotes group characters
/// without being included in the token, and a backslash escapes whatever character follows
/// it. An unterminated quote is treated as running to the end of the input rather than as
/// an error, matching how the run template editor behaves.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else {
                    current.push(c);
                }
            }
            None => {
                if c == '\\' {
                    in_token = true;
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                } else if c == '"' || c == '\'' {
                    in_token = true;
                    quote = Some(c);
                } else if c.is_whitespace() {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                } else {
                    in_token = true;
                    current.push(c);
                }
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

/// Wrap `token` in double quotes iff it contains whitespace.
///
/// Display only, used for echoing commands back to the user. Processes are always started
/// from an argument vector, never from a joined string.
pub fn quote_if_needed(token: &str) -> String {
    if token.chars().any(char::is_whitespace) {
        format!("\"{token}\"")
    } else {
        token.to_string()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(tokenize("run1.py --flag 2"), vec!["run1.py", "--flag", "2"]);
    }

    #[test]
    fn collapses_repeated_whitespace() {
        assert_eq!(tokenize("  a \t b  "), vec!["a", "b"]);
    }

    #[test]
    fn quotes_group_and_are_stripped() {
        assert_eq!(
            tokenize("run \"My Scenario\" 'single quoted'"),
            vec!["run", "My Scenario", "single quoted"]
        );
    }

    #[test]
    fn quoted_empty_string_is_a_token() {
        assert_eq!(tokenize("a \"\" b"), vec!["a", "", "b"]);
    }

    #[test]
    fn backslash_escapes_the_next_character() {
        assert_eq!(tokenize(r"a\ b c"), vec!["a b", "c"]);
        assert_eq!(tokenize(r#"say \"hi\""#), vec!["say", "\"hi\""]);
    }

    #[test]
    fn unterminated_quote_runs_to_end_of_input() {
        assert_eq!(tokenize("run \"left open"), vec!["run", "left open"]);
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert_eq!(tokenize(""), Vec::<String>::new());
        assert_eq!(tokenize("   "), Vec::<String>::new());
    }

    #[test]
    fn quote_if_needed_only_wraps_whitespace() {
        assert_eq!(quote_if_needed("plain"), "plain");
        assert_eq!(quote_if_needed("has space"), "\"has space\"");
    }

    #[test]
    fn quote_round_trips_for_plain_tokens() {
        for token in ["simple", "with space", "tab\tseparated"] {
            assert_eq!(tokenize(&quote_if_needed(token)), vec![token]);
        }
    }
}
