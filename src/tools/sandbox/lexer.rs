//! Tokenizer for the sandbox language, including INDENT/DEDENT tracking.

use super::SandboxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    /// Operator or punctuation, e.g. `+`, `//`, `==`, `(`, `:`.
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Longest operators first so `**=`-style prefixes match greedily.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "+", "-", "*", "/", "%", "<",
    ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, SandboxError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut indents: Vec<usize> = vec![0];
    let mut depth: usize = 0;
    let mut line = 1;
    let mut i = 0;
    let mut at_line_start = true;

    let syntax = |message: &str, line: usize| SandboxError::Syntax {
        message: message.to_string(),
        line,
    };

    while i < chars.len() {
        if at_line_start && depth == 0 {
            let mut width = 0;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                width += if chars[i] == '\t' { 4 } else { 1 };
                i += 1;
            }
            // Blank and comment-only lines do not affect indentation.
            if i >= chars.len() || chars[i] == '\n' || chars[i] == '#' || chars[i] == '\r' {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                if i < chars.len() {
                    i += 1;
                    line += 1;
                }
                continue;
            }
            let current = *indents.last().unwrap_or(&0);
            if width > current {
                indents.push(width);
                tokens.push(Token { tok: Tok::Indent, line });
            } else {
                while width < *indents.last().unwrap_or(&0) {
                    indents.pop();
                    tokens.push(Token { tok: Tok::Dedent, line });
                }
                if width != *indents.last().unwrap_or(&0) {
                    return Err(syntax("unindent does not match any outer indentation level", line));
                }
            }
            at_line_start = false;
        }

        let c = chars[i];
        match c {
            '\n' => {
                if depth == 0 && !matches!(tokens.last().map(|t| &t.tok), Some(Tok::Newline) | None) {
                    tokens.push(Token { tok: Tok::Newline, line });
                }
                line += 1;
                i += 1;
                at_line_start = depth == 0;
            }
            ' ' | '\t' | '\r' => i += 1,
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                i += 2;
                line += 1;
            }
            '"' | '\'' => {
                let (value, consumed, lines) = read_string(&chars[i..], line)?;
                tokens.push(Token { tok: Tok::Str(value), line });
                i += consumed;
                line += lines;
            }
            c if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let (tok, consumed) = read_number(&chars[i..], line)?;
                tokens.push(Token { tok, line });
                i += consumed;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token { tok: Tok::Name(name), line });
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .copied()
                    .find(|op| rest.starts_with(op))
                    .ok_or_else(|| syntax(&format!("invalid character '{}'", c), line))?;
                match op {
                    "(" | "[" | "{" => depth += 1,
                    ")" | "]" | "}" => depth = depth.saturating_sub(1),
                    _ => {}
                }
                tokens.push(Token { tok: Tok::Op(op), line });
                i += op.chars().count();
            }
        }
    }

    if !matches!(tokens.last().map(|t| &t.tok), Some(Tok::Newline) | None) {
        tokens.push(Token { tok: Tok::Newline, line });
    }
    while indents.len() > 1 {
        indents.pop();
        tokens.push(Token { tok: Tok::Dedent, line });
    }
    tokens.push(Token { tok: Tok::Eof, line });
    Ok(tokens)
}

fn read_number(chars: &[char], line: usize) -> Result<(Tok, usize), SandboxError> {
    let mut i = 0;
    let mut is_float = false;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            is_float = true;
            i = j;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
        }
    }

    let literal: String = chars[..i].iter().filter(|c| **c != '_').collect();
    let invalid = || SandboxError::Syntax {
        message: format!("invalid number literal '{}'", literal),
        line,
    };
    let tok = if is_float {
        Tok::Float(literal.parse().map_err(|_| invalid())?)
    } else {
        Tok::Int(literal.parse().map_err(|_| SandboxError::Overflow(
            "integer literal too large".to_string(),
        ))?)
    };
    Ok((tok, i))
}

/// Returns the decoded string, characters consumed, and newlines spanned.
fn read_string(chars: &[char], line: usize) -> Result<(String, usize, usize), SandboxError> {
    let quote = chars[0];
    let triple = chars.len() >= 3 && chars[1] == quote && chars[2] == quote;
    let mut i = if triple { 3 } else { 1 };
    let mut value = String::new();
    let mut lines = 0;

    loop {
        let Some(&c) = chars.get(i) else {
            return Err(SandboxError::Syntax {
                message: "unterminated string literal".to_string(),
                line,
            });
        };
        if c == quote {
            if !triple {
                return Ok((value, i + 1, lines));
            }
            if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                return Ok((value, i + 3, lines));
            }
        }
        if c == '\n' {
            if !triple {
                return Err(SandboxError::Syntax {
                    message: "unterminated string literal".to_string(),
                    line,
                });
            }
            lines += 1;
        }
        if c == '\\' {
            let escaped = chars.get(i + 1).copied().unwrap_or('\\');
            match escaped {
                'n' => value.push('\n'),
                't' => value.push('\t'),
                'r' => value.push('\r'),
                '0' => value.push('\0'),
                '\\' | '\'' | '"' => value.push(escaped),
                '\n' => lines += 1,
                other => {
                    value.push('\\');
                    value.push(other);
                }
            }
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Tok> {
        tokenize(source).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn simple_statement() {
        assert_eq!(
            kinds("result = 1 + 2.5"),
            vec![
                Tok::Name("result".to_string()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Op("+"),
                Tok::Float(2.5),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn indentation_produces_block_tokens() {
        let toks = kinds("for x in y:\n    z = x\n\n# done\nw = 1\n");
        assert!(toks.contains(&Tok::Indent));
        let dedent = toks.iter().position(|t| *t == Tok::Dedent).unwrap();
        assert_eq!(toks[dedent + 1], Tok::Name("w".to_string()));
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("x = [1,\n  2]\n");
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 1);
        assert!(!toks.contains(&Tok::Indent));
    }

    #[test]
    fn strings_and_escapes() {
        assert_eq!(
            kinds(r#"s = 'it\'s' + "a\nb""#)[2..5],
            [
                Tok::Str("it's".to_string()),
                Tok::Op("+"),
                Tok::Str("a\nb".to_string())
            ]
        );
    }

    #[test]
    fn two_char_operators_win() {
        let toks = kinds("a //= 2");
        assert_eq!(toks[1], Tok::Op("//"));
        assert_eq!(toks[2], Tok::Op("="));
        assert_eq!(kinds("a ** b")[1], Tok::Op("**"));
    }

    #[test]
    fn bad_dedent_is_syntax_error() {
        let err = tokenize("if x:\n    a = 1\n  b = 2\n").unwrap_err();
        assert!(matches!(err, SandboxError::Syntax { line: 3, .. }));
    }

    #[test]
    fn unknown_character_is_syntax_error() {
        assert!(tokenize("x = 1 $ 2").is_err());
    }
}
