//! Tokenizer for variable rule expressions

use crate::error::ResolverError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Dot,
    Comma,
}

/// Longest operators first so `**` wins over `*` and `//` over `/`.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", ">=", "<=", "<<", ">>", "+", "-", "*", "/", "%", "@", "<", ">", "~",
    "&", "|", "^", "=", ":",
];

pub(crate) fn tokenize(expr: &str) -> Result<Vec<Token>, ResolverError> {
    let syntax = |details: String| ResolverError::Syntax { expr: expr.to_string(), details };
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => push_advance(&mut tokens, &mut i, Token::LParen),
            ')' => push_advance(&mut tokens, &mut i, Token::RParen),
            '[' => push_advance(&mut tokens, &mut i, Token::LBracket),
            ']' => push_advance(&mut tokens, &mut i, Token::RBracket),
            '{' => push_advance(&mut tokens, &mut i, Token::LBrace),
            '}' => push_advance(&mut tokens, &mut i, Token::RBrace),
            ',' => push_advance(&mut tokens, &mut i, Token::Comma),
            '.' if !chars.get(i + 1).is_some_and(char::is_ascii_digit) => {
                push_advance(&mut tokens, &mut i, Token::Dot)
            }
            '\'' | '"' => {
                let (text, next) = read_string(&chars, i).map_err(syntax)?;
                tokens.push(Token::Str(text));
                i = next;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, next) = read_number(&chars, i).map_err(syntax)?;
                tokens.push(token);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            _ => {
                let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
                match OPERATORS.iter().copied().find(|op| rest.starts_with(*op)) {
                    Some(op) => {
                        tokens.push(Token::Op(op));
                        i += op.len();
                    }
                    None => return Err(syntax(format!("unexpected character '{}'", c))),
                }
            }
        }
    }

    Ok(tokens)
}

fn push_advance(tokens: &mut Vec<Token>, i: &mut usize, token: Token) {
    tokens.push(token);
    *i += 1;
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut text = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((text, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or("unterminated string literal")?;
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => *other,
                });
                i += 2;
            }
            c => {
                text.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string literal".to_string())
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), String> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() && chars[i].is_ascii_digit() {
        i += 1;
    }
    if i < chars.len() && chars[i] == '.' {
        is_float = true;
        i += 1;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
    }
    if i < chars.len() && matches!(chars[i], 'e' | 'E') {
        let mut j = i + 1;
        if j < chars.len() && matches!(chars[j], '+' | '-') {
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
    if i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
        return Err(format!("invalid numeric literal near '{}'", chars[i]));
    }

    let text: String = chars[start..i].iter().collect();
    let token = if is_float {
        Token::Float(text.parse().map_err(|_| format!("invalid number '{}'", text))?)
    } else {
        Token::Int(text.parse().map_err(|_| format!("invalid number '{}'", text))?)
    };
    Ok((token, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_comparison_chain() {
        let tokens = tokenize("bios.RPM >= 0.2 and vars.x != 'on'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Name("bios".into()),
                Token::Dot,
                Token::Name("RPM".into()),
                Token::Op(">="),
                Token::Float(0.2),
                Token::Name("and".into()),
                Token::Name("vars".into()),
                Token::Dot,
                Token::Name("x".into()),
                Token::Op("!="),
                Token::Str("on".into()),
            ]
        );
    }

    #[test]
    fn prefers_longest_operator() {
        assert_eq!(tokenize("2 ** 3").unwrap()[1], Token::Op("**"));
        assert_eq!(tokenize("4 // 3").unwrap()[1], Token::Op("//"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(tokenize("bios.X $ 1"), Err(ResolverError::Syntax { .. })));
        assert!(matches!(tokenize("'open"), Err(ResolverError::Syntax { .. })));
        assert!(matches!(tokenize("12abc"), Err(ResolverError::Syntax { .. })));
    }
}
