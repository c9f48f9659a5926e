use crate::error::Diagnostic;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords — distinguished in the parser
    Word(String),
    /// Quoted string literal (content without quotes, escapes resolved)
    Str(String),
    Int(i64),
    Float(f64),
    // Layout
    Newline,
    Indent,
    Dedent,
    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Semicolon,
    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    // Comparison operators
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    // Arithmetic operators
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    // End of input
    Eof,
}

#[derive(Debug, Clone)]
pub struct Spanned {
    pub token: Token,
    pub line: u32,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    tokens: Vec<Spanned>,
    indents: Vec<usize>,
    depth: usize,
}

pub fn lex(src: &str) -> Result<Vec<Spanned>, Diagnostic> {
    let mut lx = Lexer {
        chars: src.chars().collect(),
        pos: 0,
        line: 1,
        tokens: Vec::new(),
        indents: vec![0],
        depth: 0,
    };
    lx.run()?;
    Ok(lx.tokens)
}

impl Lexer {
    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, token: Token, line: u32) {
        self.tokens.push(Spanned { token, line });
    }

    fn last_is_layout(&self) -> bool {
        matches!(
            self.tokens.last().map(|s| &s.token),
            None | Some(Token::Newline) | Some(Token::Indent) | Some(Token::Dedent)
        )
    }

    fn run(&mut self) -> Result<(), Diagnostic> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if self.indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let c = self.chars[self.pos];

            // Comment runs to end of line
            if c == '#' {
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                continue;
            }

            if c == '\n' {
                if self.depth == 0 && !self.last_is_layout() {
                    self.push(Token::Newline, self.line);
                }
                self.line += 1;
                self.pos += 1;
                at_line_start = self.depth == 0;
                continue;
            }

            // Explicit line continuation
            if c == '\\' && self.peek_at(1) == Some('\n') {
                self.pos += 2;
                self.line += 1;
                continue;
            }

            if c.is_whitespace() {
                self.pos += 1;
                continue;
            }

            let tok_line = self.line;

            // String literal, with optional raw prefix
            if c == '"' || c == '\'' {
                let s = self.string(false)?;
                self.push(Token::Str(s), tok_line);
                continue;
            }
            if (c == 'r' || c == 'R') && matches!(self.peek_at(1), Some('"') | Some('\'')) {
                self.pos += 1;
                let s = self.string(true)?;
                self.push(Token::Str(s), tok_line);
                continue;
            }
            if (c == 'f' || c == 'F') && matches!(self.peek_at(1), Some('"') | Some('\'')) {
                return Err(Diagnostic::new(
                    tok_line,
                    "f-strings are not supported; use str.format()",
                ));
            }

            if c.is_ascii_digit()
                || (c == '.' && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()))
            {
                self.number()?;
                continue;
            }

            if c.is_alphabetic() || c == '_' {
                let start = self.pos;
                while self.pos < self.chars.len()
                    && (self.chars[self.pos].is_alphanumeric() || self.chars[self.pos] == '_')
                {
                    self.pos += 1;
                }
                let word: String = self.chars[start..self.pos].iter().collect();
                self.push(Token::Word(word), tok_line);
                continue;
            }

            self.operator(c, tok_line)?;
        }

        if !self.last_is_layout() {
            self.push(Token::Newline, self.line);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Token::Dedent, self.line);
        }
        self.push(Token::Eof, self.line);
        Ok(())
    }

    /// Measure leading whitespace of a logical line and emit Indent/Dedent.
    /// Returns true when the line is blank or comment-only and was skipped.
    fn indentation(&mut self) -> Result<bool, Diagnostic> {
        let mut width = 0usize;
        while let Some(c) = self.peek_at(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / 8 + 1) * 8,
                '\r' | '\x0c' => {}
                _ => break,
            }
            self.pos += 1;
        }
        match self.peek_at(0) {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                while self.pos < self.chars.len() && self.chars[self.pos] != '\n' {
                    self.pos += 1;
                }
                if self.pos < self.chars.len() {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Token::Indent, self.line);
        } else if width < current {
            while self.indents.last().is_some_and(|&w| w > width) {
                self.indents.pop();
                self.push(Token::Dedent, self.line);
            }
            if self.indents.last() != Some(&width) {
                return Err(Diagnostic::new(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }
        Ok(false)
    }

    fn string(&mut self, raw: bool) -> Result<String, Diagnostic> {
        let quote = self.chars[self.pos];
        let start_line = self.line;
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut s = String::new();
        loop {
            let Some(sc) = self.peek_at(0) else {
                return Err(Diagnostic::new(start_line, "unterminated string literal"));
            };
            if sc == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if sc == '\n' {
                if !triple {
                    return Err(Diagnostic::new(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if sc == '\\' && !raw {
                self.pos += 1;
                let Some(esc) = self.peek_at(0) else {
                    return Err(Diagnostic::new(start_line, "unterminated escape in string"));
                };
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '0' => s.push('\0'),
                    '\\' => s.push('\\'),
                    '\'' => s.push('\''),
                    '"' => s.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
                self.pos += 1;
                continue;
            }
            s.push(sc);
            self.pos += 1;
        }
        Ok(s)
    }

    fn number(&mut self) -> Result<(), Diagnostic> {
        let tok_line = self.line;
        let start = self.pos;
        let mut is_float = false;
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float && self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
            {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && (self.peek_at(1).is_some_and(|d| d.is_ascii_digit())
                    || (matches!(self.peek_at(1), Some('+') | Some('-'))
                        && self.peek_at(2).is_some_and(|d| d.is_ascii_digit())))
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        if is_float {
            let f: f64 = text.parse().map_err(|_| {
                Diagnostic::new(tok_line, format!("invalid float literal '{}'", text))
            })?;
            self.push(Token::Float(f), tok_line);
        } else {
            let n: i64 = text.parse().map_err(|_| {
                Diagnostic::new(tok_line, format!("invalid integer '{}'", text))
            })?;
            self.push(Token::Int(n), tok_line);
        }
        Ok(())
    }

    fn operator(&mut self, c: char, tok_line: u32) -> Result<(), Diagnostic> {
        let next = self.peek_at(1);
        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Neq, 2),
            ('<', Some('=')) => (Token::Lte, 2),
            ('>', Some('=')) => (Token::Gte, 2),
            ('+', Some('=')) => (Token::PlusAssign, 2),
            ('-', Some('=')) => (Token::MinusAssign, 2),
            ('*', Some('=')) => (Token::StarAssign, 2),
            ('/', Some('=')) => (Token::SlashAssign, 2),
            ('=', _) => (Token::Assign, 1),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            (':', _) => (Token::Colon, 1),
            (',', _) => (Token::Comma, 1),
            ('.', _) => (Token::Dot, 1),
            (';', _) => (Token::Semicolon, 1),
            ('(', _) => {
                self.depth += 1;
                (Token::LParen, 1)
            }
            ('[', _) => {
                self.depth += 1;
                (Token::LBracket, 1)
            }
            ('{', _) => {
                self.depth += 1;
                (Token::LBrace, 1)
            }
            (')', _) => {
                self.depth = self.depth.saturating_sub(1);
                (Token::RParen, 1)
            }
            (']', _) => {
                self.depth = self.depth.saturating_sub(1);
                (Token::RBracket, 1)
            }
            ('}', _) => {
                self.depth = self.depth.saturating_sub(1);
                (Token::RBrace, 1)
            }
            _ => {
                return Err(Diagnostic::new(
                    tok_line,
                    format!("unexpected character '{}'", c),
                ))
            }
        };
        self.pos += width;
        self.push(token, tok_line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Token> {
        lex(src).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let toks = kinds("if x:\n    y = 1\nz\n");
        assert_eq!(
            toks,
            vec![
                Token::Word("if".into()),
                Token::Word("x".into()),
                Token::Colon,
                Token::Newline,
                Token::Indent,
                Token::Word("y".into()),
                Token::Assign,
                Token::Int(1),
                Token::Newline,
                Token::Dedent,
                Token::Word("z".into()),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn newlines_inside_brackets_are_ignored() {
        let toks = kinds("f(1,\n  2)\n");
        assert!(!toks[..toks.len() - 2].contains(&Token::Newline));
    }

    #[test]
    fn comment_lines_do_not_affect_indentation() {
        let toks = kinds("# TITLE: Setup\n#\nx = 1\n");
        assert_eq!(toks[0], Token::Word("x".into()));
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let spanned = lex("s = \"\"\"a\nb\"\"\"\nt = 1\n").unwrap();
        assert_eq!(spanned[2].token, Token::Str("a\nb".into()));
        let t = spanned
            .iter()
            .find(|s| s.token == Token::Word("t".into()))
            .unwrap();
        assert_eq!(t.line, 3);
    }

    #[test]
    fn bad_dedent_is_reported() {
        let err = lex("if x:\n    a\n  b\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn numbers() {
        assert_eq!(kinds("1_000")[0], Token::Int(1000));
        assert_eq!(kinds("2.5")[0], Token::Float(2.5));
        assert_eq!(kinds("1e3")[0], Token::Float(1000.0));
    }

    #[test]
    fn f_strings_are_rejected() {
        assert!(lex("x = f'{y}'").is_err());
    }
}
