//! Stateless pieces of the preprocessor: `#if` arithmetic, stringizing,
//! token pasting and placement of expanded tokens.

use crate::lexer::{Lexer, classify_number};
use crate::token::{ExprToken, Token, TokenKind};

/// Convert fully expanded directive tokens into expression tokens.
///
/// Remaining identifiers evaluate to 0, `true` to 1. A `>` directly followed
/// by `>` is a right shift, since the lexer never produces `>>`.
///
/// # Errors
/// Returns a message for tokens that cannot appear in an `#if` expression.
pub(crate) fn to_expr_tokens(tokens: &[Token]) -> Result<Vec<ExprToken>, String> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        i += 1;
        let expr = match token.kind {
            TokenKind::Number => {
                let value = classify_number(&token.value)
                    .filter(|lit| !lit.is_float)
                    .and_then(|lit| lit.integer_value())
                    .ok_or_else(|| format!("invalid integer constant '{}'", token.value))?;
                // unsigned values wrap into the signed domain
                ExprToken::Number(value as i64)
            }
            TokenKind::Character => ExprToken::Number(
                char_literal_value(&token.value)
                    .ok_or_else(|| format!("invalid character constant {}", token.value))?,
            ),
            TokenKind::Identifier | TokenKind::Keyword => {
                ExprToken::Number(i64::from(token.value == "true"))
            }
            TokenKind::Punctuator => {
                if token.value == ">"
                    && let Some(next) = tokens.get(i)
                    && token.is_adjacent_to(next)
                    && next.kind == TokenKind::Punctuator
                {
                    match next.value.as_str() {
                        ">" => {
                            i += 1;
                            out.push(ExprToken::ShiftRight);
                            continue;
                        }
                        ">=" => return Err("assignment in expression".to_string()),
                        _ => {}
                    }
                }
                punctuator(&token.value)
                    .ok_or_else(|| format!("unexpected '{}' in expression", token.value))?
            }
            _ => return Err(format!("unexpected '{}' in expression", token.value)),
        };
        out.push(expr);
    }
    Ok(out)
}

fn punctuator(value: &str) -> Option<ExprToken> {
    Some(match value {
        "(" => ExprToken::LParen,
        ")" => ExprToken::RParen,
        "!" => ExprToken::Not,
        "~" => ExprToken::BitNot,
        "+" => ExprToken::Plus,
        "-" => ExprToken::Minus,
        "*" => ExprToken::Multiply,
        "/" => ExprToken::Divide,
        "%" => ExprToken::Modulo,
        "==" => ExprToken::Equal,
        "!=" => ExprToken::NotEqual,
        "<" => ExprToken::Less,
        "<=" => ExprToken::LessEqual,
        ">" => ExprToken::Greater,
        ">=" => ExprToken::GreaterEqual,
        "&&" => ExprToken::And,
        "||" => ExprToken::Or,
        "&" => ExprToken::BitAnd,
        "|" => ExprToken::BitOr,
        "^" => ExprToken::BitXor,
        "<<" => ExprToken::ShiftLeft,
        "?" => ExprToken::Question,
        ":" => ExprToken::Colon,
        _ => return None,
    })
}

/// Evaluate a preprocessor expression from tokens.
///
/// Arithmetic wraps on 64 bits. Division by zero is an error only in an
/// evaluated operand, so `0 && 1 / 0` is 0.
///
/// # Errors
/// Returns an error message if the expression is malformed.
pub(crate) fn evaluate(tokens: &[ExprToken]) -> Result<i64, String> {
    if tokens.is_empty() {
        return Err("missing expression".to_string());
    }
    let mut parser = ExprParser { tokens, pos: 0 };
    let value = parser.conditional(true)?;
    if parser.pos != tokens.len() {
        return Err("unexpected tokens at end of expression".to_string());
    }
    Ok(value)
}

struct ExprParser<'a> {
    tokens: &'a [ExprToken],
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&ExprToken> {
        self.tokens.get(self.pos)
    }

    fn eat(&mut self, expected: &ExprToken) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn conditional(&mut self, live: bool) -> Result<i64, String> {
        let condition = self.logical_or(live)?;
        if !self.eat(&ExprToken::Question) {
            return Ok(condition);
        }
        let then = self.conditional(live && condition != 0)?;
        if !self.eat(&ExprToken::Colon) {
            return Err("expected ':' in conditional expression".to_string());
        }
        let otherwise = self.conditional(live && condition == 0)?;
        Ok(if condition != 0 { then } else { otherwise })
    }

    fn logical_or(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.logical_and(live)?;
        while self.eat(&ExprToken::Or) {
            let right = self.logical_and(live && left == 0)?;
            left = i64::from(left != 0 || right != 0);
        }
        Ok(left)
    }

    fn logical_and(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.bit_or(live)?;
        while self.eat(&ExprToken::And) {
            let right = self.bit_or(live && left != 0)?;
            left = i64::from(left != 0 && right != 0);
        }
        Ok(left)
    }

    fn bit_or(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.bit_xor(live)?;
        while self.eat(&ExprToken::BitOr) {
            left |= self.bit_xor(live)?;
        }
        Ok(left)
    }

    fn bit_xor(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.bit_and(live)?;
        while self.eat(&ExprToken::BitXor) {
            left ^= self.bit_and(live)?;
        }
        Ok(left)
    }

    fn bit_and(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.equality(live)?;
        while self.eat(&ExprToken::BitAnd) {
            left &= self.equality(live)?;
        }
        Ok(left)
    }

    fn equality(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.relational(live)?;
        loop {
            if self.eat(&ExprToken::Equal) {
                left = i64::from(left == self.relational(live)?);
            } else if self.eat(&ExprToken::NotEqual) {
                left = i64::from(left != self.relational(live)?);
            } else {
                return Ok(left);
            }
        }
    }

    fn relational(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.shift(live)?;
        loop {
            let op = match self.peek() {
                Some(
                    op @ (ExprToken::Less
                    | ExprToken::LessEqual
                    | ExprToken::Greater
                    | ExprToken::GreaterEqual),
                ) => op.clone(),
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.shift(live)?;
            left = i64::from(match op {
                ExprToken::Less => left < right,
                ExprToken::LessEqual => left <= right,
                ExprToken::Greater => left > right,
                _ => left >= right,
            });
        }
    }

    fn shift(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.additive(live)?;
        loop {
            if self.eat(&ExprToken::ShiftLeft) {
                let right = self.additive(live)?;
                left = match u32::try_from(right) {
                    Ok(n) if n < 64 => left.wrapping_shl(n),
                    _ => 0,
                };
            } else if self.eat(&ExprToken::ShiftRight) {
                let right = self.additive(live)?;
                left = match u32::try_from(right) {
                    Ok(n) if n < 64 => left >> n,
                    _ if left < 0 => -1,
                    _ => 0,
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn additive(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.multiplicative(live)?;
        loop {
            if self.eat(&ExprToken::Plus) {
                left = left.wrapping_add(self.multiplicative(live)?);
            } else if self.eat(&ExprToken::Minus) {
                left = left.wrapping_sub(self.multiplicative(live)?);
            } else {
                return Ok(left);
            }
        }
    }

    fn multiplicative(&mut self, live: bool) -> Result<i64, String> {
        let mut left = self.unary(live)?;
        loop {
            if self.eat(&ExprToken::Multiply) {
                left = left.wrapping_mul(self.unary(live)?);
            } else if self.eat(&ExprToken::Divide) {
                let right = self.unary(live)?;
                left = match left.checked_div(right) {
                    Some(v) => v,
                    None if right == 0 && live => return Err("division by zero".to_string()),
                    None if right == 0 => 0,
                    None => left.wrapping_div(right),
                };
            } else if self.eat(&ExprToken::Modulo) {
                let right = self.unary(live)?;
                left = match left.checked_rem(right) {
                    Some(v) => v,
                    None if right == 0 && live => return Err("modulo by zero".to_string()),
                    None => 0,
                };
            } else {
                return Ok(left);
            }
        }
    }

    fn unary(&mut self, live: bool) -> Result<i64, String> {
        if self.eat(&ExprToken::Not) {
            return Ok(i64::from(self.unary(live)? == 0));
        }
        if self.eat(&ExprToken::Minus) {
            return Ok(self.unary(live)?.wrapping_neg());
        }
        if self.eat(&ExprToken::Plus) {
            return self.unary(live);
        }
        if self.eat(&ExprToken::BitNot) {
            return Ok(!self.unary(live)?);
        }
        self.primary(live)
    }

    fn primary(&mut self, live: bool) -> Result<i64, String> {
        match self.peek() {
            Some(ExprToken::Number(value)) => {
                let value = *value;
                self.pos += 1;
                Ok(value)
            }
            Some(ExprToken::LParen) => {
                self.pos += 1;
                let value = self.conditional(live)?;
                if !self.eat(&ExprToken::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(value)
            }
            Some(other) => Err(format!("unexpected {other:?} in expression")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Value of a character literal such as `'a'`, `L'\n'` or `'ab'`
#[must_use]
pub fn char_literal_value(text: &str) -> Option<i64> {
    let start = text.find('\'')?;
    let body = text[start + 1..].strip_suffix('\'')?;
    let wide = start > 0;
    let mut chars = body.chars().peekable();
    let mut value: i64 = 0;
    let mut count = 0;
    while let Some(c) = chars.next() {
        let code = if c == '\\' {
            match chars.next()? {
                'n' => 10,
                't' => 9,
                'r' => 13,
                'a' => 7,
                'b' => 8,
                'f' => 12,
                'v' => 11,
                'e' => 27,
                c @ ('\\' | '\'' | '"' | '?') => u32::from(c),
                'x' => {
                    let mut code = 0u32;
                    while let Some(d) = chars.peek().and_then(|c| c.to_digit(16)) {
                        code = code.wrapping_mul(16).wrapping_add(d);
                        chars.next();
                    }
                    code
                }
                c @ ('u' | 'U') => {
                    let len = if c == 'u' { 4 } else { 8 };
                    let mut code = 0u32;
                    for _ in 0..len {
                        code = code * 16 + chars.next()?.to_digit(16)?;
                    }
                    code
                }
                c @ '0'..='7' => {
                    let mut code = c.to_digit(8)?;
                    for _ in 0..2 {
                        match chars.peek().and_then(|c| c.to_digit(8)) {
                            Some(d) => {
                                code = code * 8 + d;
                                chars.next();
                            }
                            None => break,
                        }
                    }
                    code
                }
                other => u32::from(other),
            }
        } else {
            u32::from(c)
        };
        count += 1;
        value = if wide {
            i64::from(code)
        } else if count == 1 {
            // plain char is signed
            i64::from(code as u8 as i8)
        } else {
            (value << 8) | i64::from(code & 0xff)
        };
    }
    (count > 0).then_some(value)
}

/// Turn macro argument tokens into a string literal spelling.
///
/// Tokens are separated by one space where the source had whitespace or a
/// comment; `"` and `\` inside string and character literals are escaped.
#[must_use]
pub fn stringize(tokens: &[Token]) -> String {
    let mut out = String::from("\"");
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 && (!tokens[i - 1].is_adjacent_to(token) || token.has_comments()) {
            out.push(' ');
        }
        if matches!(token.kind, TokenKind::String | TokenKind::Character) {
            for c in token.value.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
        } else {
            out.push_str(&token.value);
        }
    }
    out.push('"');
    out
}

/// Paste two tokens with `##`. Returns `None` when the spelling does not
/// form a single valid token.
///
/// `>` pasted with `>` or `>=` yields two adjacent tokens, the form the
/// lexer uses for right shifts.
#[must_use]
pub fn paste(left: &Token, right: &Token) -> Option<Vec<Token>> {
    let spelling = format!("{}{}", left.value, right.value);
    let tokens = Lexer::raw().tokenize_fragment(&spelling, left.line, left.column);
    let valid = match tokens.as_slice() {
        [single] => single.kind != TokenKind::UnknownChar && single.trivia.is_empty(),
        [_, _] => spelling == ">>" || spelling == ">>=",
        _ => false,
    };
    valid.then_some(tokens)
}

/// Place expanded tokens at the invocation: same line, consecutive columns
/// keeping the spacing the tokens had in their own source. The first token
/// takes the invocation's trivia, the others lose theirs.
pub(crate) fn relocate(tokens: &mut [Token], anchor: &Token) {
    let mut column = anchor.column;
    let mut prev: Option<(usize, usize)> = None;
    for (i, token) in tokens.iter_mut().enumerate() {
        let adjacent = prev.is_some_and(|(line, end)| line == token.line && end == token.column);
        prev = Some((token.line, token.end_column()));
        if i > 0 && !adjacent {
            column += 1;
        }
        token.line = anchor.line;
        token.column = column;
        token.generated = true;
        token.trivia = if i == 0 {
            anchor.trivia.clone()
        } else {
            Vec::new()
        };
        column = token.end_column();
    }
}
