use crate::{
    compile::{
        parse::macros::find_closing,
        tree::{Expr, Key, LoopField, Root},
    },
    log::{Error, INVALID_SYNTAX},
};

use serde_json::Value;
use unicode_ident::{is_xid_continue, is_xid_start};

/// Context needed by the expression parser that only the template parser has.
pub trait Resolve {
    /// Return the slot of the innermost active loop that binds the given variable.
    fn loop_slot(&self, variable: &str) -> Option<usize>;

    /// Compile a nested tag found in value position.
    fn nested(&mut self, tag: &str) -> Result<Expr, Error>;
}

/// Parse the complete text as a single [`Expr`].
///
/// # Errors
///
/// Returns an [`Error`] when the text is not a valid expression, or when anything
/// follows the expression.
pub fn parse_expr<R>(text: &str, resolver: &mut R) -> Result<Expr, Error>
where
    R: Resolve,
{
    let mut parser = ExprParser {
        text,
        pos: 0,
        resolver,
    };

    parser.skip_whitespace();
    if parser.is_done() {
        return Err(Error::build(INVALID_SYNTAX).with_help("expected an expression"));
    }
    let expr = parser.expr()?;
    parser.skip_whitespace();
    if !parser.is_done() {
        return Err(Error::build(INVALID_SYNTAX).with_help(format!(
            "unexpected `{}`, expressions do not support operators",
            parser.rest()
        )));
    }

    Ok(expr)
}

/// Replace the escape sequences of a quoted string body.
///
/// Unknown escapes are kept as written.
pub fn unescape(body: &str) -> String {
    let mut result = String::with_capacity(body.len());
    let mut chars = body.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('r') => result.push('\r'),
            Some('t') => result.push('\t'),
            Some(escaped @ ('\\' | '"' | '\'')) => result.push(escaped),
            Some(other) => {
                result.push('\\');
                result.push(other);
            }
            None => result.push('\\'),
        }
    }

    result
}

struct ExprParser<'a, R> {
    text: &'a str,
    pos: usize,
    resolver: &'a mut R,
}

impl<'a, R> ExprParser<'a, R>
where
    R: Resolve,
{
    fn expr(&mut self) -> Result<Expr, Error> {
        self.skip_whitespace();
        if self.eat('!') {
            return Ok(Expr::Not(Box::new(self.expr()?)));
        }

        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, Error> {
        let Some(c) = self.peek() else {
            return Err(Error::build(INVALID_SYNTAX).with_help("expected an expression"));
        };

        match c {
            '"' | '\'' => Ok(Expr::Literal(Value::String(self.string()?))),
            '[' => self.array(),
            '(' => {
                self.pos += 1;
                let expr = self.expr()?;
                self.skip_whitespace();
                self.expect(')')?;

                Ok(expr)
            }
            '<' if self.rest().starts_with("<%") => {
                let end = find_closing(self.text, self.pos + 2, Some("<%"), "%>")
                    .ok_or_else(|| {
                        Error::build(INVALID_SYNTAX)
                            .with_help("nested tag is not closed, expected `%>`")
                    })?;
                let text = self.text;
                let tag = &text[self.pos..end];
                self.pos = end;

                self.resolver.nested(tag)
            }
            '$' => self.local(),
            c if c.is_ascii_digit() || c == '-' || c == '+' => self.number(),
            c if is_ident_start(c) => self.name(),
            c => Err(Error::build(INVALID_SYNTAX).with_help(format!(
                "unexpected `{c}`, expected a value, a path or a nested tag"
            ))),
        }
    }

    fn local(&mut self) -> Result<Expr, Error> {
        let text = self.text;
        let begin = self.pos;
        self.pos += 1;
        if self.ident().is_empty() {
            return Err(Error::build(INVALID_SYNTAX).with_help("expected a name after `$`"));
        }
        let variable = &text[begin..self.pos];

        if self.eat('#') {
            let suffix = self.ident();
            let name = &text[begin..self.pos];
            let field = LoopField::from_suffix(suffix);
            if let (Some(field), Some(slot)) = (field, self.resolver.loop_slot(variable)) {
                return Ok(Expr::Loop { slot, field });
            }

            return Ok(Expr::Path {
                root: Root::Local(name.to_owned()),
                keys: vec![],
            });
        }

        let root = Root::Local(variable.to_owned());
        let keys = self.keys()?;

        Ok(Expr::Path { root, keys })
    }

    fn name(&mut self) -> Result<Expr, Error> {
        let root = match self.ident() {
            "true" => return Ok(Expr::Literal(Value::Bool(true))),
            "false" => return Ok(Expr::Literal(Value::Bool(false))),
            "null" => return Ok(Expr::Literal(Value::Null)),
            "this" => Root::Receiver,
            "param" => Root::Params,
            "global" => Root::Global,
            name => Root::Name(name.to_owned()),
        };
        let keys = self.keys()?;

        Ok(Expr::Path { root, keys })
    }

    fn keys(&mut self) -> Result<Vec<Key>, Error> {
        let mut keys = vec![];

        loop {
            if self.eat('.') {
                let digits = self.digits();
                if !digits.is_empty() {
                    keys.push(Key::Index(parse_index(digits)?));
                    continue;
                }
                let name = self.ident();
                if name.is_empty() {
                    return Err(
                        Error::build(INVALID_SYNTAX).with_help("expected a key after `.`")
                    );
                }
                keys.push(Key::Name(name.to_owned()));
            } else if self.eat('[') {
                self.skip_whitespace();
                let key = match self.peek() {
                    Some('"' | '\'') => Key::Name(self.string()?),
                    _ => {
                        let digits = self.digits();
                        if digits.is_empty() {
                            return Err(Error::build(INVALID_SYNTAX)
                                .with_help("expected an index or a quoted key after `[`"));
                        }
                        Key::Index(parse_index(digits)?)
                    }
                };
                self.skip_whitespace();
                self.expect(']')?;
                keys.push(key);
            } else {
                return Ok(keys);
            }
        }
    }

    fn array(&mut self) -> Result<Expr, Error> {
        self.pos += 1;
        let mut items = vec![];

        self.skip_whitespace();
        if self.eat(']') {
            return Ok(Expr::Array(items));
        }
        loop {
            items.push(self.expr()?);
            self.skip_whitespace();
            if self.eat(',') {
                continue;
            }
            self.expect(']')?;

            return Ok(Expr::Array(items));
        }
    }

    fn number(&mut self) -> Result<Expr, Error> {
        let begin = self.pos;
        if matches!(self.peek(), Some('-' | '+')) {
            self.pos += 1;
        }
        self.digits();
        if self.rest().starts_with('.')
            && self.rest()[1..].starts_with(|c: char| c.is_ascii_digit())
        {
            self.pos += 1;
            self.digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some('-' | '+')) {
                self.pos += 1;
            }
            self.digits();
        }

        let text = &self.text[begin..self.pos];
        let literal = text.strip_prefix('+').unwrap_or(text);
        match serde_json::from_str::<Value>(literal) {
            Ok(value @ Value::Number(_)) => Ok(Expr::Literal(value)),
            _ => Err(Error::build(INVALID_SYNTAX)
                .with_help(format!("`{text}` is not a valid number"))),
        }
    }

    /// Read a quoted string, returning its unescaped body.
    fn string(&mut self) -> Result<String, Error> {
        let Some(quote) = self.peek() else {
            return Err(Error::build(INVALID_SYNTAX).with_help("expected a string"));
        };
        let begin = self.pos + 1;
        let mut escaped = false;

        for (index, c) in self.text[begin..].char_indices() {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                let body = &self.text[begin..begin + index];
                self.pos = begin + index + 1;

                return Ok(unescape(body));
            }
        }

        Err(Error::build(INVALID_SYNTAX)
            .with_help(format!("string is not closed, expected `{quote}`")))
    }

    fn ident(&mut self) -> &'a str {
        let text = self.text;
        let begin = self.pos;
        let mut chars = text[begin..].char_indices();

        match chars.next() {
            Some((_, c)) if is_ident_start(c) || c.is_ascii_digit() => {}
            _ => return "",
        }
        let end = chars
            .find(|(_, c)| !is_xid_continue(*c))
            .map_or(text.len(), |(index, _)| begin + index);
        self.pos = end;

        &text[begin..end]
    }

    fn digits(&mut self) -> &'a str {
        let text = self.text;
        let begin = self.pos;
        let end = text[begin..]
            .find(|c: char| !c.is_ascii_digit())
            .map_or(text.len(), |index| begin + index);
        self.pos = end;

        &text[begin..end]
    }

    fn expect(&mut self, c: char) -> Result<(), Error> {
        if self.eat(c) {
            return Ok(());
        }

        Err(Error::build(INVALID_SYNTAX).with_help(match self.peek() {
            Some(found) => format!("expected `{c}`, found `{found}`"),
            None => format!("expected `{c}`"),
        }))
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            return true;
        }

        false
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn is_done(&self) -> bool {
        self.pos >= self.text.len()
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || is_xid_start(c)
}

fn parse_index(digits: &str) -> Result<usize, Error> {
    digits.parse::<usize>().map_err(|_| {
        Error::build(INVALID_SYNTAX).with_help(format!("`{digits}` is not a valid index"))
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_expr, unescape, Resolve};
    use crate::{
        compile::tree::{Expr, Key, LoopField, Root},
        log::Error,
    };
    use serde_json::{json, Value};

    struct Loops;

    impl Resolve for Loops {
        fn loop_slot(&self, variable: &str) -> Option<usize> {
            (variable == "$item").then_some(3)
        }

        fn nested(&mut self, tag: &str) -> Result<Expr, Error> {
            Ok(Expr::Literal(Value::String(tag.to_owned())))
        }
    }

    fn helper_parse(text: &str) -> Result<Expr, Error> {
        parse_expr(text, &mut Loops)
    }

    #[test]
    fn test_parse_literals() {
        assert_eq!(helper_parse("42").unwrap(), Expr::Literal(json!(42)));
        assert_eq!(helper_parse("+1.5").unwrap(), Expr::Literal(json!(1.5)));
        assert_eq!(helper_parse("-2e3").unwrap(), Expr::Literal(json!(-2e3)));
        assert_eq!(helper_parse("null").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(
            helper_parse(r#"'it\'s'"#).unwrap(),
            Expr::Literal(json!("it's"))
        );
    }

    #[test]
    fn test_parse_array() {
        assert_eq!(
            helper_parse("[1, 'a', []]").unwrap(),
            Expr::Array(vec![
                Expr::Literal(json!(1)),
                Expr::Literal(json!("a")),
                Expr::Array(vec![]),
            ])
        );
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            helper_parse(r#"this.people[0]["full name"].2"#).unwrap(),
            Expr::Path {
                root: Root::Receiver,
                keys: vec![
                    Key::Name("people".into()),
                    Key::Index(0),
                    Key::Name("full name".into()),
                    Key::Index(2),
                ],
            }
        );
        assert_eq!(
            helper_parse("title").unwrap(),
            Expr::Path {
                root: Root::Name("title".into()),
                keys: vec![],
            }
        );
    }

    #[test]
    fn test_parse_loop_reference() {
        assert_eq!(
            helper_parse("$item#index").unwrap(),
            Expr::Loop {
                slot: 3,
                field: LoopField::Index,
            }
        );
        assert_eq!(
            helper_parse("$other#index").unwrap(),
            Expr::Path {
                root: Root::Local("$other#index".into()),
                keys: vec![],
            }
        );
    }

    #[test]
    fn test_parse_not_and_parens() {
        assert_eq!(
            helper_parse("!($ready)").unwrap(),
            Expr::Not(Box::new(Expr::Path {
                root: Root::Local("$ready".into()),
                keys: vec![],
            }))
        );
    }

    #[test]
    fn test_parse_nested() {
        assert_eq!(
            helper_parse("<% a <% b %> %>").unwrap(),
            Expr::Literal(json!("<% a <% b %> %>"))
        );
    }

    #[test]
    fn test_parse_operator() {
        let error = helper_parse("1 + 1").unwrap_err();

        assert_eq!(error.reason(), "invalid syntax");
        assert!(error.help().unwrap().contains("do not support operators"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(helper_parse("").is_err());
        assert!(helper_parse("'open").is_err());
        assert!(helper_parse("[1, 2").is_err());
        assert!(helper_parse("$").is_err());
        assert!(helper_parse("a.").is_err());
        assert!(helper_parse("-").is_err());
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape(r#"a\n\"b\"\q"#), "a\n\"b\"\\q");
    }
}
