//! Python literal reader for legacy `.alog` files
//!
//! Older roaster versions wrote profiles with `repr()` instead of JSON:
//! single-quoted strings, `True`/`False`/`None`, tuples and `u''` prefixes.
//! This reader accepts that subset and produces a `serde_json::Value`.
//! Non-string dict keys become their literal text.

use super::ProfileError;
use serde_json::{Map, Number, Value};

/// Parse one Python literal expression
pub fn parse(text: &str) -> Result<Value, ProfileError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let value = parser.value()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error("trailing characters after literal"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &str) -> ProfileError {
        ProfileError::Literal {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '\\' && self.peek_at(1) == Some('\n') {
                // explicit line continuation
                self.pos += 2;
            } else {
                break;
            }
        }
    }

    fn expect(&mut self, wanted: char) -> Result<(), ProfileError> {
        match self.bump() {
            Some(c) if c == wanted => Ok(()),
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error(&format!("expected '{}'", wanted)))
            }
        }
    }

    fn value(&mut self) -> Result<Value, ProfileError> {
        match self.peek() {
            Some('{') => self.dict(),
            Some('[') => self.sequence('[', ']'),
            Some('(') => self.sequence('(', ')'),
            Some('\'') | Some('"') => Ok(Value::String(self.string()?)),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                if self.at_prefixed_string() {
                    return Ok(Value::String(self.string()?));
                }
                self.keyword()
            }
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn dict(&mut self) -> Result<Value, ProfileError> {
        self.expect('{')?;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            if self.peek() == Some('}') {
                self.pos += 1;
                return Ok(Value::Object(map));
            }
            let key = match self.value()? {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => if b { "True" } else { "False" }.to_string(),
                Value::Null => "None".to_string(),
                _ => return Err(self.error("unhashable dict key")),
            };
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let value = self.value()?;
            map.insert(key, value);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(Value::Object(map)),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error("expected ',' or '}' in dict"));
                }
            }
        }
    }

    fn sequence(&mut self, open: char, close: char) -> Result<Value, ProfileError> {
        self.expect(open)?;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.pos += 1;
                return Ok(Value::Array(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some(c) if c == close => return Ok(Value::Array(items)),
                _ => {
                    self.pos = self.pos.saturating_sub(1);
                    return Err(self.error(&format!("expected ',' or '{}'", close)));
                }
            }
        }
    }

    /// `u'..'`, `b".."`, `r'..'`, `ur'..'` and friends
    fn at_prefixed_string(&self) -> bool {
        let mut ahead = 0;
        while let Some(c) = self.peek_at(ahead) {
            match c {
                'u' | 'U' | 'b' | 'B' | 'r' | 'R' if ahead < 2 => ahead += 1,
                '\'' | '"' => return ahead > 0,
                _ => return false,
            }
        }
        false
    }

    fn string(&mut self) -> Result<String, ProfileError> {
        let mut raw = false;
        while let Some(c) = self.peek() {
            match c {
                'r' | 'R' => {
                    raw = true;
                    self.pos += 1;
                }
                'u' | 'U' | 'b' | 'B' => self.pos += 1,
                _ => break,
            }
        }

        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected string quote")),
        };

        let mut out = String::new();
        loop {
            let c = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            if c == quote {
                return Ok(out);
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let escaped = self
                .bump()
                .ok_or_else(|| self.error("unterminated escape"))?;
            if raw {
                out.push('\\');
                out.push(escaped);
                continue;
            }
            match escaped {
                '\n' => {}
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'a' => out.push('\u{7}'),
                'v' => out.push('\u{b}'),
                'x' => out.push(self.hex_escape(2)?),
                'u' => out.push(self.hex_escape(4)?),
                'U' => out.push(self.hex_escape(8)?),
                '0'..='7' => {
                    let mut code = escaped.to_digit(8).unwrap_or(0);
                    for _ in 0..2 {
                        match self.peek().and_then(|d| d.to_digit(8)) {
                            Some(d) => {
                                code = code * 8 + d;
                                self.pos += 1;
                            }
                            None => break,
                        }
                    }
                    out.push(char::from_u32(code).ok_or_else(|| self.error("bad octal escape"))?);
                }
                other => {
                    // unknown escapes keep the backslash
                    out.push('\\');
                    out.push(other);
                }
            }
        }
    }

    fn hex_escape(&mut self, digits: usize) -> Result<char, ProfileError> {
        let mut code: u32 = 0;
        for _ in 0..digits {
            let d = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("bad hex escape"))?;
            code = code * 16 + d;
        }
        char::from_u32(code).ok_or_else(|| self.error("escape is not a valid code point"))
    }

    fn number(&mut self) -> Result<Value, ProfileError> {
        let start = self.pos;
        if matches!(self.peek(), Some('-') | Some('+')) {
            self.pos += 1;
        }
        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                '0'..='9' | '_' => self.pos += 1,
                '.' => {
                    is_float = true;
                    self.pos += 1;
                }
                'e' | 'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some('-') | Some('+')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        if !is_float {
            if let Ok(int) = text.parse::<i64>() {
                return Ok(Value::Number(int.into()));
            }
        }
        let float: f64 = text
            .parse()
            .map_err(|_| ProfileError::Literal {
                offset: start,
                message: format!("invalid number '{}'", text),
            })?;
        Number::from_f64(float)
            .map(Value::Number)
            .ok_or_else(|| ProfileError::Literal {
                offset: start,
                message: format!("non-finite number '{}'", text),
            })
    }

    fn keyword(&mut self) -> Result<Value, ProfileError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" => Ok(Value::Bool(true)),
            "False" => Ok(Value::Bool(false)),
            "None" => Ok(Value::Null),
            _ => Err(ProfileError::Literal {
                offset: start,
                message: format!("unknown name '{}'", word),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_alog_style_dict() {
        let text = "{'title': u'Kenya AA', 'flag': True, 'none': None, 'off': False, \
                    'timex': [0.0, 1.5, 3], 'timeindex': [0, 10, -1, 0, 0, 0, 20, 0]}";
        let value = parse(text).unwrap();
        assert_eq!(value["title"], "Kenya AA");
        assert_eq!(value["flag"], true);
        assert_eq!(value["off"], false);
        assert!(value["none"].is_null());
        assert_eq!(value["timex"], json!([0.0, 1.5, 3]));
        assert_eq!(value["timeindex"][2], -1);
    }

    #[test]
    fn test_tuples_become_arrays_and_trailing_commas_pass() {
        let value = parse("{'weight': (1.2, 1.0, 'Kg',), 'empty': (),}").unwrap();
        assert_eq!(value["weight"], json!([1.2, 1.0, "Kg"]));
        assert_eq!(value["empty"], json!([]));
    }

    #[test]
    fn test_string_escapes() {
        let value = parse(r#"{'a': 'caf\xe9', 'b': "it's", 'c': 'line\nnext', 'd': '\u0416', 'e': 'q\'q'}"#)
            .unwrap();
        assert_eq!(value["a"], "café");
        assert_eq!(value["b"], "it's");
        assert_eq!(value["c"], "line\nnext");
        assert_eq!(value["d"], "Ж");
        assert_eq!(value["e"], "q'q");
    }

    #[test]
    fn test_raw_string_keeps_backslashes() {
        let value = parse(r"{'path': r'C:\new'}").unwrap();
        assert_eq!(value["path"], r"C:\new");
    }

    #[test]
    fn test_numeric_keys_become_text() {
        let value = parse("{1: 'one', 2.5: 'half'}").unwrap();
        assert_eq!(value["1"], "one");
        assert_eq!(value["2.5"], "half");
    }

    #[test]
    fn test_numbers() {
        assert_eq!(parse("-12").unwrap(), json!(-12));
        assert_eq!(parse("1e3").unwrap(), json!(1000.0));
        assert_eq!(parse("+0.25").unwrap(), json!(0.25));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse("{'a': }").is_err());
        assert!(parse("{'a': 1").is_err());
        assert!(parse("{'a': nan}").is_err());
        assert!(parse("{'a': 1} extra").is_err());
        assert!(parse("'unterminated").is_err());
    }
}
