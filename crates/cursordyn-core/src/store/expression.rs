//! Parser for key-condition expressions.
//!
//! Accepted forms, with `#name` and `:value` placeholders resolved against the
//! request's attribute maps:
//!
//! ```text
//! #pk = :pk
//! #pk = :pk AND #sk <op> :sk          (op is =, <, <=, >, >=)
//! #pk = :pk AND #sk BETWEEN :lo AND :hi
//! #pk = :pk AND begins_with(#sk, :prefix)
//! ```

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::types::KeyValue;

/// Condition on the sort key of the queried index.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyPredicate {
    Eq(KeyValue),
    Lt(KeyValue),
    Le(KeyValue),
    Gt(KeyValue),
    Ge(KeyValue),
    Between(KeyValue, KeyValue),
    BeginsWith(String),
}

impl SortKeyPredicate {
    /// Values of a different scalar kind never match.
    pub fn matches(&self, val: &KeyValue) -> bool {
        match self {
            SortKeyPredicate::Eq(v) => val == v,
            SortKeyPredicate::Lt(v) => v.same_kind(val) && val < v,
            SortKeyPredicate::Le(v) => v.same_kind(val) && val <= v,
            SortKeyPredicate::Gt(v) => v.same_kind(val) && val > v,
            SortKeyPredicate::Ge(v) => v.same_kind(val) && val >= v,
            SortKeyPredicate::Between(lo, hi) => lo.same_kind(val) && val >= lo && val <= hi,
            SortKeyPredicate::BeginsWith(prefix) => {
                val.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
        }
    }
}

/// A parsed key-condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyExpression {
    pub partition_attr: String,
    pub partition_value: KeyValue,
    pub sort: Option<(String, SortKeyPredicate)>,
}

impl KeyExpression {
    pub fn parse(
        expr: &str,
        names: &BTreeMap<String, String>,
        values: &BTreeMap<String, KeyValue>,
    ) -> Result<Self, StoreError> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            names,
            values,
        };

        let partition_attr = parser.name()?;
        parser.expect("=")?;
        let partition_value = parser.value()?;

        let sort = if parser.at_end() {
            None
        } else {
            parser.keyword("AND")?;
            Some(parser.sort_condition()?)
        };

        if !parser.at_end() {
            return Err(invalid(format!(
                "unexpected token '{}'",
                parser.tokens[parser.pos]
            )));
        }

        Ok(KeyExpression {
            partition_attr,
            partition_value,
            sort,
        })
    }
}

fn invalid(msg: impl Into<String>) -> StoreError {
    StoreError::InvalidExpression(msg.into())
}

/// Split an expression into words, punctuation and comparison operators.
fn tokenize(input: &str) -> Result<Vec<String>, StoreError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if matches!(c, '(' | ')' | ',' | '=') {
            tokens.push(c.to_string());
            i += 1;
            continue;
        }

        if c == '<' || c == '>' {
            if chars.get(i + 1) == Some(&'=') {
                tokens.push(format!("{c}="));
                i += 2;
            } else {
                tokens.push(c.to_string());
                i += 1;
            }
            continue;
        }

        let start = i;
        while i < chars.len() && is_word_char(chars[i]) {
            i += 1;
        }
        if start == i {
            return Err(invalid(format!("unexpected character '{c}'")));
        }
        tokens.push(chars[start..i].iter().collect());
    }

    Ok(tokens)
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '#' | ':' | '-' | '.')
}

struct Parser<'a> {
    tokens: Vec<String>,
    pos: usize,
    names: &'a BTreeMap<String, String>,
    values: &'a BTreeMap<String, KeyValue>,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn next(&mut self) -> Result<&str, StoreError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| invalid("unexpected end of expression"))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn expect(&mut self, want: &str) -> Result<(), StoreError> {
        let got = self.next()?;
        if got != want {
            return Err(invalid(format!("expected '{want}', found '{got}'")));
        }
        Ok(())
    }

    fn keyword(&mut self, want: &str) -> Result<(), StoreError> {
        let got = self.next()?;
        if !got.eq_ignore_ascii_case(want) {
            return Err(invalid(format!("expected {want}, found '{got}'")));
        }
        Ok(())
    }

    /// An attribute name, either literal or a `#placeholder`.
    fn name(&mut self) -> Result<String, StoreError> {
        let token = self.next()?.to_string();
        if token.starts_with('#') {
            return self
                .names
                .get(&token)
                .cloned()
                .ok_or_else(|| invalid(format!("undefined attribute name placeholder {token}")));
        }
        if token.starts_with(':') || !token.chars().all(is_word_char) {
            return Err(invalid(format!("expected attribute name, found '{token}'")));
        }
        Ok(token)
    }

    /// A `:placeholder` value.
    fn value(&mut self) -> Result<KeyValue, StoreError> {
        let token = self.next()?.to_string();
        if !token.starts_with(':') {
            return Err(invalid(format!("expected value placeholder, found '{token}'")));
        }
        self.values
            .get(&token)
            .cloned()
            .ok_or_else(|| invalid(format!("undefined value placeholder {token}")))
    }

    fn sort_condition(&mut self) -> Result<(String, SortKeyPredicate), StoreError> {
        if self
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case("begins_with"))
        {
            self.pos += 1;
            self.expect("(")?;
            let attr = self.name()?;
            self.expect(",")?;
            let prefix = match self.value()? {
                KeyValue::String(s) => s,
                KeyValue::Number(_) => {
                    return Err(invalid("begins_with requires a string operand"));
                }
            };
            self.expect(")")?;
            return Ok((attr, SortKeyPredicate::BeginsWith(prefix)));
        }

        let attr = self.name()?;
        let op = self.next()?.to_string();
        let predicate = match op.as_str() {
            "=" => SortKeyPredicate::Eq(self.value()?),
            "<" => SortKeyPredicate::Lt(self.value()?),
            "<=" => SortKeyPredicate::Le(self.value()?),
            ">" => SortKeyPredicate::Gt(self.value()?),
            ">=" => SortKeyPredicate::Ge(self.value()?),
            other if other.eq_ignore_ascii_case("BETWEEN") => {
                let low = self.value()?;
                self.keyword("AND")?;
                let high = self.value()?;
                SortKeyPredicate::Between(low, high)
            }
            other => return Err(invalid(format!("unknown operator '{other}'"))),
        };
        Ok((attr, predicate))
    }
}
