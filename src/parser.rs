//! PEST front end for the small languages found inside table cells: constant expressions
//! and domain (legal-value) lists.

use crate::error::{GenError, Result};
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct CellParser;

/// Binary operators of the constant-expression language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Shl,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinOp::Shl => 1,
            BinOp::Add | BinOp::Sub => 2,
            BinOp::Mul | BinOp::Div => 3,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Shl => "<<",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
        }
    }
}

/// One lexical token of a constant expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Literal value and its source spelling (hex literals keep their form).
    Number { value: i64, text: String },
    Ident(String),
    SizeOf(String),
    Op(BinOp),
    Open,
    Close,
}

/// Split a constant expression into tokens.
pub fn tokenize_expr(source: &str) -> Result<Vec<Token>> {
    let pairs = CellParser::parse(Rule::expression, source)
        .map_err(|e| GenError::expression(source, format!("syntax: {}", e)))?;
    let expression = pairs
        .into_iter()
        .next()
        .ok_or_else(|| GenError::expression(source, "empty parse"))?;

    let mut tokens = Vec::new();
    for pair in expression.into_inner() {
        let token = match pair.as_rule() {
            Rule::hex_literal => {
                let text = pair.as_str();
                let value = i64::from_str_radix(&text[2..], 16)
                    .map_err(|_| GenError::expression(source, format!("hex literal {} out of range", text)))?;
                Token::Number { value, text: text.to_string() }
            }
            Rule::dec_literal => {
                let text = pair.as_str();
                let value = text
                    .parse::<i64>()
                    .map_err(|_| GenError::expression(source, format!("literal {} out of range", text)))?;
                Token::Number { value, text: text.to_string() }
            }
            Rule::identifier => Token::Ident(pair.as_str().to_string()),
            Rule::sizeof_op => {
                let ty = pair
                    .into_inner()
                    .next()
                    .ok_or_else(|| GenError::expression(source, "sizeof without a type"))?;
                Token::SizeOf(ty.as_str().to_string())
            }
            Rule::shift_op => Token::Op(BinOp::Shl),
            Rule::add_op => Token::Op(BinOp::Add),
            Rule::sub_op => Token::Op(BinOp::Sub),
            Rule::mul_op => Token::Op(BinOp::Mul),
            Rule::div_op => Token::Op(BinOp::Div),
            Rule::open_paren => Token::Open,
            Rule::close_paren => Token::Close,
            Rule::EOI => continue,
            other => {
                return Err(GenError::expression(source, format!("unexpected rule {:?}", other)));
            }
        };
        tokens.push(token);
    }
    Ok(tokens)
}

/// One item of a domain cell, before it is turned into a constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainItem {
    Value(String),
    Range { min: Option<String>, max: Option<String> },
}

/// Parse a domain cell (`VALUE`, `{a, b}`, `{min:max}`) into its items.
pub fn parse_domain(source: &str) -> Result<Vec<DomainItem>> {
    let pairs = CellParser::parse(Rule::domain, source)
        .map_err(|e| GenError::expression(source, format!("domain syntax: {}", e)))?;
    let domain = pairs
        .into_iter()
        .next()
        .ok_or_else(|| GenError::expression(source, "empty parse"))?;

    let mut items = Vec::new();
    for pair in domain.into_inner() {
        match pair.as_rule() {
            Rule::value_item => {
                let bound = pair.into_inner().next().map(|b| b.as_str().trim().to_string());
                if let Some(value) = bound.filter(|v| !v.is_empty()) {
                    items.push(DomainItem::Value(value));
                }
            }
            Rule::range_item => {
                // `bound? ":" bound?`: a bound before the colon is the minimum.
                let colon = pair.as_span().start() + pair.as_str().find(':').unwrap_or(0);
                let mut min = None;
                let mut max = None;
                for bound in pair.into_inner() {
                    let value = bound.as_str().trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    if bound.as_span().start() < colon {
                        min = Some(value);
                    } else {
                        max = Some(value);
                    }
                }
                items.push(DomainItem::Range { min, max });
            }
            _ => {}
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_hex_sizeof_and_operators() {
        let tokens = tokenize_expr("sizeof(UINT32) + 0x10 << 2").expect("tokenize");
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], Token::SizeOf("UINT32".to_string()));
        assert_eq!(tokens[1], Token::Op(BinOp::Add));
        assert_eq!(
            tokens[2],
            Token::Number { value: 16, text: "0x10".to_string() }
        );
        assert_eq!(tokens[3], Token::Op(BinOp::Shl));
    }

    #[test]
    fn identifier_starting_with_sizeof_is_not_an_operator() {
        let tokens = tokenize_expr("sizeofTable").expect("tokenize");
        assert_eq!(tokens, vec![Token::Ident("sizeofTable".to_string())]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(tokenize_expr("1 + $").is_err());
    }

    #[test]
    fn domain_list_and_ranges() {
        let items = parse_domain("{1, 2, TPM_ALG_NULL}").expect("parse");
        assert_eq!(
            items,
            vec![
                DomainItem::Value("1".into()),
                DomainItem::Value("2".into()),
                DomainItem::Value("TPM_ALG_NULL".into()),
            ]
        );
        let items = parse_domain("{:sizeof(TPMU_HA)}").expect("parse");
        assert_eq!(
            items,
            vec![DomainItem::Range { min: None, max: Some("sizeof(TPMU_HA)".into()) }]
        );
        let items = parse_domain("{TPM_RH_FIRST : TPM_RH_LAST}").expect("parse");
        assert_eq!(
            items,
            vec![DomainItem::Range {
                min: Some("TPM_RH_FIRST".into()),
                max: Some("TPM_RH_LAST".into()),
            }]
        );
    }

    #[test]
    fn empty_domain() {
        assert!(parse_domain("").expect("parse").is_empty());
        assert!(parse_domain("{}").expect("parse").is_empty());
    }
}
