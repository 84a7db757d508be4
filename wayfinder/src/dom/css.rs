//! Small CSS selector engine for the in-memory backend
//!
//! Supports the subset the healing pipeline actually queries: tag, `#id`,
//! `.class`, attribute selectors (`[a]`, `[a="v"]`, `^=`, `$=`, `*=`),
//! `:not(<compound>)`, comma-separated groups, and descendant/child
//! combinators. Anything else is an invalid-selector error, which callers
//! swallow per the candidate-search failure policy.

use crate::dom::DomNode;
use crate::errors::HealError;

#[derive(Debug, Clone, PartialEq)]
pub enum AttrOp {
    Present,
    Equals(String),
    Prefix(String),
    Suffix(String),
    Contains(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimpleSelector {
    Id(String),
    Class(String),
    Attr { name: String, op: AttrOp },
    Not(Box<Compound>),
}

/// A compound selector: optional tag plus simple selectors, no combinators
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compound {
    pub tag: Option<String>,
    pub simples: Vec<SimpleSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Combinator {
    Descendant,
    Child,
}

/// One comma-group: compounds joined by combinators, left to right
#[derive(Debug, Clone, PartialEq)]
pub struct Complex {
    pub compounds: Vec<Compound>,
    /// `combinators[i]` sits between `compounds[i]` and `compounds[i + 1]`
    pub combinators: Vec<Combinator>,
}

/// A full selector list (comma-separated groups)
#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList {
    pub groups: Vec<Complex>,
}

impl SelectorList {
    pub fn parse(input: &str) -> Result<Self, HealError> {
        let mut groups = Vec::new();
        for group in split_top_level(input)? {
            let group = group.trim();
            if group.is_empty() {
                return Err(HealError::InvalidSelector(format!(
                    "empty selector group in {input:?}"
                )));
            }
            groups.push(parse_complex(group)?);
        }
        if groups.is_empty() {
            return Err(HealError::InvalidSelector("empty selector".into()));
        }
        Ok(Self { groups })
    }

    /// True when any group matches `node`
    pub fn matches(&self, node: &DomNode) -> bool {
        self.groups.iter().any(|g| matches_complex(g, node))
    }
}

/// Split on commas that are not inside brackets or :not(...) parens
fn split_top_level(input: &str) -> Result<Vec<String>, HealError> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for ch in input.chars() {
        match ch {
            '[' | '(' => {
                depth += 1;
                current.push(ch);
            }
            ']' | ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err(HealError::InvalidSelector(format!(
                        "unbalanced brackets in {input:?}"
                    )));
                }
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    if depth != 0 {
        return Err(HealError::InvalidSelector(format!(
            "unbalanced brackets in {input:?}"
        )));
    }
    parts.push(current);
    Ok(parts)
}

fn parse_complex(input: &str) -> Result<Complex, HealError> {
    let mut compounds = Vec::new();
    let mut combinators = Vec::new();
    let mut rest = input.trim();

    loop {
        let (compound, remaining) = parse_compound(rest)?;
        compounds.push(compound);
        rest = remaining.trim_start();
        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix('>') {
            combinators.push(Combinator::Child);
            rest = stripped.trim_start();
        } else {
            combinators.push(Combinator::Descendant);
        }
        if rest.is_empty() {
            return Err(HealError::InvalidSelector(format!(
                "dangling combinator in {input:?}"
            )));
        }
    }

    Ok(Complex {
        compounds,
        combinators,
    })
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

fn take_ident(input: &str) -> (String, &str) {
    let end = input
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    (input[..end].to_string(), &input[end..])
}

/// Parse one compound selector; stops at whitespace or `>`
fn parse_compound(input: &str) -> Result<(Compound, &str), HealError> {
    let mut compound = Compound::default();
    let mut rest = input;
    let mut first = true;

    loop {
        let Some(ch) = rest.chars().next() else { break };
        match ch {
            '*' if first => {
                rest = &rest[1..];
            }
            '#' => {
                let (ident, remaining) = take_ident(&rest[1..]);
                if ident.is_empty() {
                    return Err(HealError::InvalidSelector(format!("bare # in {input:?}")));
                }
                compound.simples.push(SimpleSelector::Id(ident));
                rest = remaining;
            }
            '.' => {
                let (ident, remaining) = take_ident(&rest[1..]);
                if ident.is_empty() {
                    return Err(HealError::InvalidSelector(format!("bare . in {input:?}")));
                }
                compound.simples.push(SimpleSelector::Class(ident));
                rest = remaining;
            }
            '[' => {
                let close = rest.find(']').ok_or_else(|| {
                    HealError::InvalidSelector(format!("unclosed [ in {input:?}"))
                })?;
                compound
                    .simples
                    .push(parse_attr(&rest[1..close], input)?);
                rest = &rest[close + 1..];
            }
            ':' => {
                let after = &rest[1..];
                let Some(arg_start) = after.strip_prefix("not(") else {
                    return Err(HealError::InvalidSelector(format!(
                        "unsupported pseudo-class in {input:?}"
                    )));
                };
                let close = arg_start.find(')').ok_or_else(|| {
                    HealError::InvalidSelector(format!("unclosed :not( in {input:?}"))
                })?;
                let (inner, inner_rest) = parse_compound(arg_start[..close].trim())?;
                if !inner_rest.trim().is_empty() {
                    return Err(HealError::InvalidSelector(format!(
                        "unsupported :not() argument in {input:?}"
                    )));
                }
                compound.simples.push(SimpleSelector::Not(Box::new(inner)));
                rest = &arg_start[close + 1..];
            }
            c if first && (c.is_ascii_alphabetic()) => {
                let (ident, remaining) = take_ident(rest);
                compound.tag = Some(ident.to_ascii_lowercase());
                rest = remaining;
            }
            c if c.is_whitespace() || c == '>' => break,
            _ => {
                return Err(HealError::InvalidSelector(format!(
                    "unexpected {ch:?} in {input:?}"
                )));
            }
        }
        first = false;
    }

    if compound.tag.is_none() && compound.simples.is_empty() {
        return Err(HealError::InvalidSelector(format!(
            "empty compound in {input:?}"
        )));
    }
    Ok((compound, rest))
}

fn parse_attr(body: &str, context: &str) -> Result<SimpleSelector, HealError> {
    let body = body.trim();
    let op_pos = body.find(['^', '$', '*', '='].as_ref());
    let Some(pos) = op_pos else {
        let (name, rest) = take_ident(body);
        if name.is_empty() || !rest.trim().is_empty() {
            return Err(HealError::InvalidSelector(format!(
                "bad attribute selector in {context:?}"
            )));
        }
        return Ok(SimpleSelector::Attr {
            name: name.to_ascii_lowercase(),
            op: AttrOp::Present,
        });
    };

    let (name_part, op_part) = body.split_at(pos);
    let name = name_part.trim().to_ascii_lowercase();
    if name.is_empty() {
        return Err(HealError::InvalidSelector(format!(
            "bad attribute selector in {context:?}"
        )));
    }
    let (op_kind, value_part) = if let Some(v) = op_part.strip_prefix("^=") {
        ('^', v)
    } else if let Some(v) = op_part.strip_prefix("$=") {
        ('$', v)
    } else if let Some(v) = op_part.strip_prefix("*=") {
        ('*', v)
    } else if let Some(v) = op_part.strip_prefix('=') {
        ('=', v)
    } else {
        return Err(HealError::InvalidSelector(format!(
            "bad attribute operator in {context:?}"
        )));
    };

    let value = unquote(value_part.trim());
    let op = match op_kind {
        '^' => AttrOp::Prefix(value),
        '$' => AttrOp::Suffix(value),
        '*' => AttrOp::Contains(value),
        _ => AttrOp::Equals(value),
    };
    Ok(SimpleSelector::Attr { name, op })
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

fn matches_compound(compound: &Compound, node: &DomNode) -> bool {
    if let Some(tag) = &compound.tag {
        if node.tag_name() != *tag {
            return false;
        }
    }
    compound.simples.iter().all(|simple| match simple {
        SimpleSelector::Id(id) => node.id().as_deref() == Some(id.as_str()),
        SimpleSelector::Class(class) => node.classes().iter().any(|c| c == class),
        SimpleSelector::Attr { name, op } => {
            let value = node.attribute(name);
            match op {
                AttrOp::Present => value.is_some(),
                AttrOp::Equals(v) => value.as_deref() == Some(v.as_str()),
                AttrOp::Prefix(v) => value.map(|a| a.starts_with(v)).unwrap_or(false),
                AttrOp::Suffix(v) => value.map(|a| a.ends_with(v)).unwrap_or(false),
                AttrOp::Contains(v) => value.map(|a| a.contains(v.as_str())).unwrap_or(false),
            }
        }
        SimpleSelector::Not(inner) => !matches_compound(inner, node),
    })
}

/// Match a complex selector right-to-left from `node`
fn matches_complex(complex: &Complex, node: &DomNode) -> bool {
    fn matches_from(complex: &Complex, index: usize, node: &DomNode) -> bool {
        if !matches_compound(&complex.compounds[index], node) {
            return false;
        }
        if index == 0 {
            return true;
        }
        match complex.combinators[index - 1] {
            Combinator::Child => node
                .parent()
                .map(|p| matches_from(complex, index - 1, &p))
                .unwrap_or(false),
            Combinator::Descendant => {
                let mut current = node.parent();
                while let Some(ancestor) = current {
                    if matches_from(complex, index - 1, &ancestor) {
                        return true;
                    }
                    current = ancestor.parent();
                }
                false
            }
        }
    }
    matches_from(complex, complex.compounds.len() - 1, node)
}
