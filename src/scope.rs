//! Lexical and generate scopes.
//!
//! Every declaration inside generate statements carries the dotted path
//! `arch.outer.inner`. Two scopes are related only by equality or by an
//! explicit prefix; nothing is matched by content.

use std::collections::{HashMap, HashSet};

use crate::facts::input::FileFacts;
use crate::facts::ScopeRow;

/// Nested generates deeper than this are treated as a broken parent chain.
const MAX_DEPTH: usize = 64;
const MAX_CONSTANT_DEPTH: usize = 16;

/// Join an architecture name and generate labels into a scope path.
pub fn scope_path<S: AsRef<str>>(arch: &str, labels: &[S]) -> String {
    let mut path = arch.to_string();
    for label in labels {
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(label.as_ref());
    }
    path
}

/// True when `path` is `prefix` or lies below it. Comparison ignores case,
/// as VHDL identifiers do.
pub fn is_within(path: &str, prefix: &str) -> bool {
    let path = path.to_ascii_lowercase();
    let prefix = prefix.to_ascii_lowercase();
    path == prefix || path.starts_with(&format!("{}.", prefix))
}

/// `path` and each enclosing scope, innermost first: `rtl.g1.g2`,
/// `rtl.g1`, `rtl`. Every yielded path satisfies `is_within(path, it)`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    std::iter::successors(Some(path), |p| p.rfind('.').map(|i| &p[..i]))
}

/// Architecture segment of a scope path.
pub fn root_of(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

/// Scope paths of one file, resolved from the generate parent chain.
#[derive(Debug, Default)]
pub struct FileScopes {
    /// (arch, label) lowercase -> full path.
    generate_paths: HashMap<(String, String), String>,
    rows: Vec<ScopeRow>,
}

impl FileScopes {
    pub fn build(facts: &FileFacts) -> Self {
        let mut scopes = FileScopes::default();

        for arch in &facts.architectures {
            scopes.rows.push(ScopeRow {
                name: arch.name.clone(),
                kind: "architecture".to_string(),
                parent: String::new(),
                path: arch.name.clone(),
                file: facts.path.clone(),
                line: arch.line,
            });
        }

        let parents: HashMap<(String, String), Option<&str>> = facts
            .generates
            .iter()
            .map(|g| (key(&g.arch, &g.label), g.parent.as_deref()))
            .collect();
        let labels: HashMap<(String, String), &str> = facts
            .generates
            .iter()
            .map(|g| (key(&g.arch, &g.label), g.label.as_str()))
            .collect();

        for generate in &facts.generates {
            let mut chain = vec![generate.label.as_str()];
            let mut seen = HashSet::new();
            seen.insert(key(&generate.arch, &generate.label));
            let mut parent = generate.parent.as_deref();

            while let Some(label) = parent {
                let parent_key = key(&generate.arch, label);
                let Some(&known) = labels.get(&parent_key) else {
                    tracing::warn!(
                        file = %facts.path,
                        generate = %generate.label,
                        parent = label,
                        "generate names an unknown parent, cutting scope chain"
                    );
                    break;
                };
                if !seen.insert(parent_key.clone()) || chain.len() >= MAX_DEPTH {
                    tracing::warn!(
                        file = %facts.path,
                        generate = %generate.label,
                        "generate parent chain cycles, cutting scope chain"
                    );
                    break;
                }
                chain.push(known);
                parent = parents.get(&parent_key).copied().flatten();
            }
            chain.reverse();

            let path = scope_path(&generate.arch, &chain);
            let parent_path = scope_path(&generate.arch, &chain[..chain.len() - 1]);
            scopes
                .generate_paths
                .insert(key(&generate.arch, &generate.label), path.clone());
            scopes.rows.push(ScopeRow {
                name: generate.label.clone(),
                kind: "generate".to_string(),
                parent: parent_path,
                path,
                file: facts.path.clone(),
                line: generate.line,
            });
        }

        scopes
    }

    /// Scope path for a declaration in `arch`, optionally inside the generate
    /// labelled `generate`.
    pub fn path_for(&self, arch: &str, generate: Option<&str>) -> String {
        match generate {
            Some(label) => self
                .generate_paths
                .get(&key(arch, label))
                .cloned()
                .unwrap_or_else(|| scope_path(arch, &[label])),
            None => arch.to_string(),
        }
    }

    pub fn into_rows(self) -> Vec<ScopeRow> {
        self.rows
    }
}

fn key(arch: &str, label: &str) -> (String, String) {
    (arch.to_ascii_lowercase(), label.to_ascii_lowercase())
}

/// Integer constants visible to static range evaluation.
#[derive(Debug, Clone, Default)]
pub struct ConstantEnv {
    values: HashMap<String, String>,
}

impl ConstantEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        if !value.trim().is_empty() {
            self.values
                .insert(name.to_ascii_lowercase(), value.trim().to_string());
        }
    }

    /// A copy of `self` where entries of `local` shadow existing ones.
    pub fn overlay(&self, local: &ConstantEnv) -> ConstantEnv {
        let mut merged = self.clone();
        merged
            .values
            .extend(local.values.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        // `pkg.WIDTH` refers to the same constant as `WIDTH`.
        let short = name.rsplit('.').next().unwrap_or(name.as_str());
        self.values
            .get(&name)
            .or_else(|| self.values.get(short))
            .map(String::as_str)
    }
}

/// Outcome of elaborating a generate statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elaboration {
    pub can_elaborate: bool,
    pub iteration_count: i64,
}

impl Elaboration {
    pub const UNKNOWN: Elaboration = Elaboration {
        can_elaborate: false,
        iteration_count: -1,
    };
}

/// Evaluate the range of a for-generate. Anything that is not a `for`
/// generate with static bounds is [`Elaboration::UNKNOWN`].
pub fn elaborate(kind: &str, low: &str, high: &str, dir: &str, env: &ConstantEnv) -> Elaboration {
    if !kind.eq_ignore_ascii_case("for") {
        return Elaboration::UNKNOWN;
    }
    let (Some(low), Some(high)) = (eval_static(low, env), eval_static(high, env)) else {
        return Elaboration::UNKNOWN;
    };
    let count = match dir.trim().to_ascii_lowercase().as_str() {
        "to" => high.checked_sub(low).and_then(|d| d.checked_add(1)),
        "downto" => low.checked_sub(high).and_then(|d| d.checked_add(1)),
        _ => None,
    };
    match count {
        Some(n) if n >= 0 => Elaboration {
            can_elaborate: true,
            iteration_count: n,
        },
        _ => Elaboration::UNKNOWN,
    }
}

/// Evaluate an integer expression made of literals, known constants,
/// parentheses and `+ - * /`. Returns `None` for anything else.
pub fn eval_static(expr: &str, env: &ConstantEnv) -> Option<i64> {
    eval_with_depth(expr, env, 0)
}

fn eval_with_depth(expr: &str, env: &ConstantEnv, depth: usize) -> Option<i64> {
    if depth > MAX_CONSTANT_DEPTH {
        return None;
    }
    let tokens = tokenize(expr)?;
    let mut parser = ExprParser {
        tokens: &tokens,
        pos: 0,
        env,
        depth,
    };
    let value = parser.expr()?;
    if parser.pos == tokens.len() {
        Some(value)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(i64),
    Ident(String),
    Op(char),
}

fn tokenize(expr: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = expr.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if matches!(c, '+' | '-' | '*' | '/' | '(' | ')') {
            tokens.push(Token::Op(c));
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '#')) {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::Num(parse_int_literal(&text)?));
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '.')) {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            return None;
        }
    }
    Some(tokens)
}

/// Decimal (`1_024`) or based (`16#FF#`) integer literal.
fn parse_int_literal(text: &str) -> Option<i64> {
    let cleaned: String = text.chars().filter(|c| *c != '_').collect();
    if let Some((base, rest)) = cleaned.split_once('#') {
        let digits = rest.strip_suffix('#')?;
        let base: u32 = base.parse().ok()?;
        if !(2..=16).contains(&base) || digits.is_empty() {
            return None;
        }
        return i64::from_str_radix(digits, base).ok();
    }
    cleaned.parse().ok()
}

struct ExprParser<'a> {
    tokens: &'a [Token],
    pos: usize,
    env: &'a ConstantEnv,
    depth: usize,
}

impl ExprParser<'_> {
    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(c)) => Some(*c),
            _ => None,
        }
    }

    fn expr(&mut self) -> Option<i64> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == '+' {
                value.checked_add(rhs)?
            } else {
                value.checked_sub(rhs)?
            };
        }
        Some(value)
    }

    fn term(&mut self) -> Option<i64> {
        let mut value = self.factor()?;
        while let Some(op @ ('*' | '/')) = self.peek_op() {
            self.pos += 1;
            let rhs = self.factor()?;
            value = if op == '*' {
                value.checked_mul(rhs)?
            } else {
                value.checked_div(rhs)?
            };
        }
        Some(value)
    }

    fn factor(&mut self) -> Option<i64> {
        let token = self.tokens.get(self.pos)?.clone();
        self.pos += 1;
        match token {
            Token::Num(n) => Some(n),
            Token::Op('-') => self.factor()?.checked_neg(),
            Token::Op('+') => self.factor(),
            Token::Op('(') => {
                let value = self.expr()?;
                if self.peek_op() != Some(')') {
                    return None;
                }
                self.pos += 1;
                Some(value)
            }
            Token::Ident(name) => {
                let definition = self.env.get(&name)?;
                eval_with_depth(definition, self.env, self.depth + 1)
            }
            Token::Op(_) => None,
        }
    }
}
