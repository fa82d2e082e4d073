//! Line-oriented parser for the supported statement subset.
//!
//! Source is normalized into one statement per line first: `//` comments are
//! dropped, lines are split on top-level `;`, and braces are moved onto their
//! own lines (`} else {` stays together). Statements are then recognized by
//! their leading tokens and nested blocks are cut out by brace counting.

use super::ast::{
    AssignmentOperator, DeclarationKind, Expression, Literal, ParseWarning, Program, Statement,
    UpdateOperator,
};
use crate::error::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// Deepest block or expression nesting accepted before the parse is aborted
pub const MAX_NESTING_DEPTH: usize = 64;

lazy_static! {
    static ref FUNCTION_DECL: Regex =
        Regex::new(r"^function\s+([A-Za-z_$][\w$]*)\s*\(([^)]*)\)\s*\{$").expect("valid regex");
    static ref IF_STMT: Regex = Regex::new(r"^if\s*\((.*)\)\s*\{$").expect("valid regex");
    static ref ELSE_IF: Regex =
        Regex::new(r"^\}?\s*else\s+if\s*\((.*)\)\s*\{$").expect("valid regex");
    static ref ELSE: Regex = Regex::new(r"^\}?\s*else\s*\{$").expect("valid regex");
    static ref FOR_STMT: Regex = Regex::new(r"^for\s*\((.*)\)\s*\{$").expect("valid regex");
    static ref VAR_DECL: Regex =
        Regex::new(r"^(var|let|const)\s+([A-Za-z_$][\w$]*)\s*=\s*(.+)$").expect("valid regex");
    static ref VAR_DECL_BARE: Regex =
        Regex::new(r"^(var|let|const)\s+([A-Za-z_$][\w$]*)$").expect("valid regex");
    static ref RETURN_STMT: Regex = Regex::new(r"^return(?:\s+(.+))?$").expect("valid regex");
    static ref POSTFIX_UPDATE: Regex =
        Regex::new(r"^([A-Za-z_$][\w$]*)\s*(\+\+|--)$").expect("valid regex");
    static ref PREFIX_UPDATE: Regex =
        Regex::new(r"^(\+\+|--)\s*([A-Za-z_$][\w$]*)$").expect("valid regex");
    static ref ASSIGNMENT: Regex =
        Regex::new(r"^([A-Za-z_$][\w$]*)\s*([+\-*/%]?=)\s*(.+)$").expect("valid regex");
    static ref CALL: Regex =
        Regex::new(r"^([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)\s*\((.*)\)$").expect("valid regex");
    static ref NUMBER: Regex = Regex::new(r"^-?\d+(\.\d+)?$").expect("valid regex");
    static ref MEMBER: Regex =
        Regex::new(r"^[A-Za-z_$][\w$]*(\.[A-Za-z_$][\w$]*)+$").expect("valid regex");
}

/// One normalized statement line with its original line number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// 1-indexed line in the original source
    pub number: usize,
    /// Normalized statement text
    pub text: String,
}

/// Parser for the line-oriented statement subset
pub struct LineParser {
    lines: Vec<SourceLine>,
    warnings: Vec<ParseWarning>,
}

impl LineParser {
    /// Creates a parser over source text
    pub fn new(source: &str) -> Self {
        LineParser {
            lines: normalize(source),
            warnings: Vec::new(),
        }
    }

    /// Normalized lines the parser works on
    pub fn lines(&self) -> &[SourceLine] {
        &self.lines
    }

    /// Parses the whole source into a program
    pub fn parse(&mut self) -> Result<Program> {
        let lines = std::mem::take(&mut self.lines);
        let body = self.parse_block(&lines, 0);
        self.lines = lines;
        let body = body.map_err(|err| match err {
            Error::SyntaxError { .. } | Error::ParseError(_) | Error::ResourceLimit { .. } => err,
            other => Error::ParseError(other.to_string()),
        })?;

        Ok(Program {
            body,
            warnings: std::mem::take(&mut self.warnings),
        })
    }

    fn parse_block(&mut self, lines: &[SourceLine], depth: usize) -> Result<Vec<Statement>> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::ResourceLimit {
                what: "block nesting depth".to_string(),
                limit: MAX_NESTING_DEPTH,
            });
        }

        let mut statements = Vec::new();
        let mut index = 0;
        while index < lines.len() {
            let (statement, next) = self.parse_statement(lines, index, depth)?;
            if let Some(statement) = statement {
                statements.push(statement);
            }
            index = next;
        }
        Ok(statements)
    }

    /// Parses the statement starting at `index`, returning it and the index after it
    fn parse_statement(
        &mut self,
        lines: &[SourceLine],
        index: usize,
        depth: usize,
    ) -> Result<(Option<Statement>, usize)> {
        let line = &lines[index];
        let text = line.text.as_str();

        if let Some(caps) = FUNCTION_DECL.captures(text) {
            let name = caps[1].to_string();
            let params = caps[2]
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            let (block, close) = extract_block(lines, index)?;
            let body = self.parse_block(block, depth + 1)?;
            return Ok((
                Some(Statement::FunctionDeclaration { name, params, body }),
                close + 1,
            ));
        }

        if let Some(caps) = IF_STMT.captures(text) {
            let condition = caps[1].to_string();
            return self.parse_if(lines, index, &condition, depth);
        }

        if let Some(caps) = FOR_STMT.captures(text) {
            let header = caps[1].to_string();
            let (block, close) = extract_block(lines, index)?;
            let parts = split_top_level(&header, ';');
            if parts.len() != 3 {
                self.warn(line, "for-statement header needs exactly three clauses");
                return Ok((None, close + 1));
            }

            let init = match parts[0].trim() {
                "" => None,
                clause => match self.parse_simple_statement(clause, depth + 1)? {
                    Some(stmt) => Some(Box::new(stmt)),
                    None => {
                        self.warn(line, "unrecognized for-statement initializer");
                        None
                    }
                },
            };
            let test = match parts[1].trim() {
                "" => None,
                clause => Some(parse_expression(clause, depth + 1)?),
            };
            let update = match parts[2].trim() {
                "" => None,
                clause => Some(parse_inline_expression(clause, depth + 1)?),
            };
            let body = self.parse_block(block, depth + 1)?;
            return Ok((
                Some(Statement::ForStatement {
                    init,
                    test,
                    update,
                    body,
                }),
                close + 1,
            ));
        }

        if let Some(statement) = self.parse_simple_statement(text, depth)? {
            return Ok((Some(statement), index + 1));
        }

        if text.starts_with('}') || text.starts_with("else") {
            self.warn(line, "unexpected block delimiter");
        } else {
            self.warn(line, "unrecognized statement");
        }
        Ok((None, index + 1))
    }

    fn parse_if(
        &mut self,
        lines: &[SourceLine],
        index: usize,
        condition: &str,
        depth: usize,
    ) -> Result<(Option<Statement>, usize)> {
        if depth > MAX_NESTING_DEPTH {
            return Err(Error::ResourceLimit {
                what: "block nesting depth".to_string(),
                limit: MAX_NESTING_DEPTH,
            });
        }

        let test = parse_expression(condition, depth + 1)?;
        let (block, close) = extract_block(lines, index)?;
        let consequent = self.parse_block(block, depth + 1)?;

        // `} else {` shares the closing line; a lone `}` may be followed by `else {`
        let closing = lines[close].text.as_str();
        let else_at = if closing != "}" {
            Some(close)
        } else if close + 1 < lines.len() && lines[close + 1].text.starts_with("else") {
            Some(close + 1)
        } else {
            None
        };

        let Some(else_index) = else_at else {
            return Ok((
                Some(Statement::IfStatement {
                    test,
                    consequent,
                    alternate: None,
                }),
                close + 1,
            ));
        };

        let else_text = lines[else_index].text.clone();
        if let Some(caps) = ELSE_IF.captures(&else_text) {
            let nested_condition = caps[1].to_string();
            let (nested, next) = self.parse_if(lines, else_index, &nested_condition, depth + 1)?;
            return Ok((
                Some(Statement::IfStatement {
                    test,
                    consequent,
                    alternate: Some(nested.into_iter().collect()),
                }),
                next,
            ));
        }

        if ELSE.is_match(&else_text) {
            let (block, else_close) = extract_block(lines, else_index)?;
            let alternate = self.parse_block(block, depth + 1)?;
            return Ok((
                Some(Statement::IfStatement {
                    test,
                    consequent,
                    alternate: Some(alternate),
                }),
                else_close + 1,
            ));
        }

        self.warn(&lines[else_index], "malformed else clause");
        Ok((
            Some(Statement::IfStatement {
                test,
                consequent,
                alternate: None,
            }),
            close + 1,
        ))
    }

    /// Statements that fit on one line: declarations, returns, updates,
    /// assignments and bare calls
    fn parse_simple_statement(&mut self, text: &str, depth: usize) -> Result<Option<Statement>> {
        if let Some(caps) = VAR_DECL.captures(text) {
            let kind = DeclarationKind::from_keyword(&caps[1]).unwrap_or(DeclarationKind::Var);
            return Ok(Some(Statement::VariableDeclaration {
                kind,
                name: caps[2].to_string(),
                init: Some(parse_expression(&caps[3], depth + 1)?),
            }));
        }

        if let Some(caps) = VAR_DECL_BARE.captures(text) {
            let kind = DeclarationKind::from_keyword(&caps[1]).unwrap_or(DeclarationKind::Var);
            return Ok(Some(Statement::VariableDeclaration {
                kind,
                name: caps[2].to_string(),
                init: None,
            }));
        }

        if let Some(caps) = RETURN_STMT.captures(text) {
            let argument = match caps.get(1) {
                Some(value) => Some(parse_expression(value.as_str(), depth + 1)?),
                None => None,
            };
            return Ok(Some(Statement::ReturnStatement { argument }));
        }

        if let Some(update) = parse_update(text) {
            return Ok(Some(Statement::ExpressionStatement(update)));
        }

        if let Some(assignment) = parse_assignment(text, depth)? {
            return Ok(Some(Statement::ExpressionStatement(assignment)));
        }

        if let Some(call) = parse_call(text, depth)? {
            return Ok(Some(Statement::ExpressionStatement(call)));
        }

        Ok(None)
    }

    fn warn(&mut self, line: &SourceLine, message: &str) {
        tracing::debug!("skipping line {}: {} ({})", line.number, message, line.text);
        self.warnings.push(ParseWarning {
            line: line.number,
            text: line.text.clone(),
            message: message.to_string(),
        });
    }
}

/// Parses source text into a program
pub fn parse(source: &str) -> Result<Program> {
    LineParser::new(source).parse()
}

/// Splits source into normalized statement lines
pub fn normalize(source: &str) -> Vec<SourceLine> {
    let mut lines = Vec::new();
    for (i, raw) in source.lines().enumerate() {
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }
        for piece in split_top_level(text, ';') {
            for part in split_braces(piece) {
                lines.push(SourceLine {
                    number: i + 1,
                    text: part,
                });
            }
        }
    }
    lines
}

/// Cuts out the block opened on line `header`. Returns the block's lines and
/// the index of the line that closes it.
fn extract_block(lines: &[SourceLine], header: usize) -> Result<(&[SourceLine], usize)> {
    let mut depth: i64 = 1;
    for (index, line) in lines.iter().enumerate().skip(header + 1) {
        for brace in braces_outside_quotes(&line.text) {
            depth += if brace == '{' { 1 } else { -1 };
            if depth == 0 {
                return Ok((&lines[header + 1..index], index));
            }
        }
    }
    Err(Error::syntax(
        lines[header].number,
        format!("block opened by '{}' is never closed", lines[header].text),
    ))
}

fn braces_outside_quotes(text: &str) -> Vec<char> {
    let mut braces = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for ch in text.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '{' | '}' => braces.push(ch),
            _ => {}
        }
    }
    braces
}

fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut previous_slash = false;
    for (i, ch) in line.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                previous_slash = false;
            }
            '/' if previous_slash => return &line[..i - 1],
            '/' => previous_slash = true,
            _ => previous_slash = false,
        }
    }
    line
}

/// Splits on `sep` outside quotes, parentheses and brackets. Empty pieces are
/// kept so callers can count clauses.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth: i64 = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, ch) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => quote = Some(ch),
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                pieces.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces.into_iter().map(str::trim).collect()
}

/// Puts `{` at the end of its line and `}` at the start of its own line
fn split_braces(piece: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    let flush = |current: &mut String, parts: &mut Vec<String>| {
        let trimmed = current.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed.to_string());
        }
        current.clear();
    };

    for (i, ch) in piece.char_indices() {
        if let Some(q) = quote {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                current.push(ch);
            }
            '{' => {
                current.push(ch);
                flush(&mut current, &mut parts);
            }
            '}' => {
                flush(&mut current, &mut parts);
                current.push(ch);
                if !piece[i + 1..].trim_start().starts_with("else") {
                    flush(&mut current, &mut parts);
                }
            }
            _ => current.push(ch),
        }
    }
    flush(&mut current, &mut parts);
    parts
}

/// `name++`, `--name`
fn parse_update(text: &str) -> Option<Expression> {
    let operator = |token: &str| {
        if token == "++" {
            UpdateOperator::Increment
        } else {
            UpdateOperator::Decrement
        }
    };
    if let Some(caps) = POSTFIX_UPDATE.captures(text) {
        return Some(Expression::Update {
            operator: operator(&caps[2]),
            target: caps[1].to_string(),
            prefix: false,
        });
    }
    if let Some(caps) = PREFIX_UPDATE.captures(text) {
        return Some(Expression::Update {
            operator: operator(&caps[1]),
            target: caps[2].to_string(),
            prefix: true,
        });
    }
    None
}

/// `name = value` and compound forms; `a == b` is not an assignment
fn parse_assignment(text: &str, depth: usize) -> Result<Option<Expression>> {
    let Some(caps) = ASSIGNMENT.captures(text) else {
        return Ok(None);
    };
    let value = caps[3].trim();
    if value.starts_with('=') {
        return Ok(None);
    }
    let Some(operator) = AssignmentOperator::from_token(&caps[2]) else {
        return Ok(None);
    };
    Ok(Some(Expression::Assignment {
        operator,
        target: caps[1].to_string(),
        value: Box::new(parse_expression(value, depth + 1)?),
    }))
}

/// `name(args)` where the final `)` closes the argument list
fn parse_call(text: &str, depth: usize) -> Result<Option<Expression>> {
    let Some(caps) = CALL.captures(text) else {
        return Ok(None);
    };
    let open = caps.get(1).map_or(0, |m| m.end());
    let Some(open) = text[open..].find('(').map(|offset| open + offset) else {
        return Ok(None);
    };
    if matching_close(text, open) != Some(text.len() - 1) {
        return Ok(None);
    }

    let callee = callee_expression(&caps[1]);
    let inner = &text[open + 1..text.len() - 1];
    let mut arguments = Vec::new();
    if !inner.trim().is_empty() {
        for arg in split_top_level(inner, ',') {
            arguments.push(parse_expression(arg, depth + 1)?);
        }
    }
    Ok(Some(Expression::Call {
        callee: Box::new(callee),
        arguments,
    }))
}

fn callee_expression(dotted: &str) -> Expression {
    let mut parts = dotted.split('.');
    let mut expr = Expression::Identifier(parts.next().unwrap_or_default().to_string());
    for property in parts {
        expr = Expression::Member {
            object: Box::new(expr),
            property: property.to_string(),
        };
    }
    expr
}

/// Byte index of the bracket closing the one at `open`
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let (opener, closer) = match bytes.get(open)? {
        b'(' => (b'(', b')'),
        b'[' => (b'[', b']'),
        _ => return None,
    };
    let mut depth = 0i64;
    let mut quote: Option<u8> = None;
    let mut i = open;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else if b == b'"' || b == b'\'' {
            quote = Some(b);
        } else if b == opener {
            depth += 1;
        } else if b == closer {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
        i += 1;
    }
    None
}

/// For-loop update clauses: updates and assignments before plain expressions
fn parse_inline_expression(text: &str, depth: usize) -> Result<Expression> {
    if let Some(update) = parse_update(text) {
        return Ok(update);
    }
    if let Some(assignment) = parse_assignment(text, depth)? {
        return Ok(assignment);
    }
    parse_expression(text, depth)
}

/// Parses an expression: string, number, keyword literal, one top-level
/// operator split, call, member, array, identifier
pub fn parse_expression(text: &str, depth: usize) -> Result<Expression> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::ResourceLimit {
            what: "expression nesting depth".to_string(),
            limit: MAX_NESTING_DEPTH,
        });
    }

    let text = text.trim();

    // (expr) -> expr
    if text.starts_with('(') && matching_close(text, 0) == Some(text.len() - 1) {
        return parse_expression(&text[1..text.len() - 1], depth + 1);
    }

    if let Some(s) = string_literal(text) {
        return Ok(Expression::Literal(Literal::Str(s)));
    }

    if NUMBER.is_match(text) {
        if !text.contains('.') {
            if let Ok(n) = text.parse::<i64>() {
                return Ok(Expression::Literal(Literal::Int(n)));
            }
        }
        let f = text
            .parse::<f64>()
            .map_err(|e| Error::ParseError(format!("invalid number '{}': {}", text, e)))?;
        return Ok(Expression::Literal(Literal::Float(f)));
    }

    match text {
        "true" => return Ok(Expression::Literal(Literal::Bool(true))),
        "false" => return Ok(Expression::Literal(Literal::Bool(false))),
        "null" | "undefined" => return Ok(Expression::Literal(Literal::Null)),
        _ => {}
    }

    if let Some((pos, token, operator)) = find_top_level_operator(text) {
        let left = text[..pos].trim();
        let right = text[pos + token.len()..].trim();
        if !left.is_empty() && !right.is_empty() {
            let left = Box::new(parse_expression(left, depth + 1)?);
            let right = Box::new(parse_expression(right, depth + 1)?);
            return Ok(if operator.is_logical() {
                Expression::Logical {
                    operator,
                    left,
                    right,
                }
            } else {
                Expression::Binary {
                    operator,
                    left,
                    right,
                }
            });
        }
    }

    if let Some(call) = parse_call(text, depth)? {
        return Ok(call);
    }

    if MEMBER.is_match(text) {
        return Ok(callee_expression(text));
    }

    if text.starts_with('[') && matching_close(text, 0) == Some(text.len() - 1) {
        let inner = &text[1..text.len() - 1];
        let mut elements = Vec::new();
        if !inner.trim().is_empty() {
            for element in split_top_level(inner, ',') {
                elements.push(parse_expression(element, depth + 1)?);
            }
        }
        return Ok(Expression::Array(elements));
    }

    Ok(Expression::Identifier(text.to_string()))
}

fn string_literal(text: &str) -> Option<String> {
    let mut chars = text.chars();
    let quote = chars.next()?;
    if (quote != '"' && quote != '\'') || text.len() < 2 || !text.ends_with(quote) {
        return None;
    }

    let inner = &text[1..text.len() - 1];
    let mut value = String::new();
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            value.push(match ch {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                other => other,
            });
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else if ch == quote {
            // "a" + "b" is a binary expression, not one string
            return None;
        } else {
            value.push(ch);
        }
    }
    if escaped {
        return None;
    }
    Some(value)
}

/// First operator at parenthesis depth 0, scanning left to right
fn find_top_level_operator(
    text: &str,
) -> Option<(usize, &'static str, super::ast::BinaryOperator)> {
    use super::ast::BinaryOperator;

    let bytes = text.as_bytes();
    let mut depth: i64 = 0;
    let mut quote: Option<u8> = None;
    let mut previous: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
                previous = Some(b);
            }
            i += 1;
            continue;
        }

        match b {
            b'"' | b'\'' => {
                quote = Some(b);
                i += 1;
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth -= 1,
            _ => {}
        }

        if depth == 0 {
            for &(token, operator) in BinaryOperator::TOKENS {
                if !bytes[i..].starts_with(token.as_bytes()) {
                    continue;
                }
                let sign = token == "+" || token == "-";
                let doubled = sign
                    && (bytes.get(i + 1) == Some(&b) || (i > 0 && bytes[i - 1] == b));
                let unary = sign && is_unary_position(previous);
                if doubled || unary {
                    break;
                }
                return Some((i, token, operator));
            }
        }

        if !b.is_ascii_whitespace() {
            previous = Some(b);
        }
        i += 1;
    }
    None
}

fn is_unary_position(previous: Option<u8>) -> bool {
    match previous {
        None => true,
        Some(b) => matches!(
            b,
            b'(' | b'[' | b',' | b'+' | b'-' | b'*' | b'/' | b'%' | b'<' | b'>' | b'=' | b'!'
                | b'&' | b'|'
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::super::ast::BinaryOperator;
    use super::*;

    fn parse_str(source: &str) -> Result<Program> {
        LineParser::new(source).parse()
    }

    #[test]
    fn test_normalize_splits_semicolons_and_braces() {
        let lines = normalize("let x = 2 + 3; console.log(x);\nif (x) { console.log(x); } else { x++ }");
        let texts: Vec<&str> = lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "let x = 2 + 3",
                "console.log(x)",
                "if (x) {",
                "console.log(x)",
                "} else {",
                "x++",
                "}"
            ]
        );
        assert_eq!(lines[0].number, 1);
        assert_eq!(lines[2].number, 2);
    }

    #[test]
    fn test_for_header_semicolons_stay_together() {
        let lines = normalize("for (let i = 0; i < 3; i++) {\n}");
        assert_eq!(lines[0].text, "for (let i = 0; i < 3; i++) {");
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let program = parse_str("// header\n\nlet a = 1 // trailing\n   \n").unwrap();
        assert_eq!(program.body.len(), 1);
        assert!(program.warnings.is_empty());
    }

    #[test]
    fn test_variable_declaration() {
        let program = parse_str("const answer = 42").unwrap();
        assert_eq!(
            program.body[0],
            Statement::VariableDeclaration {
                kind: DeclarationKind::Const,
                name: "answer".to_string(),
                init: Some(Expression::Literal(Literal::Int(42))),
            }
        );
    }

    #[test]
    fn test_binary_split_is_first_operator() {
        let expr = parse_expression("1 + 2 * 3", 0).unwrap();
        if let Expression::Binary {
            operator,
            left,
            right,
        } = expr
        {
            assert_eq!(operator, BinaryOperator::Add);
            assert_eq!(*left, Expression::Literal(Literal::Int(1)));
            assert!(matches!(
                *right,
                Expression::Binary {
                    operator: BinaryOperator::Mul,
                    ..
                }
            ));
        } else {
            panic!("Expected binary expression");
        }
    }

    #[test]
    fn test_longest_operator_token_wins() {
        let expr = parse_expression("a <= b", 0).unwrap();
        assert!(matches!(
            expr,
            Expression::Binary {
                operator: BinaryOperator::LtEq,
                ..
            }
        ));
        let expr = parse_expression("a === b", 0).unwrap();
        assert!(matches!(
            expr,
            Expression::Binary {
                operator: BinaryOperator::Eq,
                ..
            }
        ));
    }

    #[test]
    fn test_logical_expression() {
        let expr = parse_expression("a && b", 0).unwrap();
        assert!(matches!(
            expr,
            Expression::Logical {
                operator: BinaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_negative_literal_is_not_split() {
        assert_eq!(
            parse_expression("-7", 0).unwrap(),
            Expression::Literal(Literal::Int(-7))
        );
        let expr = parse_expression("x - -2", 0).unwrap();
        if let Expression::Binary { right, .. } = expr {
            assert_eq!(*right, Expression::Literal(Literal::Int(-2)));
        } else {
            panic!("Expected binary expression");
        }
    }

    #[test]
    fn test_string_with_operator_inside() {
        assert_eq!(
            parse_expression("\"a+b\"", 0).unwrap(),
            Expression::Literal(Literal::Str("a+b".to_string()))
        );
        assert!(matches!(
            parse_expression("\"a\" + \"b\"", 0).unwrap(),
            Expression::Binary { .. }
        ));
    }

    #[test]
    fn test_call_member_array_identifier() {
        let call = parse_expression("Math.min(a, 3)", 0).unwrap();
        if let Expression::Call { callee, arguments } = &call {
            assert_eq!(callee.qualified_name().as_deref(), Some("Math.min"));
            assert_eq!(arguments.len(), 2);
        } else {
            panic!("Expected call");
        }

        let member = parse_expression("list.length", 0).unwrap();
        assert_eq!(member.qualified_name().as_deref(), Some("list.length"));

        assert_eq!(
            parse_expression("[1, 2, 3]", 0).unwrap(),
            Expression::Array(vec![
                Expression::Literal(Literal::Int(1)),
                Expression::Literal(Literal::Int(2)),
                Expression::Literal(Literal::Int(3)),
            ])
        );

        assert_eq!(
            parse_expression("counter", 0).unwrap(),
            Expression::Identifier("counter".to_string())
        );
    }

    #[test]
    fn test_call_with_operator_argument() {
        let call = parse_expression("f(1 + 2)", 0).unwrap();
        assert!(matches!(call, Expression::Call { .. }));
    }

    #[test]
    fn test_parenthesized_left_operand() {
        let expr = parse_expression("(1 + 2) * 3", 0).unwrap();
        assert!(matches!(
            expr,
            Expression::Binary {
                operator: BinaryOperator::Mul,
                ..
            }
        ));
    }

    #[test]
    fn test_if_else_blocks() {
        let source = "if (x > 1) {\n  console.log(x)\n} else {\n  console.log(0)\n}";
        let program = parse_str(source).unwrap();
        assert_eq!(program.body.len(), 1);
        if let Statement::IfStatement {
            consequent,
            alternate,
            ..
        } = &program.body[0]
        {
            assert_eq!(consequent.len(), 1);
            assert_eq!(alternate.as_ref().map(Vec::len), Some(1));
        } else {
            panic!("Expected if statement");
        }
    }

    #[test]
    fn test_else_if_chain() {
        let source = "if (a) {\nx = 1\n} else if (b) {\nx = 2\n} else {\nx = 3\n}\ny = 4";
        let program = parse_str(source).unwrap();
        assert_eq!(program.body.len(), 2);
        if let Statement::IfStatement { alternate, .. } = &program.body[0] {
            let alternate = alternate.as_ref().unwrap();
            assert_eq!(alternate.len(), 1);
            assert!(matches!(
                alternate[0],
                Statement::IfStatement {
                    alternate: Some(_),
                    ..
                }
            ));
        } else {
            panic!("Expected if statement");
        }
    }

    #[test]
    fn test_else_on_its_own_line() {
        let source = "if (a) {\nx = 1\n}\nelse {\nx = 2\n}";
        let program = parse_str(source).unwrap();
        assert_eq!(program.body.len(), 1);
        assert!(matches!(
            program.body[0],
            Statement::IfStatement {
                alternate: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn test_for_statement_clauses() {
        let program = parse_str("for (let i = 0; i < 3; i++) {\nconsole.log(i)\n}").unwrap();
        if let Statement::ForStatement {
            init,
            test,
            update,
            body,
        } = &program.body[0]
        {
            assert!(matches!(
                init.as_deref(),
                Some(Statement::VariableDeclaration { .. })
            ));
            assert!(matches!(test, Some(Expression::Binary { .. })));
            assert!(matches!(
                update,
                Some(Expression::Update {
                    operator: UpdateOperator::Increment,
                    prefix: false,
                    ..
                })
            ));
            assert_eq!(body.len(), 1);
        } else {
            panic!("Expected for statement");
        }
    }

    #[test]
    fn test_for_statement_with_empty_clauses() {
        let program = parse_str("for (;;) {\n}").unwrap();
        assert!(matches!(
            program.body[0],
            Statement::ForStatement {
                init: None,
                test: None,
                update: None,
                ..
            }
        ));
    }

    #[test]
    fn test_function_declaration_keeps_body() {
        let program = parse_str("function add(a, b) {\n  return a + b\n}").unwrap();
        if let Statement::FunctionDeclaration { name, params, body } = &program.body[0] {
            assert_eq!(name, "add");
            assert_eq!(params, &vec!["a".to_string(), "b".to_string()]);
            assert!(matches!(body[0], Statement::ReturnStatement { argument: Some(_) }));
        } else {
            panic!("Expected function declaration");
        }
    }

    #[test]
    fn test_compound_assignment_and_equality() {
        let program = parse_str("x += 2").unwrap();
        assert!(matches!(
            program.body[0],
            Statement::ExpressionStatement(Expression::Assignment {
                operator: AssignmentOperator::AddAssign,
                ..
            })
        ));

        // `x == 1` is neither an assignment nor a call
        let program = parse_str("x == 1").unwrap();
        assert!(program.body.is_empty());
        assert_eq!(program.warnings.len(), 1);
    }

    #[test]
    fn test_unrecognized_line_becomes_warning() {
        // `while` is not a recognized header, so its brace is never counted
        let program = parse_str("let a = 1\nwhile (a) {\nlet b = 2").unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.warnings[0].text, "while (a) {");

        let program = parse_str("let a = 1\n@@@ nonsense\nlet b = 2").unwrap();
        assert_eq!(program.body.len(), 2);
        assert_eq!(program.warnings.len(), 1);
        assert_eq!(program.warnings[0].line, 2);
    }

    #[test]
    fn test_unclosed_block_is_syntax_error() {
        let err = parse_str("if (a) {\nx = 1").unwrap_err();
        assert!(matches!(err, Error::SyntaxError { line: 1, .. }));
    }

    #[test]
    fn test_nesting_limit() {
        let expr = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        let err = parse_expression(&expr, 0).unwrap_err();
        assert!(matches!(err, Error::ResourceLimit { .. }));
    }
}
