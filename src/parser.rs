use std::iter::Peekable;
use std::vec::IntoIter;

use lazy_static::lazy_static;
use regex::Regex;

use crate::ast::*;

lazy_static! {
    static ref RE_FUNCTION: Regex = Regex::new(r"^function\s+(\w+)\s*\(([^)]*)\):$").unwrap();
    static ref RE_IF: Regex = Regex::new(r"^if\s+(.+):$").unwrap();
    static ref RE_ELIF: Regex = Regex::new(r"^elif\s+(.+):$").unwrap();
    static ref RE_ELSE: Regex = Regex::new(r"^else:$").unwrap();
    static ref RE_WHILE: Regex = Regex::new(r"^while\s+(.+):$").unwrap();
    static ref RE_FOR: Regex = Regex::new(r"^for\s+(\w+)\s*=\s*(.+),\s*(.+)\s+do$").unwrap();
    static ref RE_FOR_IN: Regex = Regex::new(r"^for\s+(\w+)\s+in\s+(.+):$").unwrap();
    static ref RE_TRY: Regex = Regex::new(r"^try:$").unwrap();
    static ref RE_CATCH: Regex = Regex::new(r"^catch:$").unwrap();
    static ref RE_RETURN: Regex = Regex::new(r"^return(?:\s+(.+))?$").unwrap();
    static ref RE_PRINT: Regex = Regex::new(r"^print\s*\(").unwrap();
    static ref RE_ASSIGN: Regex = Regex::new(r"^(\w+)\s*=\s*([^=].*)$").unwrap();
    static ref RE_SET_ATTR: Regex = Regex::new(r"^(.+)\.(\w+)\s*=\s*([^=].*)$").unwrap();
    static ref RE_CLASS: Regex = Regex::new(r"^class\s+(\w+)(?:\s*\(\s*(\w*)\s*\))?:$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Ident(String),
    Keyword(String),
    Operator(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eof,
}

type Tokens = Peekable<IntoIter<Token>>;

/// Parse a whole program, one source line per element.
pub fn parse(lines: &[String]) -> Result<Vec<Stmt>, String> {
    let mut stmts = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = &lines[i];
        if is_blank(line) {
            i += 1;
            continue;
        }
        let indent = count_indent(line);
        let (block, next_i) = parse_block(lines, indent, i)?;
        stmts.extend(block);
        i = next_i;
    }
    Ok(stmts)
}

/// Whether a console line opens a block and needs continuation lines.
pub fn opens_block(line: &str) -> bool {
    let trimmed = line.trim_end();
    !is_blank(trimmed) && (trimmed.ends_with(':') || trimmed.ends_with(" do"))
}

fn parse_block(lines: &[String], min_indent: usize, start: usize) -> Result<(Vec<Stmt>, usize), String> {
    let mut stmts = Vec::new();
    let mut i = start;
    while i < lines.len() {
        let line = &lines[i];
        if is_blank(line) {
            i += 1;
            continue;
        }
        let indent = count_indent(line);
        if indent < min_indent {
            break;
        }
        if indent > min_indent {
            let Some(last_stmt) = stmts.last_mut() else {
                return Err(format!("Unexpected indentation at line {}", i + 1));
            };
            let (nested, next_i) = parse_block(lines, indent, i)?;
            attach_body(last_stmt, nested, i + 1)?;
            i = next_i;
            continue;
        }
        let stmt = parse_stmt(line.trim(), i + 1)?;
        match stmt {
            Stmt::If { condition, .. } => {
                let (stmt, next_i) = parse_if(lines, min_indent, i, condition)?;
                stmts.push(stmt);
                i = next_i;
            }
            Stmt::TryCatch { .. } => {
                let (stmt, next_i) = parse_try(lines, min_indent, i)?;
                stmts.push(stmt);
                i = next_i;
            }
            other => {
                stmts.push(other);
                i += 1;
            }
        }
    }
    Ok((stmts, i))
}

/// Put an indented block under the statement that opened it.
fn attach_body(stmt: &mut Stmt, nested: Vec<Stmt>, line_num: usize) -> Result<(), String> {
    match stmt {
        Stmt::While { body, .. } | Stmt::For { body, .. } | Stmt::ForIn { body, .. } => {
            *body = nested;
        }
        Stmt::FunctionDef(decl) => decl.body = nested,
        Stmt::ClassDef { fields, methods, .. } => {
            for inner in nested {
                match inner {
                    Stmt::Assign { name, value } => fields.push((name, value)),
                    Stmt::FunctionDef(decl) => methods.push(decl),
                    _ => return Err(format!("Invalid statement inside class at line {}", line_num)),
                }
            }
        }
        _ => return Err(format!("Line {} cannot have a block", line_num)),
    }
    Ok(())
}

/// Parse the indented block starting at `i`, which must sit deeper than `min_indent`.
fn parse_indented(lines: &[String], min_indent: usize, i: usize, after: &str) -> Result<(Vec<Stmt>, usize), String> {
    let Some(first) = (i..lines.len()).find(|&j| !is_blank(&lines[j])) else {
        return Err(format!("Expected block after {} at line {}", after, i));
    };
    let indent = count_indent(&lines[first]);
    if indent <= min_indent {
        return Err(format!("Expected indented block after {} at line {}", after, first + 1));
    }
    parse_block(lines, indent, first)
}

fn next_significant(lines: &[String], mut i: usize) -> usize {
    while i < lines.len() && is_blank(&lines[i]) {
        i += 1;
    }
    i
}

fn parse_if(lines: &[String], min_indent: usize, start: usize, condition: Expr) -> Result<(Stmt, usize), String> {
    let (then_branch, mut i) = parse_indented(lines, min_indent, start + 1, "if")?;
    let mut elif_branches = Vec::new();
    let mut else_branch = None;
    loop {
        let j = next_significant(lines, i);
        if j >= lines.len() || count_indent(&lines[j]) != min_indent {
            break;
        }
        let trimmed = lines[j].trim();
        if let Some(caps) = RE_ELIF.captures(trimmed) {
            let cond = parse_expr(&caps[1])?;
            let (body, next_i) = parse_indented(lines, min_indent, j + 1, "elif")?;
            elif_branches.push((cond, body));
            i = next_i;
        } else if RE_ELSE.is_match(trimmed) {
            let (body, next_i) = parse_indented(lines, min_indent, j + 1, "else")?;
            else_branch = Some(body);
            i = next_i;
            break;
        } else {
            break;
        }
    }
    let stmt = Stmt::If {
        condition,
        then_branch,
        elif_branches,
        else_branch,
    };
    Ok((stmt, i))
}

fn parse_try(lines: &[String], min_indent: usize, start: usize) -> Result<(Stmt, usize), String> {
    let (try_body, i) = parse_indented(lines, min_indent, start + 1, "try")?;
    let j = next_significant(lines, i);
    if j >= lines.len() || count_indent(&lines[j]) != min_indent || !RE_CATCH.is_match(lines[j].trim()) {
        return Err(format!("Expected catch after try at line {}", start + 1));
    }
    let (catch_body, next_i) = parse_indented(lines, min_indent, j + 1, "catch")?;
    Ok((Stmt::TryCatch { try_body, catch_body }, next_i))
}

fn parse_stmt(line: &str, line_num: usize) -> Result<Stmt, String> {
    let at_line = |e: String| format!("{} at line {}", e, line_num);

    if let Some(caps) = RE_FUNCTION.captures(line) {
        let params: Vec<String> = caps[2]
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        return Ok(Stmt::FunctionDef(FunctionDecl {
            name: caps[1].to_string(),
            params,
            body: vec![],
        }));
    }
    if let Some(caps) = RE_CLASS.captures(line) {
        let parent = caps.get(2).map(|m| m.as_str()).filter(|p| !p.is_empty());
        return Ok(Stmt::ClassDef {
            name: caps[1].to_string(),
            parent: parent.map(str::to_string),
            fields: vec![],
            methods: vec![],
        });
    }
    if let Some(caps) = RE_IF.captures(line) {
        let condition = parse_expr(&caps[1]).map_err(at_line)?;
        return Ok(Stmt::If {
            condition,
            then_branch: vec![],
            elif_branches: vec![],
            else_branch: None,
        });
    }
    if RE_ELIF.is_match(line) || RE_ELSE.is_match(line) || RE_CATCH.is_match(line) {
        return Err(format!("Unexpected '{}' at line {}", line, line_num));
    }
    if let Some(caps) = RE_WHILE.captures(line) {
        let condition = parse_expr(&caps[1]).map_err(at_line)?;
        return Ok(Stmt::While { condition, body: vec![] });
    }
    if let Some(caps) = RE_FOR.captures(line) {
        return Ok(Stmt::For {
            var: caps[1].to_string(),
            start: parse_expr(&caps[2]).map_err(at_line)?,
            end: parse_expr(&caps[3]).map_err(at_line)?,
            body: vec![],
        });
    }
    if let Some(caps) = RE_FOR_IN.captures(line) {
        return Ok(Stmt::ForIn {
            var: caps[1].to_string(),
            array: parse_expr(&caps[2]).map_err(at_line)?,
            body: vec![],
        });
    }
    if RE_TRY.is_match(line) {
        return Ok(Stmt::TryCatch {
            try_body: vec![],
            catch_body: vec![],
        });
    }
    if let Some(caps) = RE_RETURN.captures(line) {
        let expr = match caps.get(1) {
            Some(m) => parse_expr(m.as_str()).map_err(at_line)?,
            None => Expr::Null,
        };
        return Ok(Stmt::Return(expr));
    }
    if RE_PRINT.is_match(line) {
        if let Ok(Expr::Call { name, args }) = parse_expr(line) {
            if name == "print" {
                return Ok(Stmt::Print(args));
            }
        }
    }
    if let Some(caps) = RE_ASSIGN.captures(line) {
        let value = parse_expr(&caps[2]).map_err(at_line)?;
        return Ok(Stmt::Assign {
            name: caps[1].to_string(),
            value,
        });
    }
    if let Some(caps) = RE_SET_ATTR.captures(line) {
        if let Ok(object) = parse_expr(&caps[1]) {
            let value = parse_expr(&caps[3]).map_err(at_line)?;
            return Ok(Stmt::SetAttr {
                object,
                attr: caps[2].to_string(),
                value,
            });
        }
    }
    parse_expr(line)
        .map(Stmt::Expr)
        .map_err(|e| format!("Invalid syntax at line {}: {} ({})", line_num, line, e))
}

// ---------- expressions ----------

pub fn parse_expr(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut iter = tokens.into_iter().peekable();
    let expr = parse_or(&mut iter)?;
    match iter.peek() {
        None | Some(Token::Eof) => Ok(expr),
        Some(tok) => Err(format!("Unexpected token {:?} at end of expression", tok)),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => continue,
            '(' => tokens.push(Token::LParen),
            ')' => tokens.push(Token::RParen),
            '[' => tokens.push(Token::LBracket),
            ']' => tokens.push(Token::RBracket),
            ',' => tokens.push(Token::Comma),
            '.' => tokens.push(Token::Dot),
            '+' | '-' | '*' | '/' | '%' | '=' | '!' | '<' | '>' => {
                let mut op = ch.to_string();
                if matches!(ch, '=' | '!' | '<' | '>') && chars.peek() == Some(&'=') {
                    chars.next();
                    op.push('=');
                }
                if op == "=" || op == "!" {
                    return Err(format!("Unexpected operator '{}'", op));
                }
                tokens.push(Token::Operator(op));
            }
            '"' | '\'' => {
                let quote = ch;
                let mut s = String::new();
                let mut escaped = false;
                let mut closed = false;
                for next in chars.by_ref() {
                    if escaped {
                        s.push(match next {
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            other => other,
                        });
                        escaped = false;
                    } else if next == '\\' {
                        escaped = true;
                    } else if next == quote {
                        closed = true;
                        break;
                    } else {
                        s.push(next);
                    }
                }
                if !closed {
                    return Err("Unterminated string literal".to_string());
                }
                tokens.push(Token::String(s));
            }
            '0'..='9' => {
                let mut num = ch.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        num.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = num.parse::<f64>().map_err(|_| format!("Invalid number: {}", num))?;
                tokens.push(Token::Number(n));
            }
            _ if ch.is_alphabetic() || ch == '_' => {
                let mut ident = ch.to_string();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" | "false" | "null" | "and" | "or" | "not" => tokens.push(Token::Keyword(ident)),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            _ => return Err(format!("Unexpected character: {}", ch)),
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

fn binary(left: Expr, op: BinaryOpKind, right: Expr) -> Expr {
    Expr::BinaryOp {
        left: Box::new(left),
        op,
        right: Box::new(right),
    }
}

fn parse_or(iter: &mut Tokens) -> Result<Expr, String> {
    let mut left = parse_and(iter)?;
    while matches!(iter.peek(), Some(Token::Keyword(kw)) if kw == "or") {
        iter.next();
        left = binary(left, BinaryOpKind::Or, parse_and(iter)?);
    }
    Ok(left)
}

fn parse_and(iter: &mut Tokens) -> Result<Expr, String> {
    let mut left = parse_comparison(iter)?;
    while matches!(iter.peek(), Some(Token::Keyword(kw)) if kw == "and") {
        iter.next();
        left = binary(left, BinaryOpKind::And, parse_comparison(iter)?);
    }
    Ok(left)
}

fn parse_comparison(iter: &mut Tokens) -> Result<Expr, String> {
    let left = parse_addition(iter)?;
    let kind = match iter.peek() {
        Some(Token::Operator(op)) => match op.as_str() {
            "==" => Some(BinaryOpKind::Eq),
            "!=" => Some(BinaryOpKind::Ne),
            "<" => Some(BinaryOpKind::Lt),
            "<=" => Some(BinaryOpKind::Le),
            ">" => Some(BinaryOpKind::Gt),
            ">=" => Some(BinaryOpKind::Ge),
            _ => None,
        },
        _ => None,
    };
    match kind {
        Some(kind) => {
            iter.next();
            Ok(binary(left, kind, parse_addition(iter)?))
        }
        None => Ok(left),
    }
}

fn parse_addition(iter: &mut Tokens) -> Result<Expr, String> {
    let mut left = parse_multiplication(iter)?;
    loop {
        let kind = match iter.peek() {
            Some(Token::Operator(op)) if op == "+" => BinaryOpKind::Add,
            Some(Token::Operator(op)) if op == "-" => BinaryOpKind::Sub,
            _ => break,
        };
        iter.next();
        left = binary(left, kind, parse_multiplication(iter)?);
    }
    Ok(left)
}

fn parse_multiplication(iter: &mut Tokens) -> Result<Expr, String> {
    let mut left = parse_unary(iter)?;
    loop {
        let kind = match iter.peek() {
            Some(Token::Operator(op)) if op == "*" => BinaryOpKind::Mul,
            Some(Token::Operator(op)) if op == "/" => BinaryOpKind::Div,
            Some(Token::Operator(op)) if op == "%" => BinaryOpKind::Mod,
            _ => break,
        };
        iter.next();
        left = binary(left, kind, parse_unary(iter)?);
    }
    Ok(left)
}

fn parse_unary(iter: &mut Tokens) -> Result<Expr, String> {
    let op = match iter.peek() {
        Some(Token::Operator(op)) if op == "-" => Some(UnaryOpKind::Neg),
        Some(Token::Keyword(kw)) if kw == "not" => Some(UnaryOpKind::Not),
        _ => None,
    };
    match op {
        Some(op) => {
            iter.next();
            let expr = parse_unary(iter)?;
            Ok(Expr::UnaryOp {
                op,
                expr: Box::new(expr),
            })
        }
        None => parse_postfix(iter),
    }
}

fn parse_call_args(iter: &mut Tokens) -> Result<Vec<Expr>, String> {
    let mut args = Vec::new();
    if let Some(Token::RParen) = iter.peek() {
        iter.next();
        return Ok(args);
    }
    loop {
        args.push(parse_or(iter)?);
        match iter.next() {
            Some(Token::Comma) => continue,
            Some(Token::RParen) => return Ok(args),
            _ => return Err("Expected ',' or ')' after argument".to_string()),
        }
    }
}

fn parse_postfix(iter: &mut Tokens) -> Result<Expr, String> {
    let mut left = parse_primary(iter)?;
    loop {
        match iter.peek() {
            Some(Token::LParen) => {
                iter.next();
                let args = parse_call_args(iter)?;
                left = match left {
                    Expr::GetAttr { object, attr } => Expr::CallMethod {
                        object,
                        method: attr,
                        args,
                    },
                    Expr::Variable(name) => Expr::Call { name, args },
                    _ => return Err("Cannot call non-function or non-method".to_string()),
                };
            }
            Some(Token::LBracket) => {
                iter.next();
                let index = parse_or(iter)?;
                if iter.next() != Some(Token::RBracket) {
                    return Err("Expected ']' after index".to_string());
                }
                left = Expr::Index {
                    array: Box::new(left),
                    index: Box::new(index),
                };
            }
            Some(Token::Dot) => {
                iter.next();
                match iter.next() {
                    Some(Token::Ident(attr)) => {
                        left = Expr::GetAttr {
                            object: Box::new(left),
                            attr,
                        };
                    }
                    _ => return Err("Expected attribute name after '.'".to_string()),
                }
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_primary(iter: &mut Tokens) -> Result<Expr, String> {
    match iter.next() {
        Some(Token::Number(n)) => Ok(Expr::Number(n)),
        Some(Token::String(s)) => Ok(Expr::String(s)),
        Some(Token::Keyword(kw)) => match kw.as_str() {
            "true" => Ok(Expr::Boolean(true)),
            "false" => Ok(Expr::Boolean(false)),
            "null" => Ok(Expr::Null),
            _ => Err(format!("Unexpected keyword: {}", kw)),
        },
        Some(Token::Ident(name)) => Ok(Expr::Variable(name)),
        Some(Token::LParen) => {
            let expr = parse_or(iter)?;
            match iter.next() {
                Some(Token::RParen) => Ok(expr),
                _ => Err("Expected ')'".to_string()),
            }
        }
        Some(Token::LBracket) => {
            let mut items = Vec::new();
            if let Some(Token::RBracket) = iter.peek() {
                iter.next();
            } else {
                loop {
                    items.push(parse_or(iter)?);
                    match iter.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => break,
                        _ => return Err("Expected ',' or ']' in array literal".to_string()),
                    }
                }
            }
            Ok(Expr::Call {
                name: "array".to_string(),
                args: items,
            })
        }
        Some(Token::Eof) | None => Err("Unexpected end of expression".to_string()),
        Some(tok) => Err(format!("Unexpected token {:?}", tok)),
    }
}

fn count_indent(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#')
}
