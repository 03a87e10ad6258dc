use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::ast::*;
use crate::env::Env;
use crate::error::{EvalError, EvalResult};
use crate::value::{to_index, Class, Value};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Nested calls allowed before a call fails with a recursion fault.
pub const MAX_CALL_DEPTH: usize = 256;

/// Run statements in order. `Some` means a `return` fired.
pub async fn eval_block(stmts: &[Stmt], env: &mut Env) -> EvalResult<Option<Value>> {
    for stmt in stmts {
        if let Some(val) = eval_stmt(stmt, env).await? {
            return Ok(Some(val));
        }
    }
    Ok(None)
}

/// Like [`eval_block`], but yields the value of a trailing expression statement
/// so an interactive caller can echo it.
pub async fn eval_interactive(stmts: &[Stmt], env: &mut Env) -> EvalResult<Option<Value>> {
    let Some((last, init)) = stmts.split_last() else {
        return Ok(None);
    };
    if let Some(val) = eval_block(init, env).await? {
        return Ok(Some(val));
    }
    match last {
        Stmt::Expr(expr) => eval_expr(expr, env).await.map(Some),
        other => eval_stmt(other, env).await,
    }
}

pub async fn call_function(func: &FunctionDecl, args: Vec<Value>, env: &mut Env) -> EvalResult<Value> {
    if args.len() != func.params.len() {
        return Err(format!(
            "Function '{}' expects {} arguments, got {}",
            func.name,
            func.params.len(),
            args.len()
        )
        .into());
    }
    if env.depth() >= MAX_CALL_DEPTH {
        return Err("maximum recursion depth exceeded".into());
    }
    let mut local_env = env.child();
    for (p, v) in func.params.iter().zip(args) {
        local_env.set_var(p.clone(), v);
    }
    let result = eval_block(&func.body, &mut local_env).await?;
    Ok(result.unwrap_or(Value::Null))
}

fn eval_stmt<'a>(stmt: &'a Stmt, env: &'a mut Env) -> BoxFuture<'a, EvalResult<Option<Value>>> {
    Box::pin(async move {
        let outcome: EvalResult<Option<Value>> = match stmt {
            Stmt::Expr(expr) => {
                eval_expr(expr, env).await?;
                Ok(None)
            }
            Stmt::Assign { name, value } => {
                let val = eval_expr(value, env).await?;
                env.set_var(name.clone(), val);
                Ok(None)
            }
            Stmt::SetAttr { object, attr, value } => {
                let obj_val = eval_expr(object, env).await?;
                let val = eval_expr(value, env).await?;
                obj_val.set_attr(attr.clone(), val)?;
                Ok(None)
            }
            Stmt::If { condition, then_branch, elif_branches, else_branch } => {
                if eval_expr(condition, env).await?.as_bool() {
                    return eval_block(then_branch, env).await;
                }
                for (cond, branch) in elif_branches {
                    if eval_expr(cond, env).await?.as_bool() {
                        return eval_block(branch, env).await;
                    }
                }
                if let Some(branch) = else_branch {
                    return eval_block(branch, env).await;
                }
                Ok(None)
            }
            Stmt::While { condition, body } => {
                while eval_expr(condition, env).await?.as_bool() {
                    if let Some(val) = eval_block(body, env).await? {
                        return Ok(Some(val));
                    }
                }
                Ok(None)
            }
            Stmt::For { var, start, end, body } => {
                let start_num = match eval_expr(start, env).await? {
                    Value::Number(n) => n as i64,
                    other => return Err(format!("for: start must be number, got {}", other.type_name()).into()),
                };
                let end_num = match eval_expr(end, env).await? {
                    Value::Number(n) => n as i64,
                    other => return Err(format!("for: end must be number, got {}", other.type_name()).into()),
                };
                for i in start_num..=end_num {
                    env.set_var(var.clone(), Value::Number(i as f64));
                    if let Some(val) = eval_block(body, env).await? {
                        return Ok(Some(val));
                    }
                }
                Ok(None)
            }
            Stmt::ForIn { var, array, body } => match eval_expr(array, env).await? {
                Value::Array(arr_rc) => {
                    let arr = arr_rc.borrow().clone();
                    for item in arr {
                        env.set_var(var.clone(), item);
                        if let Some(val) = eval_block(body, env).await? {
                            return Ok(Some(val));
                        }
                    }
                    Ok(None)
                }
                other => Err(format!("for-in: right side must be array, got {}", other.type_name()).into()),
            },
            Stmt::Return(expr) => {
                let val = eval_expr(expr, env).await?;
                Ok(Some(val))
            }
            Stmt::FunctionDef(decl) => {
                env.set_var(decl.name.clone(), Value::Function(Rc::new(decl.clone())));
                Ok(None)
            }
            Stmt::Print(exprs) => {
                let mut parts = Vec::with_capacity(exprs.len());
                for expr in exprs {
                    parts.push(eval_expr(expr, env).await?.to_string());
                }
                println!("{}", parts.join(" "));
                Ok(None)
            }
            Stmt::TryCatch { try_body, catch_body } => {
                let env_snapshot = env.clone();
                match eval_block(try_body, env).await {
                    Err(EvalError::Fault(_)) => {
                        *env = env_snapshot;
                        eval_block(catch_body, env).await
                    }
                    other => other,
                }
            }
            Stmt::ClassDef { name, parent, fields, methods } => {
                let mut field_map = HashMap::new();
                for (fname, fexpr) in fields {
                    let val = eval_expr(fexpr, env).await?;
                    field_map.insert(fname.clone(), val);
                }
                let parent_class = match parent {
                    Some(p) => match env.get_var(p) {
                        Some(Value::Class(class)) => Some(class),
                        Some(other) => return Err(format!("Parent '{}' is a {}, not a class", p, other.type_name()).into()),
                        None => return Err(format!("Parent class '{}' not found", p).into()),
                    },
                    None => None,
                };
                let class = Class {
                    name: name.clone(),
                    parent: parent_class,
                    fields: RefCell::new(field_map),
                    methods: methods.iter().map(|m| (m.name.clone(), Rc::new(m.clone()))).collect(),
                };
                env.set_var(name.clone(), Value::Class(Rc::new(class)));
                Ok(None)
            }
        };
        outcome
    })
}

pub fn eval_expr<'a>(expr: &'a Expr, env: &'a mut Env) -> BoxFuture<'a, EvalResult<Value>> {
    Box::pin(async move {
        let outcome: EvalResult<Value> = match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::String(s) => Ok(Value::String(s.clone())),
            Expr::Boolean(b) => Ok(Value::Boolean(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Variable(name) => env
                .get_var(name)
                .ok_or_else(|| format!("Variable '{}' not defined", name).into()),
            Expr::BinaryOp { left, op, right } => {
                let left_val = eval_expr(left, env).await?;
                // `and`/`or` short-circuit
                match op {
                    BinaryOpKind::And if !left_val.as_bool() => return Ok(Value::Boolean(false)),
                    BinaryOpKind::Or if left_val.as_bool() => return Ok(Value::Boolean(true)),
                    _ => {}
                }
                let right_val = eval_expr(right, env).await?;
                binary(*op, &left_val, &right_val)
            }
            Expr::UnaryOp { op, expr } => {
                let val = eval_expr(expr, env).await?;
                match (op, val) {
                    (UnaryOpKind::Not, val) => Ok(Value::Boolean(!val.as_bool())),
                    (UnaryOpKind::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
                    (UnaryOpKind::Neg, other) => Err(format!("Unary minus applied to {}", other.type_name()).into()),
                }
            }
            Expr::Call { name, args } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(eval_expr(arg, env).await?);
                }
                match env.get_var(name) {
                    Some(callee) => call_value(callee, arg_vals, env).await,
                    None => match env.get_builtin(name) {
                        Some(builtin) => builtin(arg_vals).await,
                        None => Err(format!("Unknown function or class '{}'", name).into()),
                    },
                }
            }
            Expr::Index { array, index } => {
                let arr_val = eval_expr(array, env).await?;
                let idx_val = eval_expr(index, env).await?;
                match (arr_val, idx_val) {
                    (Value::Array(arr_rc), Value::Number(n)) => {
                        let i = to_index(n).ok_or_else(|| format!("Invalid index {}", n))?;
                        let arr = arr_rc.borrow();
                        arr.get(i)
                            .cloned()
                            .ok_or_else(|| format!("Index {} out of bounds for array of length {}", n, arr.len()).into())
                    }
                    (Value::String(s), Value::Number(n)) => {
                        let i = to_index(n).ok_or_else(|| format!("Invalid index {}", n))?;
                        s.chars()
                            .nth(i)
                            .map(|c| Value::String(c.to_string()))
                            .ok_or_else(|| "String index out of bounds".into())
                    }
                    (container, idx) => Err(format!(
                        "Cannot index {} with {}",
                        container.type_name(),
                        idx.type_name()
                    )
                    .into()),
                }
            }
            Expr::GetAttr { object, attr } => {
                let obj_val = eval_expr(object, env).await?;
                obj_val
                    .get_attr(attr)
                    .ok_or_else(|| format!("Attribute '{}' not found on {}", attr, obj_val.type_name()).into())
            }
            Expr::CallMethod { object, method, args } => {
                let obj_val = eval_expr(object, env).await?;
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(eval_expr(arg, env).await?);
                }
                let method_val = obj_val
                    .get_attr(method)
                    .ok_or_else(|| EvalError::from(format!("Method '{}' not found", method)))?;
                call_value(method_val, arg_vals, env).await
            }
        };
        outcome
    })
}

fn call_value<'a>(callee: Value, args: Vec<Value>, env: &'a mut Env) -> BoxFuture<'a, EvalResult<Value>> {
    Box::pin(async move {
        let outcome: EvalResult<Value> = match callee {
            Value::Function(func) => call_function(&func, args, env).await,
            Value::Class(_) => callee.call_as_class(args, env).await,
            Value::Method { func, receiver } => {
                let mut call_args = vec![*receiver];
                call_args.extend(args);
                call_function(&func, call_args, env).await
            }
            other => Err(format!("'{}' is not callable", other.type_name()).into()),
        };
        outcome
    })
}

fn binary(op: BinaryOpKind, a: &Value, b: &Value) -> EvalResult<Value> {
    match op {
        BinaryOpKind::Add => add(a, b),
        BinaryOpKind::Sub | BinaryOpKind::Mul | BinaryOpKind::Div | BinaryOpKind::Mod => {
            let (Value::Number(x), Value::Number(y)) = (a, b) else {
                return Err(invalid_operands(op, a, b));
            };
            match op {
                BinaryOpKind::Sub => Ok(Value::Number(x - y)),
                BinaryOpKind::Mul => Ok(Value::Number(x * y)),
                _ if *y == 0.0 => Err("Division by zero".into()),
                BinaryOpKind::Div => Ok(Value::Number(x / y)),
                _ => Ok(Value::Number(x % y)),
            }
        }
        BinaryOpKind::Eq => Ok(Value::Boolean(a == b)),
        BinaryOpKind::Ne => Ok(Value::Boolean(a != b)),
        BinaryOpKind::Lt | BinaryOpKind::Le | BinaryOpKind::Gt | BinaryOpKind::Ge => {
            let ord = compare(a, b).ok_or_else(|| invalid_operands(op, a, b))?;
            let result = match op {
                BinaryOpKind::Lt => ord == Ordering::Less,
                BinaryOpKind::Le => ord != Ordering::Greater,
                BinaryOpKind::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
        BinaryOpKind::And => Ok(Value::Boolean(a.as_bool() && b.as_bool())),
        BinaryOpKind::Or => Ok(Value::Boolean(a.as_bool() || b.as_bool())),
    }
}

fn add(a: &Value, b: &Value) -> EvalResult<Value> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
        (Value::String(x), y) => Ok(Value::String(format!("{}{}", x, y))),
        (x, Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
        (Value::Array(x), Value::Array(y)) => {
            let mut joined = x.borrow().clone();
            joined.extend(y.borrow().iter().cloned());
            Ok(Value::array(joined))
        }
        _ => Err(invalid_operands(BinaryOpKind::Add, a, b)),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn invalid_operands(op: BinaryOpKind, a: &Value, b: &Value) -> EvalError {
    EvalError::Fault(format!(
        "Invalid operands for {}: {} and {}",
        op,
        a.type_name(),
        b.type_name()
    ))
}
