use std::fs;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use tokio::time;

use crate::env::{BuiltinFn, Env};
use crate::error::{EvalError, EvalResult};
use crate::eval::BoxFuture;
use crate::value::{to_index, Value};

macro_rules! builtin {
    ($name:ident, |$args:ident| $body:block) => {
        pub fn $name() -> BuiltinFn {
            async fn call($args: Vec<Value>) -> EvalResult<Value> $body
            Rc::new(|args: Vec<Value>| -> BoxFuture<'static, EvalResult<Value>> { Box::pin(call(args)) })
        }
    };
}

fn expect_args(name: &str, args: &[Value], count: usize) -> EvalResult<()> {
    if args.len() != count {
        return Err(format!(
            "{} expects {} argument{}, got {}",
            name,
            count,
            if count == 1 { "" } else { "s" },
            args.len()
        )
        .into());
    }
    Ok(())
}

fn string_arg<'a>(name: &str, value: &'a Value) -> EvalResult<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(format!("{}: expected string, got {}", name, other.type_name()).into()),
    }
}

fn number_arg(name: &str, value: &Value) -> EvalResult<f64> {
    match value {
        Value::Number(n) => Ok(*n),
        other => Err(format!("{}: expected number, got {}", name, other.type_name()).into()),
    }
}

fn index_arg(name: &str, value: &Value) -> EvalResult<usize> {
    let n = number_arg(name, value)?;
    to_index(n).ok_or_else(|| format!("{}: invalid index {}", name, n).into())
}

/// Text written by `write`/`append`: strings raw, numbers and booleans via `Display`.
fn file_content(name: &str, value: &Value) -> EvalResult<String> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Boolean(_) => Ok(value.to_string()),
        other => Err(format!("{}: cannot write {}", name, other.type_name()).into()),
    }
}

// -----------------------------------------------------------------------------
// Process control
// -----------------------------------------------------------------------------

builtin!(exit_fn, |args| {
    let code = match args.first() {
        None => 0,
        Some(Value::Number(n)) => *n as i32,
        Some(Value::Null) => 0,
        Some(other) => return Err(format!("exit: code must be number, got {}", other.type_name()).into()),
    };
    Err(EvalError::Exit(code))
});

builtin!(sleep_fn, |args| {
    expect_args("sleep", &args, 1)?;
    let ms = number_arg("sleep", &args[0])?;
    time::sleep(Duration::from_millis(ms.max(0.0) as u64)).await;
    Ok(Value::Null)
});

// -----------------------------------------------------------------------------
// Arrays
// -----------------------------------------------------------------------------

builtin!(array_fn, |args| { Ok(Value::array(args)) });

builtin!(push_fn, |args| {
    expect_args("push", &args, 2)?;
    match &args[0] {
        Value::Array(arr_rc) => {
            let mut arr = arr_rc.borrow_mut();
            arr.push(args[1].clone());
            Ok(Value::Number(arr.len() as f64))
        }
        other => Err(format!("push: first argument must be array, got {}", other.type_name()).into()),
    }
});

builtin!(pop_fn, |args| {
    expect_args("pop", &args, 1)?;
    match &args[0] {
        Value::Array(arr_rc) => arr_rc
            .borrow_mut()
            .pop()
            .ok_or_else(|| "pop from empty array".into()),
        other => Err(format!("pop: argument must be array, got {}", other.type_name()).into()),
    }
});

builtin!(length_fn, |args| {
    expect_args("length", &args, 1)?;
    match &args[0] {
        Value::Array(arr_rc) => Ok(Value::Number(arr_rc.borrow().len() as f64)),
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        other => Err(format!("length: argument must be array or string, got {}", other.type_name()).into()),
    }
});

builtin!(slice_fn, |args| {
    expect_args("slice", &args, 3)?;
    let start = index_arg("slice", &args[1])?;
    let end = index_arg("slice", &args[2])?;
    if start > end {
        return Err("slice: start index must be <= end index".into());
    }
    match &args[0] {
        Value::Array(arr_rc) => {
            let arr = arr_rc.borrow();
            if end > arr.len() {
                return Err("slice: end index out of bounds".into());
            }
            Ok(Value::array(arr[start..end].to_vec()))
        }
        Value::String(s) => {
            if end > s.chars().count() {
                return Err("slice: end index out of bounds".into());
            }
            Ok(Value::String(s.chars().skip(start).take(end - start).collect()))
        }
        other => Err(format!("slice: first argument must be array or string, got {}", other.type_name()).into()),
    }
});

builtin!(get_fn, |args| {
    expect_args("get", &args, 2)?;
    let idx = index_arg("get", &args[1])?;
    match &args[0] {
        Value::Array(arr_rc) => arr_rc
            .borrow()
            .get(idx)
            .cloned()
            .ok_or_else(|| "get: index out of bounds".into()),
        other => Err(format!("get: first argument must be array, got {}", other.type_name()).into()),
    }
});

builtin!(set_fn, |args| {
    expect_args("set", &args, 3)?;
    let idx = index_arg("set", &args[1])?;
    match &args[0] {
        Value::Array(arr_rc) => {
            let mut arr = arr_rc.borrow_mut();
            let slot = arr.get_mut(idx).ok_or_else(|| EvalError::from("set: index out of bounds"))?;
            *slot = args[2].clone();
            Ok(Value::Null)
        }
        other => Err(format!("set: first argument must be array, got {}", other.type_name()).into()),
    }
});

// -----------------------------------------------------------------------------
// Strings
// -----------------------------------------------------------------------------

builtin!(upper_fn, |args| {
    expect_args("upper", &args, 1)?;
    Ok(Value::String(string_arg("upper", &args[0])?.to_uppercase()))
});

builtin!(lower_fn, |args| {
    expect_args("lower", &args, 1)?;
    Ok(Value::String(string_arg("lower", &args[0])?.to_lowercase()))
});

builtin!(split_fn, |args| {
    expect_args("split", &args, 2)?;
    let s = string_arg("split", &args[0])?;
    let sep = string_arg("split", &args[1])?;
    let parts = s.split(sep).map(|x| Value::String(x.to_string())).collect();
    Ok(Value::array(parts))
});

builtin!(join_fn, |args| {
    expect_args("join", &args, 2)?;
    let sep = string_arg("join", &args[1])?;
    match &args[0] {
        Value::Array(arr_rc) => {
            let parts: Vec<String> = arr_rc.borrow().iter().map(Value::to_string).collect();
            Ok(Value::String(parts.join(sep)))
        }
        other => Err(format!("join: first argument must be array, got {}", other.type_name()).into()),
    }
});

builtin!(replace_fn, |args| {
    expect_args("replace", &args, 3)?;
    let s = string_arg("replace", &args[0])?;
    let from = string_arg("replace", &args[1])?;
    let to = string_arg("replace", &args[2])?;
    Ok(Value::String(s.replace(from, to)))
});

builtin!(contains_fn, |args| {
    expect_args("contains", &args, 2)?;
    match &args[0] {
        Value::String(s) => Ok(Value::Boolean(s.contains(string_arg("contains", &args[1])?))),
        Value::Array(arr_rc) => Ok(Value::Boolean(arr_rc.borrow().contains(&args[1]))),
        other => Err(format!("contains: first argument must be string or array, got {}", other.type_name()).into()),
    }
});

// -----------------------------------------------------------------------------
// Files
// -----------------------------------------------------------------------------

builtin!(write_fn, |args| {
    expect_args("write", &args, 2)?;
    let filename = string_arg("write", &args[0])?;
    let content = file_content("write", &args[1])?;
    Ok(Value::Boolean(fs::write(filename, content).is_ok()))
});

builtin!(append_fn, |args| {
    expect_args("append", &args, 2)?;
    let filename = string_arg("append", &args[0])?;
    let content = file_content("append", &args[1])?;
    let written = fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(filename)
        .and_then(|mut f| f.write_all(content.as_bytes()));
    Ok(Value::Boolean(written.is_ok()))
});

builtin!(read_fn, |args| {
    expect_args("read", &args, 1)?;
    let filename = string_arg("read", &args[0])?;
    fs::read_to_string(filename)
        .map(Value::String)
        .map_err(|e| format!("read: {}: {}", filename, e).into())
});

builtin!(file_exists_fn, |args| {
    expect_args("file_exists", &args, 1)?;
    Ok(Value::Boolean(Path::new(string_arg("file_exists", &args[0])?).exists()))
});

// -----------------------------------------------------------------------------
// Conversion and introspection
// -----------------------------------------------------------------------------

builtin!(tonumber_fn, |args| {
    expect_args("tonumber", &args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        Value::Number(n) => *n,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        _ => 0.0,
    };
    Ok(Value::Number(n))
});

builtin!(str_fn, |args| {
    expect_args("str", &args, 1)?;
    Ok(Value::String(args[0].to_string()))
});

builtin!(type_fn, |args| {
    expect_args("type", &args, 1)?;
    Ok(Value::String(args[0].type_name().to_string()))
});

/// Install every builtin into `env`.
pub fn install(env: &mut Env) {
    env.add_builtin("exit", exit_fn());
    env.add_builtin("sleep", sleep_fn());
    env.add_builtin("array", array_fn());
    env.add_builtin("push", push_fn());
    env.add_builtin("pop", pop_fn());
    env.add_builtin("length", length_fn());
    env.add_builtin("slice", slice_fn());
    env.add_builtin("get", get_fn());
    env.add_builtin("set", set_fn());
    env.add_builtin("upper", upper_fn());
    env.add_builtin("lower", lower_fn());
    env.add_builtin("split", split_fn());
    env.add_builtin("join", join_fn());
    env.add_builtin("replace", replace_fn());
    env.add_builtin("contains", contains_fn());
    env.add_builtin("write", write_fn());
    env.add_builtin("append", append_fn());
    env.add_builtin("read", read_fn());
    env.add_builtin("file_exists", file_exists_fn());
    env.add_builtin("tonumber", tonumber_fn());
    env.add_builtin("str", str_fn());
    env.add_builtin("type", type_fn());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: BuiltinFn, args: Vec<Value>) -> EvalResult<Value> {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f(args))
    }

    #[test]
    fn exit_is_an_error_not_a_process_exit() {
        assert_eq!(call(exit_fn(), vec![Value::Number(3.0)]), Err(EvalError::Exit(3)));
        assert_eq!(call(exit_fn(), vec![]), Err(EvalError::Exit(0)));
    }

    #[test]
    fn push_and_pop_share_the_array() {
        let arr = Value::array(vec![]);
        assert_eq!(call(push_fn(), vec![arr.clone(), Value::Number(1.0)]), Ok(Value::Number(1.0)));
        assert_eq!(call(pop_fn(), vec![arr.clone()]), Ok(Value::Number(1.0)));
        assert!(call(pop_fn(), vec![arr]).is_err());
    }

    #[test]
    fn join_stringifies_elements() {
        let arr = Value::array(vec![Value::String("a".into()), Value::Number(2.0)]);
        assert_eq!(
            call(join_fn(), vec![arr, Value::String("-".into())]),
            Ok(Value::String("a-2".into()))
        );
    }

    #[test]
    fn negative_and_fractional_indexes_are_rejected() {
        let arr = Value::array(vec![Value::Number(1.0), Value::Number(2.0)]);
        assert_eq!(
            call(get_fn(), vec![arr.clone(), Value::Number(-1.0)]),
            Err(EvalError::Fault("get: invalid index -1".into()))
        );
        assert_eq!(
            call(set_fn(), vec![arr.clone(), Value::Number(0.5), Value::Null]),
            Err(EvalError::Fault("set: invalid index 0.5".into()))
        );
        assert!(call(slice_fn(), vec![arr.clone(), Value::Number(-1.0), Value::Number(1.0)]).is_err());
        assert_eq!(
            call(slice_fn(), vec![arr, Value::Number(1.0), Value::Number(2.0)]),
            Ok(Value::array(vec![Value::Number(2.0)]))
        );
    }

    #[test]
    fn wrong_arity_is_reported() {
        let err = call(upper_fn(), vec![]).unwrap_err();
        assert_eq!(err, EvalError::Fault("upper expects 1 argument, got 0".into()));
    }
}
