use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDecl;
use crate::env::Env;
use crate::error::EvalResult;

#[derive(Debug)]
pub struct Class {
    pub name: String,
    pub parent: Option<Rc<Class>>,
    pub fields: RefCell<HashMap<String, Value>>,
    pub methods: HashMap<String, Rc<FunctionDecl>>,
}

impl Class {
    fn find_field(&self, attr: &str) -> Option<Value> {
        if let Some(val) = self.fields.borrow().get(attr).cloned() {
            return Some(val);
        }
        self.parent.as_ref().and_then(|p| p.find_field(attr))
    }

    fn find_method(&self, name: &str) -> Option<Rc<FunctionDecl>> {
        if let Some(m) = self.methods.get(name) {
            return Some(Rc::clone(m));
        }
        self.parent.as_ref().and_then(|p| p.find_method(name))
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    String(String),
    Boolean(bool),
    Array(Rc<RefCell<Vec<Value>>>),
    Null,
    Function(Rc<FunctionDecl>),
    Class(Rc<Class>),
    Instance {
        class: Rc<Class>,
        fields: Rc<RefCell<HashMap<String, Value>>>,
    },
    /// A method bound to the instance or class it was looked up on.
    Method {
        func: Rc<FunctionDecl>,
        receiver: Box<Value>,
    },
}

/// A number usable as an array or string index: finite, whole and non-negative.
pub fn to_index(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

type ArrayRef = *const RefCell<Vec<Value>>;

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.eq_nested(other, &mut Vec::new())
    }
}

impl Value {
    /// Structural equality. Array pairs already under comparison count as
    /// equal, so self-referencing arrays terminate.
    fn eq_nested(&self, other: &Value, comparing: &mut Vec<(ArrayRef, ArrayRef)>) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => {
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if Rc::ptr_eq(a, b) || comparing.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                if a.len() != b.len() {
                    return false;
                }
                comparing.push(pair);
                let equal = a.iter().zip(b.iter()).all(|(x, y)| x.eq_nested(y, comparing));
                comparing.pop();
                equal
            }
            (Value::Null, Value::Null) => true,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b) || a.name == b.name,
            (Value::Class(a), Value::Class(b)) => Rc::ptr_eq(a, b) || a.name == b.name,
            (Value::Instance { fields, .. }, Value::Instance { fields: fields2, .. }) => {
                Rc::ptr_eq(fields, fields2)
            }
            (Value::Method { func, receiver }, Value::Method { func: func2, receiver: receiver2 }) => {
                Rc::ptr_eq(func, func2) && receiver.eq_nested(receiver2, comparing)
            }
            _ => false,
        }
    }

    /// Shared by `Display` and `repr`. An array already being written shows as `[...]`.
    fn write_nested(&self, f: &mut fmt::Formatter, quoted: bool, open: &mut Vec<ArrayRef>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) if quoted => {
                let text = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                f.write_str(&text)
            }
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Array(arr) => {
                let ptr = Rc::as_ptr(arr);
                if open.contains(&ptr) {
                    return f.write_str("[...]");
                }
                open.push(ptr);
                f.write_str("[")?;
                for (i, item) in arr.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_nested(f, quoted, open)?;
                }
                open.pop();
                f.write_str("]")
            }
            Value::Null => f.write_str("null"),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Class(class) => write!(f, "<class {}>", class.name),
            Value::Instance { class, .. } => write!(f, "<instance of {}>", class.name),
            Value::Method { func, .. } => write!(f, "<method {}>", func.name),
        }
    }
}

impl Value {
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    pub fn as_bool(&self) -> bool {
        match self {
            Value::Boolean(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(arr) => !arr.borrow().is_empty(),
            Value::Null => false,
            Value::Function(_) | Value::Class(_) | Value::Instance { .. } | Value::Method { .. } => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Boolean(_) => "boolean",
            Value::Array(_) => "array",
            Value::Null => "null",
            Value::Function(_) => "function",
            Value::Class(_) => "class",
            Value::Instance { .. } => "instance",
            Value::Method { .. } => "method",
        }
    }

    /// Console representation: like `Display`, but strings are quoted.
    pub fn repr(&self) -> String {
        Repr(self).to_string()
    }

    pub fn get_attr(&self, attr: &str) -> Option<Value> {
        match self {
            Value::Instance { class, fields } => {
                if let Some(val) = fields.borrow().get(attr).cloned() {
                    return Some(val);
                }
                if let Some(val) = class.find_field(attr) {
                    return Some(val);
                }
                class.find_method(attr).map(|func| Value::Method {
                    func,
                    receiver: Box::new(self.clone()),
                })
            }
            Value::Class(class) => {
                if let Some(val) = class.find_field(attr) {
                    return Some(val);
                }
                class.find_method(attr).map(|func| Value::Method {
                    func,
                    receiver: Box::new(self.clone()),
                })
            }
            _ => None,
        }
    }

    pub fn set_attr(&self, attr: String, value: Value) -> EvalResult<()> {
        match self {
            Value::Instance { fields, .. } => {
                fields.borrow_mut().insert(attr, value);
                Ok(())
            }
            Value::Class(class) => {
                class.fields.borrow_mut().insert(attr, value);
                Ok(())
            }
            other => Err(format!("Cannot set attribute '{}' on {}", attr, other.type_name()).into()),
        }
    }

    /// Instantiate a class, running `__init__` (found on the class or a parent) when present.
    pub async fn call_as_class(&self, args: Vec<Value>, env: &mut Env) -> EvalResult<Value> {
        let Value::Class(class) = self else {
            return Err(format!("'{}' is not a class", self.type_name()).into());
        };
        let instance = Value::Instance {
            class: Rc::clone(class),
            fields: Rc::new(RefCell::new(HashMap::new())),
        };
        if let Some(init) = class.find_method("__init__") {
            let mut call_args = vec![instance.clone()];
            call_args.extend(args);
            crate::eval::call_function(&init, call_args, env).await?;
        } else if !args.is_empty() {
            return Err(format!("Class '{}' takes no constructor arguments", class.name).into());
        }
        Ok(instance)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.write_nested(f, false, &mut Vec::new())
    }
}

struct Repr<'a>(&'a Value);

impl fmt::Display for Repr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.write_nested(f, true, &mut Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_quotes_strings_inside_arrays() {
        let arr = Value::array(vec![Value::String("a\"b".into()), Value::Number(2.0)]);
        assert_eq!(arr.repr(), r#"["a\"b", 2]"#);
        assert_eq!(arr.to_string(), "[a\"b, 2]");
    }

    #[test]
    fn arrays_compare_by_contents() {
        let a = Value::array(vec![Value::Number(1.0)]);
        let b = Value::array(vec![Value::Number(1.0)]);
        assert_eq!(a, b);
        assert_ne!(a, Value::array(vec![]));
    }

    #[test]
    fn self_referencing_arrays_render_and_compare() {
        let a = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(items) = &a {
            items.borrow_mut().push(a.clone());
        }
        assert_eq!(a.to_string(), "[1, [...]]");
        assert_eq!(a.repr(), "[1, [...]]");
        assert_eq!(a, a.clone());

        let b = Value::array(vec![Value::Number(1.0)]);
        if let Value::Array(items) = &b {
            items.borrow_mut().push(b.clone());
        }
        assert_eq!(a, b);
        assert_ne!(a, Value::array(vec![Value::Number(1.0), Value::Null]));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Null.as_bool());
        assert!(!Value::String(String::new()).as_bool());
        assert!(Value::Number(0.5).as_bool());
        assert!(!Value::array(vec![]).as_bool());
    }
}
