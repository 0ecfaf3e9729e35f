//! Value filters used in token pipes (`{[price|formatfloat:2]}`).
use anyhow::{anyhow, bail};
use std::{collections::HashMap, fmt, rc::Rc};
use tessel_common::{Data, Value};

/// A filter: transforms a value, given the literal arguments of the invocation.
pub type Filter = Rc<dyn Fn(&Value, &[Value]) -> anyhow::Result<Value>>;

/// Named filters.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Filter>,
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.filters.keys().collect();
        names.sort();
        f.debug_tuple("FilterRegistry").field(&names).finish()
    }
}

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn number(v: &Value, filter: &str) -> anyhow::Result<f64> {
    let n = v.to_number();
    if n.is_nan() {
        bail!("{filter}: expected a number, got {}", v.type_name());
    }
    Ok(n)
}

impl FilterRegistry {
    /// An empty registry.
    pub fn new() -> FilterRegistry {
        FilterRegistry::default()
    }

    /// A registry with the built-in filters.
    pub fn with_builtins() -> FilterRegistry {
        let mut r = FilterRegistry::new();
        r.register("uppercase", |v, _| Ok(Value::from(v.to_display_string().to_uppercase())));
        r.register("lowercase", |v, _| Ok(Value::from(v.to_display_string().to_lowercase())));
        r.register("formatfloat", |v, args| {
            if v.is_nullish() {
                return Ok(Value::from(""));
            }
            let n = number(v, "formatfloat")?;
            let digits = match args.first() {
                None => 2,
                Some(d) => {
                    let d = number(d, "formatfloat")?;
                    if !(0.0..=20.0).contains(&d) {
                        bail!("formatfloat: invalid precision {d}");
                    }
                    d as usize
                }
            };
            Ok(Value::from(format!("{n:.digits$}")))
        });
        r.register("add", |v, args| {
            Ok(Value::from(number(v, "add")? + number(&arg(args, 0), "add")?))
        });
        r.register("multiply", |v, args| {
            Ok(Value::from(number(v, "multiply")? * number(&arg(args, 0), "multiply")?))
        });
        r.register("not", |v, _| Ok(Value::Bool(!v.is_truthy())));
        r.register("is", |v, args| {
            let other = arg(args, 0);
            Ok(Value::Bool(
                v.same(&other) || (!v.is_nullish() && v.to_display_string() == other.to_display_string()),
            ))
        });
        r.register("yesno", |v, args| {
            let (yes, no) = (
                args.first().cloned().unwrap_or_else(|| Value::from("yes")),
                args.get(1).cloned().unwrap_or_else(|| Value::from("no")),
            );
            Ok(if v.is_truthy() { yes } else { no })
        });
        r.register("default", |v, args| {
            Ok(if v.is_nullish() || v.as_str() == Some("") {
                arg(args, 0)
            } else {
                v.clone()
            })
        });
        r.register("join", |v, args| {
            let sep = args.first().map(Value::to_display_string).unwrap_or_else(|| ",".to_string());
            match v {
                Value::Array(a) => Ok(Value::from(
                    a.to_vec()
                        .iter()
                        .map(Value::to_display_string)
                        .collect::<Vec<_>>()
                        .join(&sep),
                )),
                v if v.is_nullish() => Ok(Value::from("")),
                v => Ok(Value::from(v.to_display_string())),
            }
        });
        r.register("length", |v, _| match v {
            Value::Array(a) => Ok(Value::from(a.len())),
            Value::Object(o) => Ok(Value::from(o.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            v if v.is_nullish() => Ok(Value::from(0)),
            v => Err(anyhow!("length: {} has no length", v.type_name())),
        });
        r.register("json", |v, _| Ok(Value::from(serde_json::to_string(&v.to_json())?)));
        r.register("prepend", |v, args| {
            Ok(Value::from(format!("{}{}", arg(args, 0).to_display_string(), v.to_display_string())))
        });
        r.register("append", |v, args| {
            Ok(Value::from(format!("{}{}", v.to_display_string(), arg(args, 0).to_display_string())))
        });
        r
    }

    /// Registers (or replaces) a filter.
    pub fn register(&mut self, name: &str, filter: impl Fn(&Value, &[Value]) -> anyhow::Result<Value> + 'static) {
        self.filters.insert(name.to_string(), Rc::new(filter));
    }

    pub fn resolve(&self, name: &str) -> Option<Filter> {
        self.filters.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }
}
