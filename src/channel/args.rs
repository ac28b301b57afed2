use serde_json::{Map, Value};

use crate::effects::filter::{ParamValue, Params};
use crate::session::SessionError;

/// An enumerated argument as sent by the host: an integer code or a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector<'a> {
    Index(i64),
    Name(&'a str),
}

/// Typed access to a method call's key/value arguments.
///
/// `null` and absent keys are treated alike. Every accessor fails with
/// invalid-arguments naming the key, so nothing reaches the session with a
/// half-parsed payload.
pub struct Args<'a> {
    method: &'a str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    pub fn new(method: &'a str, arguments: &'a Value) -> Result<Self, SessionError> {
        let map = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            other => {
                return Err(SessionError::invalid(format!(
                    "{method}: arguments must be a map, got {}",
                    kind_of(other)
                )))
            }
        };
        Ok(Self { method, map })
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map?.get(key).filter(|v| !v.is_null())
    }

    fn missing(&self, key: &str) -> SessionError {
        SessionError::invalid(format!("{}: missing required argument {key}", self.method))
    }

    fn mistyped(&self, key: &str, expected: &str, got: &Value) -> SessionError {
        SessionError::invalid(format!(
            "{}: argument {key} must be {expected}, got {}",
            self.method,
            kind_of(got)
        ))
    }

    pub fn opt_str(&self, key: &str) -> Result<Option<&'a str>, SessionError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(self.mistyped(key, "a string", other)),
        }
    }

    pub fn str(&self, key: &str) -> Result<&'a str, SessionError> {
        self.opt_str(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_f64(&self, key: &str) -> Result<Option<f64>, SessionError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.mistyped(key, "a number", v)),
        }
    }

    pub fn f64(&self, key: &str) -> Result<f64, SessionError> {
        self.opt_f64(key)?.ok_or_else(|| self.missing(key))
    }

    /// A number in `0.0..=1.0`.
    pub fn opt_unit(&self, key: &str) -> Result<Option<f32>, SessionError> {
        match self.opt_f64(key)? {
            Some(v) if !(0.0..=1.0).contains(&v) => Err(SessionError::invalid(format!(
                "{}: argument {key} must be between 0 and 1, got {v}",
                self.method
            ))),
            other => Ok(other.map(|v| v as f32)),
        }
    }

    pub fn unit(&self, key: &str) -> Result<f32, SessionError> {
        self.opt_unit(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_u32(&self, key: &str) -> Result<Option<u32>, SessionError> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| self.mistyped(key, "a non-negative integer", v)),
        }
    }

    pub fn opt_bool(&self, key: &str) -> Result<Option<bool>, SessionError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(self.mistyped(key, "a boolean", other)),
        }
    }

    pub fn bool(&self, key: &str) -> Result<bool, SessionError> {
        self.opt_bool(key)?.ok_or_else(|| self.missing(key))
    }

    pub fn opt_selector(&self, key: &str) -> Result<Option<Selector<'a>>, SessionError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(name)) => Ok(Some(Selector::Name(name.as_str()))),
            Some(v) => v
                .as_i64()
                .map(|i| Some(Selector::Index(i)))
                .ok_or_else(|| self.mistyped(key, "an integer or a name", v)),
        }
    }

    pub fn selector(&self, key: &str) -> Result<Selector<'a>, SessionError> {
        self.opt_selector(key)?.ok_or_else(|| self.missing(key))
    }

    /// An enumerated argument decoded with `from_index` / `from_name`.
    pub fn opt_enum<T>(
        &self,
        key: &str,
        from_index: fn(i64) -> Option<T>,
        from_name: fn(&str) -> Option<T>,
    ) -> Result<Option<T>, SessionError> {
        let Some(selector) = self.opt_selector(key)? else {
            return Ok(None);
        };
        let decoded = match selector {
            Selector::Index(i) => from_index(i),
            Selector::Name(name) => from_name(name),
        };
        decoded.map(Some).ok_or_else(|| {
            SessionError::invalid(format!("{}: unknown {key} {selector:?}", self.method))
        })
    }

    pub fn enumerated<T>(
        &self,
        key: &str,
        from_index: fn(i64) -> Option<T>,
        from_name: fn(&str) -> Option<T>,
    ) -> Result<T, SessionError> {
        self.opt_enum(key, from_index, from_name)?
            .ok_or_else(|| self.missing(key))
    }

    /// Free-form filter parameters: numbers, booleans, strings and number
    /// lists.
    pub fn params(&self, key: &str) -> Result<Params, SessionError> {
        let map = match self.get(key) {
            None => return Ok(Params::new()),
            Some(Value::Object(map)) => map,
            Some(other) => return Err(self.mistyped(key, "a map", other)),
        };
        let mut params = Params::new();
        for (name, value) in map {
            let param = match value {
                Value::Bool(b) => ParamValue::Flag(*b),
                Value::String(s) => ParamValue::Text(s.clone()),
                Value::Array(items) => {
                    let numbers: Option<Vec<f32>> =
                        items.iter().map(|v| v.as_f64().map(|n| n as f32)).collect();
                    ParamValue::List(numbers.ok_or_else(|| {
                        SessionError::invalid(format!(
                            "{}: {key}.{name} must contain only numbers",
                            self.method
                        ))
                    })?)
                }
                Value::Number(n) => match n.as_f64() {
                    Some(n) => ParamValue::Number(n as f32),
                    None => return Err(self.mistyped(name, "a finite number", value)),
                },
                Value::Null => continue,
                Value::Object(_) => return Err(self.mistyped(name, "a scalar or number list", value)),
            };
            params.insert(name.clone(), param);
        }
        Ok(params)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}
