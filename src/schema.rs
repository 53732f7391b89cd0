//! Validators attached to source node outputs.
//!
//! The engine treats a schema as opaque: it computes a value first and then
//! asks the schema whether that value has the declared shape. Anything that
//! implements [`Schema`] works, including plain closures.

use std::any::type_name;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::SchemaError;
use crate::result::Dynamic;

/// Checks a computed value after the fact.
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Dynamic) -> Result<(), SchemaError>;
}

impl<F> Schema for F
where
    F: Fn(&Dynamic) -> Result<(), SchemaError> + Send + Sync,
{
    fn validate(&self, value: &Dynamic) -> Result<(), SchemaError> {
        self(value)
    }
}

/// Accepts every value.
pub fn any() -> Any {
    Any
}

/// Accepts values of the concrete type `T`.
pub fn is<T>() -> Is<T>
where
    T: Send + Sync + 'static,
{
    Is(PhantomData)
}

/// Accepts `serde_json::Value` payloads which deserialize into `T`.
pub fn json<T>() -> Json<T>
where
    T: DeserializeOwned + 'static,
{
    Json(PhantomData)
}

#[derive(Debug, Clone, Copy)]
pub struct Any;

impl Schema for Any {
    fn validate(&self, _: &Dynamic) -> Result<(), SchemaError> {
        Ok(())
    }
}

pub struct Is<T>(PhantomData<fn() -> T>);

impl<T> Is<T>
where
    T: Send + Sync + 'static,
{
    /// Adds a predicate over the typed value on top of the type check.
    pub fn refine<F>(self, message: impl Into<String>, predicate: F) -> Refine<T, F>
    where
        F: Fn(&T) -> bool + Send + Sync,
    {
        Refine {
            message: message.into(),
            predicate,
            _phantom: PhantomData,
        }
    }
}

impl<T> Schema for Is<T>
where
    T: Send + Sync + 'static,
{
    fn validate(&self, value: &Dynamic) -> Result<(), SchemaError> {
        match value.downcast_ref::<T>() {
            Some(_) => Ok(()),
            None => Err(SchemaError::new(format!("Expected {}", type_name::<T>()))),
        }
    }
}

pub struct Refine<T, F> {
    message: String,
    predicate: F,
    _phantom: PhantomData<fn() -> T>,
}

impl<T, F> Schema for Refine<T, F>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + Sync,
{
    fn validate(&self, value: &Dynamic) -> Result<(), SchemaError> {
        let value = value
            .downcast_ref::<T>()
            .ok_or_else(|| SchemaError::new(format!("Expected {}", type_name::<T>())))?;

        if (self.predicate)(value) {
            Ok(())
        } else {
            Err(SchemaError::new(self.message.clone()))
        }
    }
}

pub struct Json<T>(PhantomData<fn() -> T>);

impl<T> Schema for Json<T>
where
    T: DeserializeOwned + 'static,
{
    fn validate(&self, value: &Dynamic) -> Result<(), SchemaError> {
        let value = value
            .downcast_ref::<serde_json::Value>()
            .ok_or_else(|| SchemaError::new("Expected a JSON value"))?;

        T::deserialize(value)
            .map(|_| ())
            .map_err(|e| SchemaError::new(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::dynamic;
    use serde::Deserialize;

    #[test]
    fn test_is() {
        let schema = is::<String>();
        assert!(schema.validate(&dynamic(String::from("#FF0000"))).is_ok());

        let err = schema.validate(&dynamic(42u32)).unwrap_err();
        assert!(err.message.contains("String"));
    }

    #[test]
    fn test_refine() {
        let schema = is::<String>().refine("Expected a hex color", |s| s.starts_with('#'));

        assert!(schema.validate(&dynamic(String::from("#00FF00"))).is_ok());
        assert_eq!(
            schema.validate(&dynamic(String::from("green"))).unwrap_err(),
            SchemaError::new("Expected a hex color"),
        );
        assert!(schema.validate(&dynamic(1i32)).is_err());
    }

    #[test]
    fn test_json() {
        #[derive(Deserialize)]
        #[allow(dead_code)]
        struct Size {
            width: f64,
            height: f64,
        }

        let schema = json::<Size>();
        let ok = dynamic(serde_json::json!({ "width": 10.0, "height": 4.0 }));
        let bad = dynamic(serde_json::json!({ "width": "wide" }));

        assert!(schema.validate(&ok).is_ok());
        assert!(schema.validate(&bad).is_err());
        assert_eq!(
            schema.validate(&dynamic(1u8)).unwrap_err().message,
            "Expected a JSON value"
        );
    }

    #[test]
    fn test_closure_schema() {
        let schema = |value: &Dynamic| match value.downcast_ref::<i64>() {
            Some(n) if *n >= 0 => Ok(()),
            _ => Err(SchemaError::new("Expected a non-negative integer")),
        };

        assert!(schema.validate(&dynamic(3i64)).is_ok());
        assert!(schema.validate(&dynamic(-3i64)).is_err());
        assert!(any().validate(&dynamic(())).is_ok());
    }
}
