use std::fmt::Debug;
use std::sync::Arc;

use crate::result::OutputResult;

type EqualityFn = Arc<dyn Fn(&OutputResult, &OutputResult) -> bool + Send + Sync>;

/// Decides whether a subscriber already saw a result.
///
/// A subscriber is only called again when the current result is not the same
/// as the last one it received. Every policy treats two handles to the same
/// allocation as the same result, so no policy can notify more often than
/// [`Equality::Identity`].
#[derive(Clone, Default)]
pub enum Equality {
    /// Same allocation. Cheap, but a recomputed value that happens to be
    /// equal still counts as a change.
    #[default]
    Identity,
    /// Compares `serde_json::Value` payloads and error messages structurally.
    /// Payloads of any other type fall back to identity.
    Json,
    /// User-supplied predicate.
    Custom(EqualityFn),
}

impl Equality {
    pub fn custom<F>(func: F) -> Self
    where
        F: Fn(&OutputResult, &OutputResult) -> bool + Send + Sync + 'static,
    {
        Equality::Custom(Arc::new(func))
    }

    pub(crate) fn same(&self, old: &OutputResult, new: &OutputResult) -> bool {
        if Arc::ptr_eq(old, new) {
            return true;
        }

        match self {
            Equality::Identity => false,
            Equality::Json => match (old.as_ref(), new.as_ref()) {
                (Ok(a), Ok(b)) => {
                    match (
                        a.downcast_ref::<serde_json::Value>(),
                        b.downcast_ref::<serde_json::Value>(),
                    ) {
                        (Some(a), Some(b)) => a == b,
                        _ => false,
                    }
                }
                (Err(a), Err(b)) => a.to_string() == b.to_string(),
                _ => false,
            },
            Equality::Custom(func) => func(old, new),
        }
    }
}

impl Debug for Equality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Equality::Identity => write!(f, "Equality::Identity"),
            Equality::Json => write!(f, "Equality::Json"),
            Equality::Custom(_) => write!(f, "Equality::Custom(*)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::result::{dynamic, error, success};
    use serde_json::json;

    #[test]
    fn test_identity() {
        let a = success(dynamic(json!("#FF0000")));
        let b = success(dynamic(json!("#FF0000")));

        assert!(Equality::Identity.same(&a, &a.clone()));
        assert!(!Equality::Identity.same(&a, &b));
    }

    #[test]
    fn test_json() {
        let a = success(dynamic(json!({ "color": "#FF0000" })));
        let b = success(dynamic(json!({ "color": "#FF0000" })));
        let c = success(dynamic(json!({ "color": "#00FF00" })));

        assert!(Equality::Json.same(&a, &b));
        assert!(!Equality::Json.same(&a, &c));

        let x = success(dynamic(String::from("#FF0000")));
        let y = success(dynamic(String::from("#FF0000")));
        assert!(!Equality::Json.same(&x, &y));
    }

    #[test]
    fn test_json_errors() {
        let a = error(PipelineError::NodeNotFound("node1".into()));
        let b = error(PipelineError::NodeNotFound("node1".into()));
        let c = error(PipelineError::NodeNotFound("node2".into()));

        assert!(Equality::Json.same(&a, &b));
        assert!(!Equality::Json.same(&a, &c));
        assert!(!Equality::Json.same(&a, &success(dynamic(json!(null)))));
    }

    #[test]
    fn test_custom() {
        let both_ok = Equality::custom(|a, b| a.is_ok() && b.is_ok());
        let a = success(dynamic(1u8));
        let b = success(dynamic(2u8));

        assert!(both_ok.same(&a, &b));
        assert!(!both_ok.same(&a, &error(PipelineError::NodeNotFound("n".into()))));
    }
}
