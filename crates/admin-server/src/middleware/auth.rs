//! Operator identity seam (spec §6)
//!
//! The administration surface performs no identity checks of its own. It expects a
//! tower layer to populate [`OperatorIdentity`] in the request extensions before a
//! handler runs; the handler, if it cares, reads the extension rather than parsing
//! headers itself. [`permissive_layer`] is the only implementation shipped here — it
//! stamps every request with a fixed operator name and is explicitly for local
//! development. A production deployment supplies its own layer (mTLS client identity,
//! an upstream gateway's signed header, SSO token introspection) ahead of this one.

use crate::state::AppState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

/// The identity of whoever issued an admin request, as established by whatever layer
/// ran ahead of the handler.
#[derive(Clone, Debug)]
pub struct OperatorIdentity {
    pub operator: String,
    pub authenticated: bool,
}

/// Stamp every request with the configured `default_operator`, unauthenticated. Never
/// use this layer in production — it grants every caller the same identity (spec §6:
/// "a permissive pass-through layer ships for local development only").
pub async fn permissive_layer(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if state.config().operator_identity.permissive {
        req.extensions_mut().insert(OperatorIdentity {
            operator: state.config().operator_identity.default_operator.clone(),
            authenticated: false,
        });
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_identity_construction() {
        let identity = OperatorIdentity {
            operator: "local-dev".to_string(),
            authenticated: false,
        };
        assert_eq!(identity.operator, "local-dev");
        assert!(!identity.authenticated);
    }
}
