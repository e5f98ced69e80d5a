use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Claims
///
/// The payload structure expected inside an incoming JSON Web Token. Only the
/// subject claim is consumed; it becomes the opaque owner identity string for
/// every ownership comparison.
///
/// Trust boundary: token signatures are **deliberately not verified**. The
/// service treats the subject claim as an asserted, unauthenticated identity,
/// which is the documented (and intentionally weak) ownership model. Expiry,
/// when present, is still honoured.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the opaque owner identity string.
    pub sub: String,
    /// Expiration time (exp): optional; an expired token is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<usize>,
}

/// owner_from_token
///
/// Decodes a bearer token into its owner identity. Accepts the raw compact
/// JWT with or without a leading `Bearer ` marker, so the same function
/// serves the Authorization header, the multipart `authorization` field, and
/// the query-string form.
///
/// Failure mapping: an empty credential is a `BadRequest` (nothing was
/// presented); a present but undecodable or expired token is `Unauthorized`.
pub fn owner_from_token(token: &str) -> Result<String, ApiError> {
    let token = token.strip_prefix("Bearer ").unwrap_or(token).trim();
    if token.is_empty() {
        return Err(ApiError::BadRequest("missing authorization".to_string()));
    }

    // Signature verification is switched off on purpose: the claim is an
    // asserted identity, not a cryptographic one. Expiry is still validated.
    // The call is deprecated upstream but remains the documented switch for
    // exactly this trust model.
    let mut validation = Validation::new(Algorithm::HS256);
    #[allow(deprecated)]
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims.clear();
    validation.validate_exp = true;

    let token_data =
        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => {
                    tracing::debug!("rejecting expired bearer token");
                    ApiError::Unauthorized
                }
                // Malformed token, wrong structure, undecodable claims.
                _ => ApiError::Unauthorized,
            }
        })?;

    Ok(token_data.claims.sub)
}

/// BearerOwner Extractor
///
/// Resolves the owner identity from the `Authorization` header, when one is
/// present. The payload is `Option<String>` rather than a hard requirement
/// because the HTTP surface also accepts the credential as a multipart field
/// (create/update) or a query parameter (get); the handlers merge the two
/// sources before the service runs.
///
/// Rejection: a header that is present but undecodable or expired rejects the
/// request with 401 before the handler body executes.
#[derive(Debug, Clone)]
pub struct BearerOwner(pub Option<String>);

impl<S> FromRequestParts<S> for BearerOwner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(BearerOwner(None));
        };

        owner_from_token(raw).map(|owner| BearerOwner(Some(owner)))
    }
}
