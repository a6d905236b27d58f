use crate::domain::caller::{Caller, Role};
use crate::error::PaymentError;
use axum::http::HeaderMap;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
/// Either header may carry the cron secret.
pub const CRON_KEY_HEADERS: [&str; 2] = ["x-cron-key", "x-api-key"];

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Reads the identity the upstream gateway attached to the request.
pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, PaymentError> {
    let user_id = header(headers, USER_ID_HEADER).ok_or_else(|| {
        PaymentError::AuthenticationError(format!("missing {} header", USER_ID_HEADER))
    })?;
    let role: Role = header(headers, USER_ROLE_HEADER)
        .ok_or_else(|| {
            PaymentError::AuthenticationError(format!("missing {} header", USER_ROLE_HEADER))
        })?
        .parse()?;
    Ok(Caller::new(user_id, role))
}

/// Checks the cron shared secret. With no secret configured nothing passes.
pub fn ensure_cron_authorized(
    headers: &HeaderMap,
    secret: Option<&str>,
) -> Result<(), PaymentError> {
    let Some(expected) = secret.map(str::trim).filter(|s| !s.is_empty()) else {
        return Err(PaymentError::AuthenticationError(
            "cron secret is not configured".to_string(),
        ));
    };
    let presented = CRON_KEY_HEADERS
        .iter()
        .filter_map(|name| header(headers, name));
    for key in presented {
        if key == expected {
            return Ok(());
        }
    }
    Err(PaymentError::AuthenticationError(
        "cron auth failed (missing/invalid key)".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_caller_from_headers() {
        let caller =
            caller_from_headers(&headers(&[("x-user-id", "cust-1"), ("x-user-role", "Customer")]))
                .unwrap();
        assert_eq!(caller, Caller::new("cust-1", Role::Customer));

        for bad in [
            headers(&[("x-user-role", "admin")]),
            headers(&[("x-user-id", "u")]),
            headers(&[("x-user-id", " "), ("x-user-role", "admin")]),
            headers(&[("x-user-id", "u"), ("x-user-role", "root")]),
        ] {
            assert!(matches!(
                caller_from_headers(&bad),
                Err(PaymentError::AuthenticationError(_))
            ));
        }
    }

    #[test]
    fn test_cron_key_accepts_either_header() {
        assert!(ensure_cron_authorized(&headers(&[("x-cron-key", "s3cret")]), Some("s3cret")).is_ok());
        assert!(ensure_cron_authorized(&headers(&[("x-api-key", "s3cret")]), Some("s3cret")).is_ok());
        assert!(
            ensure_cron_authorized(
                &headers(&[("x-cron-key", "wrong"), ("x-api-key", "s3cret")]),
                Some("s3cret")
            )
            .is_ok()
        );
        assert!(ensure_cron_authorized(&headers(&[("x-cron-key", "wrong")]), Some("s3cret")).is_err());
        assert!(ensure_cron_authorized(&HeaderMap::new(), Some("s3cret")).is_err());
    }

    #[test]
    fn test_cron_rejects_everything_without_secret() {
        assert!(ensure_cron_authorized(&headers(&[("x-cron-key", "")]), None).is_err());
        assert!(ensure_cron_authorized(&headers(&[("x-cron-key", "anything")]), Some("")).is_err());
    }
}
