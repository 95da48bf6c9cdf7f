//! Mapping of core errors onto transport status codes.

use strongroom_common::Error;

/// HTTP-style status code for an error.
///
/// Partial writes are server faults: the caller cannot fix them by retrying
/// with different input.
pub fn status_code(err: &Error) -> u16 {
    match err {
        Error::Validation(_) => 400,
        Error::Auth(_) => 401,
        Error::AccessDenied(_) => 403,
        Error::NotFound(_) => 404,
        Error::Conflict(_) => 409,
        Error::Crypto(_) | Error::Store(_) | Error::PartialWrite { .. } => 500,
    }
}

/// Whether the error is safe to show to the caller verbatim.
pub fn is_client_error(err: &Error) -> bool {
    (400..500).contains(&status_code(err))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let s = |msg: &str| msg.to_string();
        assert_eq!(status_code(&Error::Validation(s("bad"))), 400);
        assert_eq!(status_code(&Error::Auth(s("no"))), 401);
        assert_eq!(status_code(&Error::AccessDenied(s("no"))), 403);
        assert_eq!(status_code(&Error::NotFound(s("gone"))), 404);
        assert_eq!(status_code(&Error::Conflict(s("dup"))), 409);
        assert_eq!(status_code(&Error::Crypto(s("tag"))), 500);
        assert_eq!(status_code(&Error::Store(s("io"))), 500);

        let partial = Error::Store(s("io")).after_commit("data item created");
        assert_eq!(status_code(&partial), 500);
        assert!(!is_client_error(&partial));
        assert!(is_client_error(&Error::Conflict(s("dup"))));
    }
}
