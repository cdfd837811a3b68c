//! Classification of remote responses.

use serde::de::DeserializeOwned;

use crate::link;

const UNKNOWN_ERROR: &str = "unknown error";

/// Outcome of one remote call.
///
/// Remote failures are values, not errors: the sync engine turns them into
/// error resource states that keep the cached data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiResponse<T> {
    /// Decoded body, plus the next page cursor when the remote advertises one.
    Success { body: T, next_page: Option<u32> },
    /// Nothing to decode. The cached value stands.
    Empty,
    /// Human-readable failure.
    Error { message: String },
}

impl<T> ApiResponse<T> {
    pub fn success(body: T) -> Self {
        Self::Success {
            body,
            next_page: None,
        }
    }

    pub fn page(body: T, next_page: Option<u32>) -> Self {
        Self::Success { body, next_page }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Response for a call that never produced a status line.
    pub fn from_transport_error(message: Option<String>) -> Self {
        match message {
            Some(message) if !message.is_empty() => Self::error(message),
            _ => Self::error(UNKNOWN_ERROR),
        }
    }

    /// Classify a completed HTTP exchange.
    ///
    /// - 204, 304 and 2xx with an empty body are `Empty`
    /// - other 2xx decode `body`; the `Link` header supplies the next page
    /// - anything else is an `Error` carrying the body, else the reason
    pub fn from_http(status: u16, reason: Option<&str>, body: &str, link: Option<&str>) -> Self
    where
        T: DeserializeOwned,
    {
        if status == 204 || status == 304 {
            return Self::Empty;
        }

        if (200..300).contains(&status) {
            if body.trim().is_empty() {
                return Self::Empty;
            }
            return match serde_json::from_str(body) {
                Ok(body) => Self::Success {
                    body,
                    next_page: link.and_then(link::next_page),
                },
                Err(e) => Self::error(format!("Failed to parse response: {}", e)),
            };
        }

        if !body.trim().is_empty() {
            Self::error(body)
        } else {
            match reason {
                Some(reason) if !reason.is_empty() => Self::error(reason),
                _ => Self::error(UNKNOWN_ERROR),
            }
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ApiResponse<U> {
        match self {
            Self::Success { body, next_page } => ApiResponse::Success {
                body: f(body),
                next_page,
            },
            Self::Empty => ApiResponse::Empty,
            Self::Error { message } => ApiResponse::Error { message },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_common::User;

    const USER_JSON: &str = r#"{"login": "octocat", "avatar_url": null}"#;

    #[test]
    fn test_success_with_body() {
        let response: ApiResponse<User> = ApiResponse::from_http(200, Some("OK"), USER_JSON, None);
        match response {
            ApiResponse::Success { body, next_page } => {
                assert_eq!(body.login, "octocat");
                assert_eq!(next_page, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_success_reads_next_page_from_link() {
        let link = r#"<https://api.github.com/search/repositories?q=foo&page=2>; rel="next", <https://api.github.com/search/repositories?q=foo&page=34>; rel="last""#;
        let response: ApiResponse<User> = ApiResponse::from_http(200, None, USER_JSON, Some(link));
        assert!(matches!(
            response,
            ApiResponse::Success {
                next_page: Some(2),
                ..
            }
        ));
    }

    #[test]
    fn test_empty_responses() {
        let no_content: ApiResponse<User> = ApiResponse::from_http(204, None, "", None);
        let not_modified: ApiResponse<User> = ApiResponse::from_http(304, None, "", None);
        let blank: ApiResponse<User> = ApiResponse::from_http(200, None, "  ", None);
        assert_eq!(no_content, ApiResponse::Empty);
        assert_eq!(not_modified, ApiResponse::Empty);
        assert_eq!(blank, ApiResponse::Empty);
    }

    #[test]
    fn test_error_prefers_body_then_reason() {
        let with_body: ApiResponse<User> =
            ApiResponse::from_http(404, Some("Not Found"), "no such user", None);
        let with_reason: ApiResponse<User> = ApiResponse::from_http(500, Some("Server Error"), "", None);
        let bare: ApiResponse<User> = ApiResponse::from_http(599, None, "", None);

        assert_eq!(with_body, ApiResponse::error("no such user"));
        assert_eq!(with_reason, ApiResponse::error("Server Error"));
        assert_eq!(bare, ApiResponse::error("unknown error"));
    }

    #[test]
    fn test_undecodable_body_is_error() {
        let response: ApiResponse<User> = ApiResponse::from_http(200, None, "not json", None);
        assert!(matches!(response, ApiResponse::Error { .. }));
    }

    #[test]
    fn test_transport_error_message() {
        let response: ApiResponse<User> = ApiResponse::from_transport_error(None);
        assert_eq!(response, ApiResponse::error("unknown error"));

        let response: ApiResponse<User> =
            ApiResponse::from_transport_error(Some("connection refused".to_string()));
        assert_eq!(response, ApiResponse::error("connection refused"));
    }

    #[test]
    fn test_map_keeps_cursor() {
        let response = ApiResponse::page(3, Some(4)).map(|n| n * 2);
        assert_eq!(response, ApiResponse::page(6, Some(4)));
    }
}
