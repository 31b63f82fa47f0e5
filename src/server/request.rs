//! The slice of HTTP the page server speaks.

/// Resource named by a request line: the second whitespace-separated token
/// with one leading `/` removed. Anything unparseable names the empty
/// resource.
pub fn resource_name(request: &str) -> String {
    let target = request.split_whitespace().nth(1).unwrap_or("");
    target.strip_prefix('/').unwrap_or(target).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok(String),
    InternalError,
    NotFound,
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Ok(_) => 200,
            Response::InternalError => 500,
            Response::NotFound => 404,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Response::Ok(body) => format!("HTTP/1.1 200 OK\r\n\r\n{body}").into_bytes(),
            // Failures never carry detail back to the client.
            Response::InternalError => b"HTTP/1.1 500 Internal Server Error\r\n".to_vec(),
            Response::NotFound => b"HTTP/1.1 404 Not Found\r\n\r\nnot found".to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_from_request_line() {
        assert_eq!(resource_name("GET /a.out HTTP/1.1\r\nHost: x\r\n\r\n"), "a.out");
        assert_eq!(resource_name("GET fib.so HTTP/1.1"), "fib.so");
        assert_eq!(resource_name("GET / HTTP/1.1"), "");
    }

    #[test]
    fn test_only_one_slash_is_stripped() {
        assert_eq!(resource_name("GET //twice HTTP/1.1"), "/twice");
    }

    #[test]
    fn test_degenerate_requests() {
        assert_eq!(resource_name(""), "");
        assert_eq!(resource_name("GET"), "");
        assert_eq!(resource_name("GET /page"), "page");
    }

    #[test]
    fn test_response_bytes() {
        assert_eq!(
            Response::Ok("6765".into()).to_bytes(),
            b"HTTP/1.1 200 OK\r\n\r\n6765".to_vec()
        );
        assert!(Response::InternalError.to_bytes().starts_with(b"HTTP/1.1 500"));
        assert!(Response::NotFound.to_bytes().ends_with(b"not found"));
        assert_eq!(Response::NotFound.status(), 404);
    }
}
