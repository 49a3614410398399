//! Query-string parameter extraction for upgrade paths

/// Fetch a single parameter from a raw query string
///
/// Empty values count as absent; the relay endpoints never accept an
/// empty udid or rid.
pub(crate) fn query_param(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        let mut parts = pair.splitn(2, '=');
        if parts.next() == Some(key) {
            match parts.next() {
                Some(value) if !value.is_empty() => return Some(value.to_string()),
                _ => return None,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        let query = "udid=00008100-001338811EE10033&rid=abc123";

        assert_eq!(
            query_param(query, "udid").as_deref(),
            Some("00008100-001338811EE10033")
        );
        assert_eq!(query_param(query, "rid").as_deref(), Some("abc123"));
        assert_eq!(query_param(query, "missing"), None);
    }

    #[test]
    fn test_query_param_empty_value_is_absent() {
        assert_eq!(query_param("udid=&rid=r", "udid"), None);
        assert_eq!(query_param("udid", "udid"), None);
    }

    #[test]
    fn test_query_param_value_may_contain_equals() {
        assert_eq!(query_param("token=a=b", "token").as_deref(), Some("a=b"));
    }
}
