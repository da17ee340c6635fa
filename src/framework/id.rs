use crate::core::error::{ApigwError, ApigwResult};

/// Split a slash-delimited import id into exactly `N` non-empty parts
///
/// `names` describes each part and is only used to build the error message.
pub fn parse_id<const N: usize>(raw: &str, names: [&str; N]) -> ApigwResult<[String; N]> {
    let parts: Vec<&str> = raw.split('/').collect();
    if parts.len() != N || parts.iter().any(|part| part.is_empty()) {
        let expected: Vec<String> = names.iter().map(|name| format!("<{}>", name)).collect();
        return Err(ApigwError::validation(
            "id",
            format!(
                "invalid id '{}', expected format {}",
                raw,
                expected.join("/")
            ),
        ));
    }

    Ok(std::array::from_fn(|index| parts[index].to_string()))
}

/// Join parts into a composite id
pub fn join_id(parts: &[&str]) -> String {
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let [gateway, env, api] =
            parse_id("g/e/a", ["gateway_id", "environment_id", "api_id"]).unwrap();
        assert_eq!((gateway.as_str(), env.as_str(), api.as_str()), ("g", "e", "a"));
    }

    #[test]
    fn test_parse_id_rejects_wrong_arity() {
        let err = parse_id("g/e", ["gateway_id", "environment_id", "api_id"]).unwrap_err();
        assert!(err
            .to_string()
            .contains("expected format <gateway_id>/<environment_id>/<api_id>"));
        assert!(parse_id("g//a", ["a", "b", "c"]).is_err());
    }
}
