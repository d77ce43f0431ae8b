use data_encoding::BASE32HEX_NOPAD;
use std::collections::BTreeMap;

pub type Map = BTreeMap<String, String>;

/// Back-reference from a generated resource to the ingress that owns it.
pub const SOURCE_LABEL: &str = "bilrost.slok.dev/src";

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const NAME: &str = "app.kubernetes.io/name";
pub const COMPONENT: &str = "app.kubernetes.io/component";
pub const INSTANCE: &str = "app.kubernetes.io/instance";

pub const MANAGED_BY_VALUE: &str = "bilrost";

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum DecodeSourceError {
    #[error("source label value {0:?} is not base32hex: {1}")]
    Encoding(String, #[source] data_encoding::DecodeError),

    #[error("source label value {0:?} is not UTF-8")]
    Utf8(String),

    #[error("source label value {0:?} does not decode to <namespace>/<name>")]
    Format(String),
}

/// Encodes an ingress reference into a label value: lower-cased, unpadded base32hex of
/// `<namespace>/<name>`.
///
/// The hex alphabet keeps the value within the characters a label value allows.
pub fn encode_source(namespace: &str, name: &str) -> String {
    let ns = if namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        namespace
    };
    BASE32HEX_NOPAD
        .encode(format!("{ns}/{name}").as_bytes())
        .to_ascii_lowercase()
}

/// Decodes a label value produced by [`encode_source`] into `(namespace, name)`.
pub fn decode_source(value: &str) -> Result<(String, String), DecodeSourceError> {
    let bytes = BASE32HEX_NOPAD
        .decode(value.to_ascii_uppercase().as_bytes())
        .map_err(|e| DecodeSourceError::Encoding(value.to_string(), e))?;
    let decoded = String::from_utf8(bytes).map_err(|_| DecodeSourceError::Utf8(value.to_string()))?;

    let mut parts = decoded.split('/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(ns), Some(name), None) if !name.is_empty() => {
            let ns = if ns.is_empty() { DEFAULT_NAMESPACE } else { ns };
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(DecodeSourceError::Format(value.to_string())),
    }
}

/// Labels set on every resource generated for an ingress' proxy.
pub fn proxy_labels(instance: &str, namespace: &str, ingress: &str) -> Map {
    let mut labels = standard(instance, "oauth2-proxy", "proxy");
    labels.insert(SOURCE_LABEL.to_string(), encode_source(namespace, ingress));
    labels
}

/// The `app.kubernetes.io` label set of a resource managed by the controller.
pub fn standard(instance: &str, name: &str, component: &str) -> Map {
    [
        (MANAGED_BY, MANAGED_BY_VALUE),
        (NAME, name),
        (COMPONENT, component),
        (INSTANCE, instance),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("test-ns", "my-app", "test-ns", "my-app")]
    #[case("", "my-app", "default", "my-app")]
    #[case("a", "b.c-d", "a", "b.c-d")]
    fn source_roundtrip(
        #[case] namespace: &str,
        #[case] name: &str,
        #[case] expected_ns: &str,
        #[case] expected_name: &str,
    ) {
        let value = encode_source(namespace, name);
        assert!(value.len() <= 63, "{value} is too long for a label value");
        assert_eq!(value, value.to_ascii_lowercase());
        assert!(!value.contains('='));
        assert_eq!(
            decode_source(&value).unwrap(),
            (expected_ns.to_string(), expected_name.to_string())
        );
    }

    #[test]
    fn encodes_base32hex() {
        // "a/b" in base32hex is C4NM4.
        assert_eq!(encode_source("a", "b"), "c4nm4");
    }

    #[rstest]
    #[case::not_base32("not base32!")]
    // "a" alone has no separator.
    #[case::no_separator("c4")]
    // "a/b/c" has too many parts.
    #[case::too_many_parts("c4nm4br3")]
    fn source_decode_errors(#[case] value: &str) {
        assert!(decode_source(value).is_err());
    }

    #[test]
    fn proxy_labels_reference_owner() {
        let labels = proxy_labels("my-app-bilrost-proxy", "test-ns", "my-app");
        assert_eq!(labels[MANAGED_BY], "bilrost");
        assert_eq!(labels[NAME], "oauth2-proxy");
        assert_eq!(labels[COMPONENT], "proxy");
        assert_eq!(labels[INSTANCE], "my-app-bilrost-proxy");
        assert_eq!(
            decode_source(&labels[SOURCE_LABEL]).unwrap(),
            ("test-ns".to_string(), "my-app".to_string())
        );
    }
}
