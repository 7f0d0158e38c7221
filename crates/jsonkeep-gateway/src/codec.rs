//! JSON text codec for value trees.
//!
//! Encoding goes through [`Node::to_value`], which refuses cyclic trees, so
//! the encoder can never hang or truncate. Decoding is all-or-nothing: the
//! parser either yields a complete tree or a typed error.

use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};

use jsonkeep_tree::Node;

use crate::error::{GatewayError, GatewayResult};

/// Encode `node` as JSON text.
///
/// `indentation` is the pretty-print width in spaces; `None` or `Some(0)`
/// produces compact output.
pub fn encode(node: &Node, indentation: Option<usize>) -> GatewayResult<String> {
    let value = node
        .to_value()
        .map_err(|e| GatewayError::Serialization(e.to_string()))?;

    match indentation {
        Some(width) if width > 0 => {
            let indent = vec![b' '; width];
            let mut buf = Vec::new();
            let mut ser = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(&indent));
            value
                .serialize(&mut ser)
                .map_err(|e| GatewayError::Serialization(e.to_string()))?;
            String::from_utf8(buf).map_err(|e| GatewayError::Serialization(e.to_string()))
        }
        _ => serde_json::to_string(&value).map_err(|e| GatewayError::Serialization(e.to_string())),
    }
}

/// Decode JSON text into a fresh tree.
pub fn decode(text: &str) -> serde_json::Result<Node> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    Ok(Node::from(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonkeep_tree::{Container, MutableTree};
    use proptest::prelude::*;
    use serde_json::{json, Value};

    #[test]
    fn encode_respects_indentation() {
        let node = Node::from(json!({"a": [1, 2]}));
        assert_eq!(encode(&node, None).unwrap(), r#"{"a":[1,2]}"#);
        assert_eq!(encode(&node, Some(0)).unwrap(), r#"{"a":[1,2]}"#);
        assert_eq!(
            encode(&node, Some(2)).unwrap(),
            "{\n  \"a\": [\n    1,\n    2\n  ]\n}"
        );
        assert_eq!(
            encode(&node, Some(4)).unwrap(),
            "{\n    \"a\": [\n        1,\n        2\n    ]\n}"
        );
    }

    #[test]
    fn encode_rejects_cycles() {
        let root = Container::object();
        root.set("self", &root).unwrap();
        let err = encode(&Node::Tree(root.clone()), Some(2)).unwrap_err();
        assert!(matches!(err, GatewayError::Serialization(_)));
        root.delete("self").unwrap();
    }

    #[test]
    fn decode_rejects_malformed_text() {
        assert!(decode("{not json").is_err());
        assert!(decode("").is_err());
        assert!(decode("{\"a\": 1} trailing").is_err());
    }

    #[test]
    fn encoding_is_deterministic() {
        let node = Node::from(json!({"z": 1, "a": {"b": [true, null]}}));
        assert_eq!(encode(&node, Some(2)).unwrap(), encode(&node, Some(2)).unwrap());
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-z ]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::vec(("[a-z]{1,6}", inner), 0..6)
                    .prop_map(|members| Value::Object(members.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in arb_value(), width in prop::option::of(0usize..5)) {
            let text = encode(&Node::from(value.clone()), width).unwrap();
            let back = decode(&text).unwrap().to_value().unwrap();
            prop_assert_eq!(back, value);
        }
    }
}
