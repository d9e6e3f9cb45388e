//! JSON implementation of [`PayloadCodec`].
//!
//! A single operation is encoded as
//! `{"operationName": .., "query": .., "variables": {..}}`; a composite body
//! is a JSON array of those objects, and the server answers with an array of
//! per-item results in the same order.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{CodecError, Operation, ParsedValue, PayloadCodec};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireOperation<'a> {
    operation_name: &'a str,
    query: &'a str,
    variables: &'a Map<String, Value>,
}

/// Stateless JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode_operation(&self, operation: &Operation) -> Result<Vec<u8>, CodecError> {
        let wire = WireOperation {
            operation_name: operation.name().as_str(),
            query: operation.document(),
            variables: operation.variables(),
        };
        serde_json::to_vec(&wire).map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })
    }

    fn encode_sequence(&self, items: &[&[u8]]) -> Result<Vec<u8>, CodecError> {
        let values = items
            .iter()
            .map(|item| serde_json::from_slice::<Value>(item))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| CodecError::Encode {
                message: format!("batch item is not valid JSON: {e}"),
            })?;
        serde_json::to_vec(&values).map_err(|e| CodecError::Encode {
            message: e.to_string(),
        })
    }

    fn decode_sequence(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        let values: Vec<Value> = serde_json::from_slice(bytes)?;
        values
            .iter()
            .map(|v| serde_json::to_vec(v).map_err(CodecError::from))
            .collect()
    }

    fn decode(&self, bytes: &[u8]) -> Result<ParsedValue, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{OperationKind, OperationName};

    #[test]
    fn operation_encodes_with_wire_field_names() {
        let mut vars = Map::new();
        vars.insert("episode".into(), json!("JEDI"));
        let op = Operation::new(
            OperationName::new("Hero").unwrap(),
            OperationKind::Query,
            "query Hero($episode: Episode) { hero(episode: $episode) { name } }",
        )
        .with_variables(vars);

        let bytes = JsonCodec.encode_operation(&op).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["operationName"], "Hero");
        assert_eq!(value["variables"]["episode"], "JEDI");
    }

    #[test]
    fn sequence_preserves_item_order() {
        let a = br#"{"n":1}"#.as_slice();
        let b = br#"{"n":2}"#.as_slice();
        let body = JsonCodec.encode_sequence(&[a, b]).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!([{"n": 1}, {"n": 2}])
        );

        let items = JsonCodec.decode_sequence(&body).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(JsonCodec.decode(&items[1]).unwrap(), json!({"n": 2}));
    }

    #[test]
    fn non_array_body_is_a_decode_error() {
        let err = JsonCodec.decode_sequence(br#"{"data":null}"#).unwrap_err();
        assert!(matches!(err, CodecError::Decode { .. }));
    }
}
