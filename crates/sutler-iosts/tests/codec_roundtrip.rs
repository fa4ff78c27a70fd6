//! Serialization round-trip law: for every well-formed model action `m`,
//! `deserialize(serialize(m))` is structurally identical to `m`.

use proptest::prelude::*;

use sutler_iosts::{ActionCodec, ActionSchema, ActionType, Value, ValueKind};

const ORDER: ActionType = ActionType::model("Order");
const STATUS: ActionType = ActionType::model("Status");
const PING: ActionType = ActionType::model("Ping");

fn codec() -> ActionCodec {
    let mut codec = ActionCodec::new();
    codec
        .register(ActionSchema::new(
            ORDER,
            &[
                ("count", ValueKind::Int),
                ("label", ValueKind::Str),
                ("rush", ValueKind::Bool),
            ],
        ))
        .unwrap();
    codec
        .register(ActionSchema::new(
            STATUS,
            &[("code", ValueKind::Int), ("detail", ValueKind::Str)],
        ))
        .unwrap();
    codec.register(ActionSchema::new(PING, &[])).unwrap();
    codec
}

// Strings lean on characters the encoder must escape.
fn field_string() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[ -~\u{e9}\u{3b1}\\\\\"\n\t]{0,24}")
        .expect("valid regex")
}

proptest! {
    #[test]
    fn order_roundtrips(count in any::<i64>(), label in field_string(), rush in any::<bool>()) {
        let codec = codec();
        let action = codec
            .schema("Order")
            .unwrap()
            .action(vec![Value::Int(count), Value::Str(label), Value::Bool(rush)])
            .unwrap();
        let text = codec.serialize(&action).unwrap();
        prop_assert_eq!(codec.deserialize(&text).unwrap(), action);
    }

    #[test]
    fn status_roundtrips(code in any::<i64>(), detail in field_string()) {
        let codec = codec();
        let action = codec
            .schema("Status")
            .unwrap()
            .action(vec![Value::Int(code), Value::Str(detail)])
            .unwrap();
        let text = codec.serialize(&action).unwrap();
        prop_assert_eq!(codec.deserialize(&text).unwrap(), action);
    }

    #[test]
    fn decoder_never_panics_on_arbitrary_text(text in "\\PC{0,64}") {
        let codec = codec();
        let _ = codec.deserialize(&text);
    }
}

#[test]
fn zero_field_action_roundtrips() {
    let codec = codec();
    let action = codec.schema("Ping").unwrap().action(vec![]).unwrap();
    let text = codec.serialize(&action).unwrap();
    assert_eq!(text, "Ping");
    assert_eq!(codec.deserialize(&text).unwrap(), action);
}
