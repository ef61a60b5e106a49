//! Unit tests for the value model and its conversions.

use rstest::rstest;
use time::macros::datetime;

use super::*;

#[rstest]
#[case::null(Value::Null, r#"{"type":"null"}"#)]
#[case::int(Value::Int(-3), r#"{"type":"int","value":-3}"#)]
#[case::string(Value::String("hi".into()), r#"{"type":"string","value":"hi"}"#)]
#[case::timestamp(
    Value::Timestamp(datetime!(2024-01-01 0:00 UTC)),
    r#"{"type":"timestamp","value":"2024-01-01T00:00:00Z"}"#
)]
#[case::seq(
    Value::Seq(vec![Value::Bool(true)]),
    r#"{"type":"seq","value":[{"type":"bool","value":true}]}"#
)]
fn serialises_with_type_tags(#[case] value: Value, #[case] expected: &str) {
    assert_eq!(serde_json::to_string(&value).expect("serialise"), expected);
    let parsed: Value = serde_json::from_str(expected).expect("deserialise");
    assert_eq!(parsed, value);
}

#[rstest]
#[case::null("null", Value::Null)]
#[case::bool("false", Value::Bool(false))]
#[case::negative("-12", Value::Int(-12))]
#[case::float("1.5e3", Value::Float(1500.0))]
#[case::timestamp("2024-02-29T12:00:00Z", Value::Timestamp(datetime!(2024-02-29 12:00 UTC)))]
#[case::nan_stays_text("NaN", Value::String("NaN".into()))]
#[case::text("Hello World", Value::String("Hello World".into()))]
fn infers_literals(#[case] raw: &str, #[case] expected: Value) {
    assert_eq!(Value::infer(raw), expected);
}

#[test]
fn plain_json_round_trip_keeps_kinds() {
    let json = serde_json::json!({"a": [1, 2.5, "x"], "b": null});
    let value = Value::from_json(json.clone());
    let Value::Map(entries) = &value else {
        panic!("expected map, got {value:?}");
    };
    assert_eq!(
        entries.get("a"),
        Some(&Value::Seq(vec![
            Value::Int(1),
            Value::Float(2.5),
            Value::String("x".into()),
        ]))
    );
    assert_eq!(value.to_json(), json);
}

#[test]
fn display_prints_strings_raw() {
    assert_eq!(Value::String("abc".into()).to_string(), "abc");
    assert_eq!(Value::Int(8).to_string(), "8");
    assert_eq!(
        Value::Timestamp(datetime!(2024-01-02 3:04:05 UTC)).to_string(),
        "2024-01-02T03:04:05Z"
    );
}

#[test]
fn integers_never_coerce_to_float() {
    let err = f64::from_value(Value::Int(5)).expect_err("strict");
    assert_eq!(
        err,
        ValueError::Mismatch {
            expected: "float",
            found: "int",
        }
    );
}

#[test]
fn narrowing_rejects_out_of_range() {
    let err = u8::from_value(Value::Int(300)).expect_err("overflow");
    assert_eq!(
        err,
        ValueError::OutOfRange {
            target: "u8",
            value: 300,
        }
    );
    assert_eq!(i32::from_value(Value::Int(-7)), Ok(-7));
}

#[test]
fn option_maps_null_to_none() {
    assert_eq!(Option::<i64>::from_value(Value::Null), Ok(None));
    assert_eq!(Option::<i64>::from_value(Value::Int(1)), Ok(Some(1)));
    assert_eq!(None::<String>.into_value(), Value::Null);
}

#[test]
fn sequences_convert_elementwise() {
    let value = vec!["a", "b"].into_value();
    let back = Vec::<String>::from_value(value).expect("convert");
    assert_eq!(back, vec!["a".to_owned(), "b".to_owned()]);
    let mixed = Value::Seq(vec![Value::String("a".into()), Value::Int(1)]);
    assert!(Vec::<String>::from_value(mixed).is_err());
}

#[test]
fn maps_convert_values() {
    let mut map = BTreeMap::new();
    map.insert("x".to_owned(), 1_i64);
    let value = map.clone().into_value();
    assert_eq!(BTreeMap::<String, i64>::from_value(value), Ok(map));
}

#[rstest]
#[case::option(Option::<i64>::shape(), TypeShape::Ref(Box::new(TypeShape::named("i64"))))]
#[case::vec(Vec::<String>::shape(), TypeShape::Seq(Box::new(TypeShape::named("String"))))]
#[case::map(
    BTreeMap::<String, bool>::shape(),
    TypeShape::Map(Box::new(TypeShape::named("String")), Box::new(TypeShape::named("bool")))
)]
#[case::any(Value::shape(), TypeShape::Any)]
#[case::unit(<()>::shape(), TypeShape::Unit)]
fn container_shapes(#[case] shape: TypeShape, #[case] expected: TypeShape) {
    assert_eq!(shape, expected);
}

#[test]
fn tuples_become_positional_args() {
    let args = (1_i64, "two", true).into_args();
    assert_eq!(
        args,
        vec![Value::Int(1), Value::String("two".into()), Value::Bool(true)]
    );
    assert!(().into_args().is_empty());
}
