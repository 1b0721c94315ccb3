use serde_json::{Number, Value};

/// Rewrite every number that is exactly an `f32` as the `f64` closest to
/// that `f32`'s shortest decimal form, so `0.8123f32` reaches the client as
/// `0.8123` instead of `0.8123000264167786`. Integers are left alone.
pub fn widen_floats(value: Value) -> Value {
    match value {
        Value::Number(number) => Value::Number(widen_number(number)),
        Value::Array(items) => Value::Array(items.into_iter().map(widen_floats).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| (key, widen_floats(value)))
                .collect(),
        ),
        other => other,
    }
}

fn widen_number(number: Number) -> Number {
    if !number.is_f64() {
        return number;
    }
    let Some(wide) = number.as_f64() else {
        return number;
    };

    let narrow = wide as f32;
    if !narrow.is_finite() || f64::from(narrow) != wide {
        return number;
    }

    narrow
        .to_string()
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .unwrap_or(number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_widens_nested_f32() {
        let value = json!({
            "scores": {"PERSON_0": 0.8123_f32, "ORG_1": 0.75_f32},
            "list": [0.7001_f32, 3, "x"],
        });

        let widened = widen_floats(value);

        assert_eq!(widened["scores"]["PERSON_0"], json!(0.8123));
        assert_eq!(widened["scores"]["ORG_1"], json!(0.75));
        assert_eq!(widened["list"], json!([0.7001, 3, "x"]));
    }

    #[test]
    fn test_plain_f64_untouched() {
        let value = json!({"pi": std::f64::consts::PI, "n": -4, "big": u64::MAX});
        assert_eq!(widen_floats(value.clone()), value);
    }

    proptest! {
        #[test]
        fn widening_is_idempotent(
            floats in prop::collection::vec(any::<f32>().prop_filter("finite", |f| f.is_finite()), 0..16),
            doubles in prop::collection::vec(-1e12f64..1e12, 0..8),
        ) {
            let first = floats.first().copied();
            let value = json!({"f32": floats, "f64": doubles, "nested": [{"x": first}]});

            let once = widen_floats(value);
            let twice = widen_floats(once.clone());

            prop_assert_eq!(once, twice);
        }
    }
}
