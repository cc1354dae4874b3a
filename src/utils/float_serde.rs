//! Serde adapters for floats that may be NaN or infinite.
//!
//! JSON has no literal for them and `serde_json` writes them as `null`, which
//! does not read back into a float. With these adapters they are written as the
//! strings `"NaN"`, `"inf"` and `"-inf"`. Reading also accepts `null` as NaN.
//!
//! ```ignore
//! #[serde(with = "crate::utils::float_serde")]
//! pub train_loss: f64,
//! #[serde(with = "crate::utils::float_serde::option")]
//! pub valid_loss: Option<f64>,
//! ```

use num_traits::Float;
use serde::de::{Error, Unexpected};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr<F> {
    Number(F),
    Text(String),
}

fn from_repr<F: Float, E: Error>(repr: Option<Repr<F>>) -> Result<F, E> {
    match repr {
        None => Ok(F::nan()),
        Some(Repr::Number(value)) => Ok(value),
        Some(Repr::Text(text)) => match text.as_str() {
            "NaN" => Ok(F::nan()),
            "inf" => Ok(F::infinity()),
            "-inf" => Ok(F::neg_infinity()),
            other => Err(E::invalid_value(
                Unexpected::Str(other),
                &"a number, \"NaN\", \"inf\" or \"-inf\"",
            )),
        },
    }
}

pub fn serialize<F, S>(value: &F, serializer: S) -> Result<S::Ok, S::Error>
where
    F: Float + Serialize,
    S: Serializer,
{
    if value.is_finite() {
        value.serialize(serializer)
    } else if value.is_nan() {
        serializer.serialize_str("NaN")
    } else if value.is_sign_positive() {
        serializer.serialize_str("inf")
    } else {
        serializer.serialize_str("-inf")
    }
}

pub fn deserialize<'de, F, D>(deserializer: D) -> Result<F, D::Error>
where
    F: Float + Deserialize<'de>,
    D: Deserializer<'de>,
{
    from_repr(Option::<Repr<F>>::deserialize(deserializer)?)
}

struct Adapted<F>(F);

impl<F: Float + Serialize> Serialize for Adapted<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize(&self.0, serializer)
    }
}

/// Same for optional floats; `null` stays `None`.
pub mod option {
    use super::*;

    pub fn serialize<F, S>(value: &Option<F>, serializer: S) -> Result<S::Ok, S::Error>
    where
        F: Float + Serialize,
        S: Serializer,
    {
        value.map(Adapted).serialize(serializer)
    }

    pub fn deserialize<'de, F, D>(deserializer: D) -> Result<Option<F>, D::Error>
    where
        F: Float + Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<Repr<F>>::deserialize(deserializer)?
            .map(|repr| from_repr(Some(repr)))
            .transpose()
    }
}
