use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::io;

use crate::errors::{CalError, CalResult};

/// Names of the six contact micro-properties the simulator accepts.
pub const EMOD: &str = "emod";
pub const KRATIO: &str = "kratio";
pub const PB_EMOD: &str = "pb_emod";
pub const PB_FRIC: &str = "pb_fric";
pub const PB_COH: &str = "pb_coh";
pub const PB_TEN: &str = "pb_ten";

/// Named real-valued inputs to one simulation run.
///
/// Fields are kept in a `BTreeMap`, so iteration (and therefore the canonical
/// encoding) is always sorted by name regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, value)` pairs, rejecting non-finite values and
    /// duplicate names.
    pub fn from_pairs<I, S>(pairs: I) -> CalResult<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            let name = name.into();
            if set.values.contains_key(&name) {
                return Err(CalError::Validation(format!("duplicate parameter '{name}'")));
            }
            set.insert(name, value)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) -> CalResult<()> {
        let name = name.into();
        if !value.is_finite() {
            return Err(CalError::Validation(format!(
                "parameter '{name}' must be finite, got {value}"
            )));
        }
        // -0.0 == 0.0, so both must encode the same way.
        let value = if value == 0.0 { 0.0 } else { value };
        self.values.insert(name, value);
        Ok(())
    }

    /// Builder-style insert for literals known to be finite.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> CalResult<Self> {
        self.insert(name, value)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Fields in canonical (name-sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Stable textual form: a JSON object with keys sorted by name, laid out
    /// as `{"emod": 10000000000.0, "kratio": 2.0}`.
    ///
    /// Separators and float formatting follow Python's `json.dumps`, so
    /// knowledge-base records written by the older Python tooling keep their
    /// file names.
    pub fn canonical_encoding(&self) -> String {
        let mut ser = serde_json::Serializer::with_formatter(Vec::new(), SpacedFormatter);
        // A BTreeMap<String, f64> of finite values always serializes.
        if self.values.serialize(&mut ser).is_err() {
            return String::new();
        }
        String::from_utf8(ser.into_inner()).unwrap_or_default()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value:e}")?;
            first = false;
        }
        Ok(())
    }
}

/// JSON layout with `", "` and `": "` separators and repr-style floats.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        self.begin_object_key(writer, first)
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(repr_float(value).as_bytes())
    }
}

/// Shortest round-trip digits, positional for exponents in `-4..16` and
/// `1.5e-05` style otherwise.
fn repr_float(value: f64) -> String {
    let sci = format!("{value:e}");
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();

    if (-4..16).contains(&exp) {
        if exp < 0 {
            let zeros = "0".repeat((-exp - 1) as usize);
            format!("{sign}0.{zeros}{digits}")
        } else {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                let pad = "0".repeat(int_len - digits.len());
                format!("{sign}{digits}{pad}.0")
            } else {
                format!("{sign}{}.{}", &digits[..int_len], &digits[int_len..])
            }
        }
    } else {
        let exp_sign = if exp < 0 { '-' } else { '+' };
        let (head, tail) = digits.split_at(1);
        let fraction = if tail.is_empty() {
            String::new()
        } else {
            format!(".{tail}")
        };
        format!("{sign}{head}{fraction}e{exp_sign}{:02}", exp.abs())
    }
}

/// SHA-256 digest of a [`ParameterSet`]'s canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(params: &ParameterSet) -> Self {
        let digest = Sha256::digest(params.canonical_encoding().as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase 64-character hex digest; used as the record file stem.
    pub fn to_hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for byte in self.0 {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return None;
        }
        let mut bytes = [0u8; 32];
        for (i, slot) in bytes.iter_mut().enumerate() {
            *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Self(bytes))
    }

    /// First ten hex characters, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..10].to_string()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_pairs() -> Vec<(&'static str, f64)> {
        vec![
            (EMOD, 1e10),
            (KRATIO, 2.0),
            (PB_EMOD, 5e10),
            (PB_FRIC, 0.5),
            (PB_COH, 5e7),
            (PB_TEN, 5e7),
        ]
    }

    #[test]
    fn fingerprint_ignores_field_order() {
        let forward = ParameterSet::from_pairs(reference_pairs()).unwrap();
        let mut reversed_pairs = reference_pairs();
        reversed_pairs.reverse();
        let reversed = ParameterSet::from_pairs(reversed_pairs).unwrap();

        assert_eq!(forward, reversed);
        assert_eq!(forward.fingerprint(), reversed.fingerprint());
        assert_eq!(forward.canonical_encoding(), reversed.canonical_encoding());
    }

    #[test]
    fn fingerprint_changes_with_any_value() {
        let base = ParameterSet::from_pairs(reference_pairs()).unwrap();
        for (name, value) in reference_pairs() {
            let mut tweaked = base.clone();
            tweaked.insert(name, value * 1.000001).unwrap();
            assert_ne!(base.fingerprint(), tweaked.fingerprint(), "{name}");
        }
    }

    #[test]
    fn canonical_encoding_is_sorted() {
        let params = ParameterSet::new()
            .with("pb_ten", 1.0)
            .unwrap()
            .with("emod", 2.0)
            .unwrap();
        assert_eq!(params.canonical_encoding(), r#"{"emod": 2.0, "pb_ten": 1.0}"#);
    }

    #[test]
    fn fingerprint_matches_existing_knowledge_base_names() {
        let params = ParameterSet::from_pairs(reference_pairs()).unwrap();
        assert_eq!(
            params.canonical_encoding(),
            r#"{"emod": 10000000000.0, "kratio": 2.0, "pb_coh": 50000000.0, "pb_emod": 50000000000.0, "pb_fric": 0.5, "pb_ten": 50000000.0}"#
        );
        assert_eq!(
            params.fingerprint().to_hex(),
            "6599b136170fb10ffd0dbe000835b7c24353aae1e49fd903d6bb3400009922ce"
        );
    }

    #[test]
    fn floats_use_repr_layout() {
        let cases = [
            (1e-5, "1e-05"),
            (1.5e-5, "1.5e-05"),
            (-2.5e-7, "-2.5e-07"),
            (1e-4, "0.0001"),
            (0.1, "0.1"),
            (123.456, "123.456"),
            (0.0, "0.0"),
            (1234567890123456.0, "1234567890123456.0"),
            (1e16, "1e+16"),
            (1e22, "1e+22"),
        ];
        for (value, expected) in cases {
            assert_eq!(repr_float(value), expected, "{value:e}");
        }
    }

    #[test]
    fn negative_zero_shares_fingerprint_with_zero() {
        let pos = ParameterSet::new().with(PB_FRIC, 0.0).unwrap();
        let neg = ParameterSet::new().with(PB_FRIC, -0.0).unwrap();
        assert_eq!(pos, neg);
        assert_eq!(pos.fingerprint(), neg.fingerprint());
        assert_eq!(neg.canonical_encoding(), r#"{"pb_fric": 0.0}"#);
    }

    #[test]
    fn hex_round_trip_and_length() {
        let fp = ParameterSet::from_pairs(reference_pairs()).unwrap().fingerprint();
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
        assert_eq!(Fingerprint::from_hex("not-hex"), None);
        assert_eq!(fp.short().len(), 10);
    }

    #[test]
    fn rejects_non_finite_and_duplicates() {
        assert!(ParameterSet::new().with(EMOD, f64::NAN).is_err());
        assert!(ParameterSet::from_pairs(vec![(EMOD, 1.0), (EMOD, 2.0)]).is_err());
    }

    #[test]
    fn serializes_as_flat_mapping() {
        let params = ParameterSet::new().with(KRATIO, 2.5).unwrap();
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"kratio":2.5}"#);
        let back: ParameterSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
    }
}
