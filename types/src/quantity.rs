//! JSON-RPC hex quantity helpers.
//!
//! Upstream nodes encode every numeric field as a `0x`-prefixed hex string
//! ("quantity"). Decoding is strict: a missing prefix, an empty body, or a
//! non-hex digit is an error rather than a silent zero.

use crate::TypesError;

/// Number of wei in one ether.
pub const WEI_PER_ETHER: f64 = 1e18;

fn strip(s: &str) -> Result<&str, TypesError> {
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| TypesError::MissingPrefix(s.to_string()))?;
    if body.is_empty() {
        return Err(TypesError::EmptyQuantity);
    }
    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(TypesError::InvalidQuantity(s.to_string()));
    }
    Ok(body.trim_start_matches('0'))
}

/// Decode a quantity into a `u64`.
pub fn parse_quantity(s: &str) -> Result<u64, TypesError> {
    let digits = strip(s)?;
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 16 {
        return Err(TypesError::Overflow {
            value: s.to_string(),
            bits: 64,
        });
    }
    u64::from_str_radix(digits, 16).map_err(|_| TypesError::InvalidQuantity(s.to_string()))
}

/// Decode a quantity into a `u128` (wei amounts, gas prices).
pub fn parse_quantity_u128(s: &str) -> Result<u128, TypesError> {
    let digits = strip(s)?;
    if digits.is_empty() {
        return Ok(0);
    }
    if digits.len() > 32 {
        return Err(TypesError::Overflow {
            value: s.to_string(),
            bits: 128,
        });
    }
    u128::from_str_radix(digits, 16).map_err(|_| TypesError::InvalidQuantity(s.to_string()))
}

/// Encode a `u64` as a minimal quantity (`0x0`, `0x1a`, ...).
pub fn to_quantity(n: u64) -> String {
    format!("{n:#x}")
}

/// Convert a wei amount into ether. Precision loss beyond f64 is accepted;
/// the value is for display.
pub fn wei_to_ether(wei: u128) -> f64 {
    wei as f64 / WEI_PER_ETHER
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_common_quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0X00ff").unwrap(), 255);
        assert_eq!(parse_quantity("0xffffffffffffffff").unwrap(), u64::MAX);
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert!(matches!(
            parse_quantity("12"),
            Err(TypesError::MissingPrefix(_))
        ));
        assert_eq!(parse_quantity("0x"), Err(TypesError::EmptyQuantity));
        assert!(matches!(
            parse_quantity("0xzz"),
            Err(TypesError::InvalidQuantity(_))
        ));
        assert!(matches!(
            parse_quantity("0x10000000000000000"),
            Err(TypesError::Overflow { bits: 64, .. })
        ));
    }

    #[test]
    fn wide_quantities_fit_u128() {
        // 1000 ether in wei
        assert_eq!(
            parse_quantity_u128("0x3635c9adc5dea00000").unwrap(),
            1_000_000_000_000_000_000_000
        );
        assert!((wei_to_ether(1_500_000_000_000_000_000) - 1.5).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn encoded_quantities_decode_to_the_same_value(n in any::<u64>()) {
            prop_assert_eq!(parse_quantity(&to_quantity(n)).unwrap(), n);
        }

        #[test]
        fn arbitrary_strings_never_panic(s in "\\PC*") {
            let _ = parse_quantity(&s);
            let _ = parse_quantity_u128(&s);
        }
    }
}
