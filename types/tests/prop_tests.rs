use proptest::prelude::*;

use ethws_types::{average_block_time, parse_quantity, parse_quantity_u128, NodeEndpoint, NodeRole};

proptest! {
    /// Leading zeros never change the parsed value.
    #[test]
    fn leading_zeros_are_ignored(n in any::<u64>(), zeros in 0usize..40) {
        let padded = format!("0x{}{:x}", "0".repeat(zeros), n);
        prop_assert_eq!(parse_quantity(&padded).unwrap(), n);
    }

    /// Every u64 quantity parses identically at 128-bit width.
    #[test]
    fn narrow_and_wide_parsers_agree(n in any::<u64>()) {
        let s = format!("{n:#x}");
        prop_assert_eq!(parse_quantity_u128(&s).unwrap(), u128::from(n));
    }

    #[test]
    fn wide_quantities_parse(n in any::<u128>()) {
        prop_assert_eq!(parse_quantity_u128(&format!("{n:#x}")).unwrap(), n);
    }

    /// Values above u64::MAX overflow the narrow parser instead of wrapping.
    #[test]
    fn narrow_parser_rejects_wide_values(n in (u128::from(u64::MAX) + 1)..u128::MAX) {
        let s = format!("{n:#x}");
        prop_assert!(parse_quantity(&s).is_err());
    }

    /// Evenly spaced blocks average to their spacing, in any sample order.
    #[test]
    fn evenly_spaced_blocks_average_to_the_spacing(
        start in 0u64..1_000_000,
        len in 2u64..50,
        spacing in 1i64..120,
        reverse in any::<bool>(),
    ) {
        let mut samples: Vec<(u64, i64)> = (0..len)
            .map(|i| (start + i, 1_600_000_000 + i as i64 * spacing))
            .collect();
        if reverse {
            samples.reverse();
        }
        let avg = average_block_time(&samples);
        prop_assert!((avg - spacing as f64).abs() < 1e-9);
    }

    /// Node 0 is always the websocket primary; every other slot is HTTP.
    #[test]
    fn role_and_scheme_follow_the_index(index in 0usize..16, port in 1u16..) {
        let endpoint = NodeEndpoint::new(index, "10.0.0.1", port).unwrap();
        prop_assert_eq!(endpoint.is_primary(), index == 0);
        let expected_role = if index == 0 { NodeRole::Primary } else { NodeRole::Secondary };
        prop_assert_eq!(endpoint.role, expected_role);
        let scheme = if index == 0 { "ws" } else { "http" };
        prop_assert_eq!(endpoint.url(), format!("{scheme}://10.0.0.1:{port}"));
    }
}
