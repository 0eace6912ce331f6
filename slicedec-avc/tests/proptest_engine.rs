//! Property-based tests for the binary arithmetic coder.
//!
//! Round-trips decision, bypass and terminate bins through the
//! encoder/decoder pair, and the macroblock-layer binarizations built on
//! top of them.

use proptest::prelude::*;
use slicedec_avc::binarize;
use slicedec_avc::{ArithDecoder, ArithEncoder, BiContext};

/// Flush a payload whose last bin is a set end-of-slice marker and pad it
/// for the decoder's lookahead.
fn sealed(encoder: ArithEncoder) -> Vec<u8> {
    let mut data = encoder.finish();
    data.extend_from_slice(&[0, 0]);
    data
}

proptest! {
    /// Decision bins round-trip through one adapting context and both
    /// sides agree on the final model state.
    #[test]
    fn roundtrip_decisions_single_context(
        state in 0u8..64,
        mps in any::<bool>(),
        bits in prop::collection::vec(any::<bool>(), 1..256),
    ) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = BiContext::new(state, mps);
        for &bit in &bits {
            encoder.encode_decision(&mut enc_ctx, bit);
        }
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut dec_ctx = BiContext::new(state, mps);
        for (i, &expected) in bits.iter().enumerate() {
            prop_assert_eq!(
                decoder.decode_decision(&mut dec_ctx).unwrap(),
                expected,
                "mismatch at bin {}",
                i
            );
        }
        prop_assert!(decoder.decode_terminate().unwrap());
        prop_assert_eq!(dec_ctx.state(), enc_ctx.state());
        prop_assert_eq!(dec_ctx.mps(), enc_ctx.mps());
    }

    /// Bypass bins round-trip in order.
    #[test]
    fn roundtrip_bypass_bins(bits in prop::collection::vec(any::<bool>(), 1..256)) {
        let mut encoder = ArithEncoder::new();
        for &bit in &bits {
            encoder.encode_bypass(bit);
        }
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        for (i, &expected) in bits.iter().enumerate() {
            prop_assert_eq!(decoder.decode_bypass().unwrap(), expected, "mismatch at bin {}", i);
        }
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Interleaved decision and bypass bins round-trip.
    #[test]
    fn roundtrip_mixed_bins(
        state in 0u8..64,
        ops in prop::collection::vec((any::<bool>(), any::<bool>()), 1..200),
    ) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = BiContext::new(state, false);
        for &(bypass, bit) in &ops {
            if bypass {
                encoder.encode_bypass(bit);
            } else {
                encoder.encode_decision(&mut enc_ctx, bit);
            }
        }
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut dec_ctx = BiContext::new(state, false);
        for (i, &(bypass, expected)) in ops.iter().enumerate() {
            let got = if bypass {
                decoder.decode_bypass().unwrap()
            } else {
                decoder.decode_decision(&mut dec_ctx).unwrap()
            };
            prop_assert_eq!(got, expected, "mismatch at bin {}", i);
        }
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Cleared end-of-slice bins decode cleared until the set one.
    #[test]
    fn roundtrip_terminate_runs(count in 0usize..48) {
        let mut encoder = ArithEncoder::new();
        for _ in 0..count {
            encoder.encode_terminate(false);
        }
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        for i in 0..count {
            prop_assert!(!decoder.decode_terminate().unwrap(), "early stop at bin {}", i);
        }
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Bypass Exp-Golomb values round-trip at every order the decoder
    /// uses.
    #[test]
    fn roundtrip_exp_golomb_bypass(value in 0u32..100_000, k in 0u32..4) {
        let mut encoder = ArithEncoder::new();
        binarize::encode_exp_golomb_bypass(&mut encoder, k, value);
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        prop_assert_eq!(binarize::exp_golomb_bypass(&mut decoder, k).unwrap(), value);
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Unary bin strings round-trip.
    #[test]
    fn roundtrip_unary(value in 0u32..64) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = vec![BiContext::new(10, false); 2];
        binarize::encode_unary(&mut encoder, &mut enc_ctx, 1, value);
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut ctx = vec![BiContext::new(10, false); 2];
        prop_assert_eq!(binarize::unary(&mut decoder, &mut ctx, 1).unwrap(), value);
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Truncated unary bin strings round-trip up to their cap.
    #[test]
    fn roundtrip_unary_max(
        (max_symbol, value) in (1u32..10).prop_flat_map(|max| (Just(max), 0..=max)),
    ) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = vec![BiContext::new(10, false); 2];
        binarize::encode_unary_max(&mut encoder, &mut enc_ctx, 1, max_symbol, value);
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut ctx = vec![BiContext::new(10, false); 2];
        prop_assert_eq!(
            binarize::unary_max(&mut decoder, &mut ctx, 1, max_symbol).unwrap(),
            value
        );
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Coefficient level magnitudes round-trip across the Exp-Golomb
    /// escape at thirteen prefix bins.
    #[test]
    fn roundtrip_level_magnitude(value in 0u32..4096) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = BiContext::new(10, false);
        binarize::encode_unary_exp_golomb_level(&mut encoder, &mut enc_ctx, value);
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut ctx = BiContext::new(10, false);
        prop_assert_eq!(
            binarize::unary_exp_golomb_level(&mut decoder, &mut ctx).unwrap(),
            value
        );
        prop_assert!(decoder.decode_terminate().unwrap());
    }

    /// Motion magnitude tails round-trip across the Exp-Golomb escape at
    /// eight prefix bins.
    #[test]
    fn roundtrip_motion_magnitude(value in 0u32..2048, max_bin in 2u32..5) {
        let mut encoder = ArithEncoder::new();
        let mut enc_ctx = vec![BiContext::new(10, false); 5];
        binarize::encode_unary_exp_golomb_mv(&mut encoder, &mut enc_ctx, max_bin, value);
        encoder.encode_terminate(true);
        let data = sealed(encoder);

        let mut decoder = ArithDecoder::new(&data).unwrap();
        let mut ctx = vec![BiContext::new(10, false); 5];
        prop_assert_eq!(
            binarize::unary_exp_golomb_mv(&mut decoder, &mut ctx, max_bin).unwrap(),
            value
        );
        prop_assert!(decoder.decode_terminate().unwrap());
    }
}

mod unit_tests {
    use super::*;

    #[test]
    fn test_every_initial_state_roundtrips() {
        let pattern = [true, false, false, true, true, true, false, true];
        for state in 0..64 {
            for mps in [false, true] {
                let mut encoder = ArithEncoder::new();
                let mut enc_ctx = BiContext::new(state, mps);
                for &bit in &pattern {
                    encoder.encode_decision(&mut enc_ctx, bit);
                }
                encoder.encode_terminate(true);
                let data = sealed(encoder);

                let mut decoder = ArithDecoder::new(&data).unwrap();
                let mut ctx = BiContext::new(state, mps);
                for &expected in &pattern {
                    assert_eq!(
                        decoder.decode_decision(&mut ctx).unwrap(),
                        expected,
                        "state {} mps {}",
                        state,
                        mps
                    );
                }
                assert!(decoder.decode_terminate().unwrap());
            }
        }
    }
}
