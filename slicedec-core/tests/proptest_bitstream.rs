//! Property-based tests for bitstream operations.
//!
//! Verifies round-trip correctness of BitReader/BitWriter and the
//! emulation prevention helpers over arbitrary payloads.

use proptest::prelude::*;
use slicedec_core::bitstream::{
    insert_emulation_prevention, strip_emulation_prevention, BitReader, BitWriter,
};

proptest! {
    /// Writing and reading a byte produces the same value.
    #[test]
    fn roundtrip_bits_u8(value in 0u8..=255) {
        let mut writer = BitWriter::new();
        writer.write_bits(value as u32, 8);

        let mut reader = BitReader::new(writer.data());
        prop_assert_eq!(reader.read_bits(8).unwrap() as u8, value);
    }

    /// Arbitrary bit widths round-trip.
    #[test]
    fn roundtrip_bits_variable_width(value in 0u32..=0xFFFF, width in 1u8..=16) {
        let masked = value & ((1u32 << width) - 1);

        let mut writer = BitWriter::new();
        writer.write_bits(masked, width);
        writer.align_to_byte();

        let mut reader = BitReader::new(writer.data());
        prop_assert_eq!(reader.read_bits(width).unwrap(), masked);
    }

    /// Individual bits round-trip in order.
    #[test]
    fn roundtrip_individual_bits(bits in prop::collection::vec(any::<bool>(), 1..100)) {
        let mut writer = BitWriter::new();
        for &bit in &bits {
            writer.write_bit(bit);
        }
        writer.align_to_byte();

        let mut reader = BitReader::new(writer.data());
        for (i, &expected) in bits.iter().enumerate() {
            prop_assert_eq!(reader.read_bit().unwrap(), expected, "mismatch at bit {}", i);
        }
    }

    /// Unsigned Exp-Golomb round-trip.
    #[test]
    fn roundtrip_exp_golomb_unsigned(value in 0u32..=65534) {
        let mut writer = BitWriter::new();
        writer.write_ue(value);
        writer.align_to_byte();

        let mut reader = BitReader::new(writer.data());
        prop_assert_eq!(reader.read_ue().unwrap(), value);
    }

    /// Signed Exp-Golomb round-trip over the motion vector range.
    #[test]
    fn roundtrip_exp_golomb_signed(value in -32767i32..=32767) {
        let mut writer = BitWriter::new();
        writer.write_se(value);
        writer.align_to_byte();

        let mut reader = BitReader::new(writer.data());
        prop_assert_eq!(reader.read_se().unwrap(), value);
    }

    /// Sequences of mixed ue/se values round-trip.
    #[test]
    fn roundtrip_mixed_exp_golomb(
        ue_values in prop::collection::vec(0u32..1000, 1..10),
        se_values in prop::collection::vec(-500i32..500, 1..10)
    ) {
        let mut writer = BitWriter::new();
        for (&ue, &se) in ue_values.iter().zip(se_values.iter()) {
            writer.write_ue(ue);
            writer.write_se(se);
        }
        writer.align_to_byte();

        let mut reader = BitReader::new(writer.data());
        for (&want_ue, &want_se) in ue_values.iter().zip(se_values.iter()) {
            prop_assert_eq!(reader.read_ue().unwrap(), want_ue);
            prop_assert_eq!(reader.read_se().unwrap(), want_se);
        }
    }

    /// Emulation prevention insertion and removal are inverse.
    #[test]
    fn roundtrip_emulation_prevention(data in prop::collection::vec(any::<u8>(), 1..200)) {
        let escaped = insert_emulation_prevention(&data);
        let unescaped = strip_emulation_prevention(&escaped);
        prop_assert_eq!(data, unescaped);
    }

    /// Escaped payloads never contain start codes.
    #[test]
    fn emulation_prevention_no_start_codes(data in prop::collection::vec(any::<u8>(), 1..200)) {
        let escaped = insert_emulation_prevention(&data);

        for i in 0..escaped.len().saturating_sub(2) {
            if escaped[i] == 0 && escaped[i + 1] == 0 {
                prop_assert!(
                    escaped[i + 2] != 0 && escaped[i + 2] != 1,
                    "potential start code at {}",
                    i
                );
            }
        }
    }

    /// Bit position tracking stays accurate under reads.
    #[test]
    fn bit_position_tracking(bits_to_read in 1usize..64, data_len in 8usize..32) {
        let data: Vec<u8> = (0..data_len as u8).collect();
        let mut reader = BitReader::new(&data);

        let total_bits = data_len * 8;
        let bits_to_read = bits_to_read.min(total_bits);

        prop_assert_eq!(reader.position(), 0);
        prop_assert_eq!(reader.remaining_bits(), total_bits);

        for _ in 0..bits_to_read {
            reader.read_bit().unwrap();
        }

        prop_assert_eq!(reader.position(), bits_to_read);
        prop_assert_eq!(reader.remaining_bits(), total_bits - bits_to_read);
    }

    /// align_to_byte always lands on a byte boundary.
    #[test]
    fn byte_alignment(initial_bits in 0u8..8, data in prop::collection::vec(any::<u8>(), 2..10)) {
        let mut reader = BitReader::new(&data);

        for _ in 0..initial_bits {
            reader.read_bit().unwrap();
        }

        if initial_bits == 0 {
            prop_assert!(reader.is_byte_aligned());
        } else {
            prop_assert!(!reader.is_byte_aligned());
        }

        reader.align_to_byte();
        prop_assert!(reader.is_byte_aligned());
    }

    /// Skipping advances the position exactly.
    #[test]
    fn skip_bits(skip_count in 1usize..32, data in prop::collection::vec(any::<u8>(), 8..16)) {
        let mut reader = BitReader::new(&data);
        let total_bits = data.len() * 8;
        let skip_count = skip_count.min(total_bits);

        reader.skip(skip_count).unwrap();

        prop_assert_eq!(reader.position(), skip_count);
        prop_assert_eq!(reader.remaining_bits(), total_bits - skip_count);
    }
}

mod unit_tests {
    use super::*;

    #[test]
    fn test_exp_golomb_powers_of_two() {
        for exp in 0..15 {
            let value = (1u32 << exp) - 1;
            let mut writer = BitWriter::new();
            writer.write_ue(value);
            writer.align_to_byte();

            let mut reader = BitReader::new(writer.data());
            assert_eq!(reader.read_ue().unwrap(), value, "failed for {}", value);
        }
    }

    #[test]
    fn test_signed_exp_golomb_symmetry() {
        for value in -100..=100 {
            let mut writer = BitWriter::new();
            writer.write_se(value);
            writer.align_to_byte();

            let mut reader = BitReader::new(writer.data());
            assert_eq!(reader.read_se().unwrap(), value, "failed for {}", value);
        }
    }

    #[test]
    fn test_emulation_prevention_all_patterns() {
        for byte3 in 0u8..=3 {
            let data = vec![0x00, 0x00, byte3];
            let escaped = insert_emulation_prevention(&data);
            let unescaped = strip_emulation_prevention(&escaped);
            assert_eq!(data, unescaped, "failed for 0x0000{:02x}", byte3);
        }
    }

    #[test]
    fn test_emulation_prevention_chained() {
        let data = vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0x03];
        let escaped = insert_emulation_prevention(&data);
        let unescaped = strip_emulation_prevention(&escaped);
        assert_eq!(data, unescaped);
    }

    #[test]
    fn test_empty_payload() {
        let data: Vec<u8> = vec![];
        let escaped = insert_emulation_prevention(&data);
        let unescaped = strip_emulation_prevention(&escaped);
        assert_eq!(data, unescaped);
    }

    #[test]
    fn test_trailing_bits_alignment() {
        for initial_bits in 0u8..7 {
            let mut writer = BitWriter::new();
            for _ in 0..initial_bits {
                writer.write_bit(false);
            }
            writer.write_trailing_bits();
            assert!(writer.is_byte_aligned());
        }
    }
}
