// canstim/tests/bitframe.rs
//
// Frame expansion scenarios: wire layout, stuffing, CRC, mutation.

use canstim::{
    seeded_rng, BitFrame, BitKind, BitPhase, BitTiming, BitValue, BrsFlag, EsiFlag, Frame,
    FrameFlags, FrameKind, IdentKind, RtrFlag, StuffKind,
};
use rand::Rng;

fn nominal() -> BitTiming {
    BitTiming::new(4, 3, 3, 3, 2).unwrap()
}

fn data_timing() -> BitTiming {
    BitTiming::new(2, 1, 1, 1, 1).unwrap()
}

fn expand(frame: Frame) -> BitFrame {
    BitFrame::new(frame, nominal(), data_timing())
}

/// Recomputes CRC-15 from the serialised bits, skipping all stuff bits.
fn rescan_crc15(bf: &BitFrame) -> u32 {
    let mut crc = 0u32;
    for bit in bf.bits() {
        if bit.kind() == BitKind::Crc {
            break;
        }
        if bit.stuff_kind() != StuffKind::NoStuff {
            continue;
        }
        let next = bit.value() as u32 ^ ((crc >> 14) & 0x1);
        crc = (crc << 1) & 0x7FFF;
        if next == 1 {
            crc ^= 0xC599;
        }
    }
    crc
}

/// Recomputes CRC-17/21 from the serialised bits; normal stuff bits are
/// part of the input, fixed stuff bits are not.
fn rescan_crc_fd(bf: &BitFrame, width: u32, poly: u32) -> u32 {
    let mask = (1u32 << width) - 1;
    let mut crc = 1 << (width - 1);
    for bit in bf.bits() {
        if bit.kind() == BitKind::Crc {
            break;
        }
        if bit.stuff_kind() == StuffKind::Fixed {
            continue;
        }
        let next = bit.value() as u32 ^ ((crc >> (width - 1)) & 0x1);
        crc = (crc << 1) & mask;
        if next == 1 {
            crc ^= poly;
        }
    }
    crc
}

/// Reads the CRC bits written into the frame, MSB first.
fn read_crc_bits(bf: &BitFrame) -> u32 {
    let mut crc = 0u32;
    for bit in bf.bits() {
        if bit.kind() == BitKind::Crc && bit.stuff_kind() == StuffKind::NoStuff {
            crc = (crc << 1) | bit.value() as u32;
        }
    }
    crc
}

/// Inverse of the 3-bit Gray code used for the stuff count.
fn gray_decode(encoded: u8) -> u8 {
    match encoded {
        0b000 => 0,
        0b001 => 1,
        0b011 => 2,
        0b010 => 3,
        0b110 => 4,
        0b111 => 5,
        0b101 => 6,
        0b100 => 7,
        _ => panic!("not a 3-bit value"),
    }
}

/// No 6 equal consecutive bits may survive in the stuffed region (up to
/// the CRC delimiter for classical frames, up to the stuff count for FD).
fn assert_stuffing_valid(bf: &BitFrame) {
    let mut run = 0;
    let mut prev = None;
    for bit in bf.bits() {
        if matches!(bit.kind(), BitKind::CrcDelim | BitKind::StuffCnt) {
            break;
        }
        if prev == Some(bit.value()) {
            run += 1;
        } else {
            run = 1;
        }
        assert!(run <= 5, "{} equal bits in a row in stuffed region", run);
        prev = Some(bit.value());
    }
}

fn random_frame(rng: &mut impl Rng) -> Frame {
    let mut frame = Frame::any();
    frame.randomize(rng);
    frame
}

// ===== Scenario: classical frame with the all-dominant header =====

#[test]
fn zero_id_classical_frame_expands_to_known_sequence() {
    let flags = FrameFlags::new(
        FrameKind::Can20,
        IdentKind::Base,
        RtrFlag::DataFrame,
        BrsFlag::DontShift,
        EsiFlag::ErrorActive,
    );
    let frame = Frame::with_data(flags, 0, 0x000, &[]).unwrap();
    let bf = expand(frame);

    // CRC-15 over an all-dominant input stays zero, so the frame is one
    // long dominant run broken only by stuff bits, then the recessive tail.
    assert_eq!(bf.crc(), 0x0000);
    assert_eq!(bf.len(), 53);

    let stuff_positions = [5, 11, 17, 23, 29, 35];
    for (i, bit) in bf.bits().iter().enumerate() {
        let expected = if stuff_positions.contains(&i) {
            assert!(bit.is_stuff_bit(), "bit {} should be a stuff bit", i);
            BitValue::Recessive
        } else if i >= 40 {
            // CRC delimiter, ACK, ACK delimiter, EOF, intermission.
            BitValue::Recessive
        } else {
            BitValue::Dominant
        };
        assert_eq!(bit.value(), expected, "value of bit {}", i);
    }

    assert_eq!(rescan_crc15(&bf), 0);
}

// ===== Scenario: large CAN FD frame =====

#[test]
fn large_fd_frame_crc_region() {
    let flags = FrameFlags::new(
        FrameKind::CanFd,
        IdentKind::Base,
        RtrFlag::DataFrame,
        BrsFlag::Shift,
        EsiFlag::ErrorActive,
    );
    let frame = Frame::with_data(flags, 0xF, 0x40, &[0x55; 64]).unwrap();
    let bf = expand(frame);

    assert_eq!(bf.frame().data_len(), 64);

    // Above 16 data bytes the frame carries the 21-bit CRC.
    let crc_bits: Vec<_> = bf
        .bits()
        .iter()
        .filter(|b| b.kind() == BitKind::Crc && b.stuff_kind() == StuffKind::NoStuff)
        .collect();
    assert_eq!(crc_bits.len(), 21);

    // Fixed stuff bits sit after every 4th CRC bit, and one more guards
    // the region right after the parity bit: 6 in total around the CRC.
    assert_eq!(bf.num_stuff_bits_of(BitKind::Crc, StuffKind::Fixed), 5);
    assert_eq!(
        bf.num_stuff_bits_of(BitKind::StuffParity, StuffKind::Fixed),
        1
    );
    assert_eq!(bf.num_stuff_bits_of(BitKind::StuffCnt, StuffKind::Fixed), 1);

    // Every 4 real CRC bits are followed by a fixed stuff bit of opposite
    // value.
    let first_crc = bf.index_of(0, BitKind::Crc);
    let mut real_crc_bits = 0;
    let mut index = first_crc;
    while bf.bit(index).kind() == BitKind::Crc {
        if bf.bit(index).stuff_kind() == StuffKind::NoStuff {
            real_crc_bits += 1;
            if real_crc_bits % 4 == 0 {
                let stuff = bf.bit(index + 1);
                assert_eq!(stuff.stuff_kind(), StuffKind::Fixed);
                assert_eq!(stuff.value(), bf.bit(index).value().opposite());
            }
        }
        index += 1;
    }

    // Stuff count bookkeeping: counter, Gray encoding and parity agree
    // with what is actually transmitted.
    assert_eq!(
        bf.stuff_count() as usize,
        bf.num_stuff_bits(StuffKind::Normal) % 8
    );

    let sc = bf.index_of_no_stuff(0, BitKind::StuffCnt);
    let transmitted = (bf.bit(sc).value() as u8) << 2
        | (bf.bit(sc + 1).value() as u8) << 1
        | bf.bit(sc + 2).value() as u8;
    assert_eq!(gray_decode(transmitted), bf.stuff_count());

    let parity = bf.bit_of_no_stuff(0, BitKind::StuffParity).value() as u8;
    assert_eq!(
        parity,
        ((transmitted >> 2) ^ (transmitted >> 1) ^ transmitted) & 0x1
    );

    assert_eq!(rescan_crc_fd(&bf, 21, 0x302899), read_crc_bits(&bf));
}

// ===== Scenario: error frame splice into an FD data field =====

#[test]
fn error_splice_retimes_previous_bit_and_appends_error_frame() {
    let flags = FrameFlags::new(
        FrameKind::CanFd,
        IdentKind::Base,
        RtrFlag::DataFrame,
        BrsFlag::Shift,
        EsiFlag::ErrorActive,
    );
    let frame = Frame::with_data(flags, 8, 0x29C, &[0xF0; 8]).unwrap();
    let mut bf = expand(frame);

    let index = bf.index_of(10, BitKind::Data);
    let head: Vec<(BitKind, BitValue)> = bf.bits()[..index - 1]
        .iter()
        .map(|b| (b.kind(), b.value()))
        .collect();

    bf.insert_act_err_frm(index);

    // Head preserved; the bit right before the splice keeps kind and value
    // but gets its phase 2 rebuilt at the nominal rate.
    for (i, &(kind, value)) in head.iter().enumerate() {
        assert_eq!(bf.bit(i).kind(), kind);
        assert_eq!(bf.bit(i).value(), value);
    }
    let retimed = bf.bit(index - 1);
    assert_eq!(
        retimed.len_cycles(BitPhase::Ph2),
        (nominal().ph2 * nominal().brp) as usize
    );

    // 6 dominant flag bits, 8 recessive delimiters, 3 intermission bits,
    // nothing else.
    assert_eq!(bf.len(), index + 17);
    for i in 0..6 {
        assert_eq!(bf.bit(index + i).kind(), BitKind::ActErrFlag);
        assert_eq!(bf.bit(index + i).value(), BitValue::Dominant);
    }
    for i in 6..14 {
        assert_eq!(bf.bit(index + i).kind(), BitKind::ErrDelim);
        assert_eq!(bf.bit(index + i).value(), BitValue::Recessive);
    }
    for i in 14..17 {
        assert_eq!(bf.bit(index + i).kind(), BitKind::Interm);
        assert_eq!(bf.bit(index + i).value(), BitValue::Recessive);
    }
}

#[test]
fn passive_error_frame_is_recessive() {
    let flags = FrameFlags::any().with_kind(FrameKind::Can20);
    let frame = Frame::with_data(flags, 1, 0x100, &[0xFF]).unwrap();
    let mut bf = expand(frame);

    let index = bf.index_of(0, BitKind::Dlc);
    bf.insert_pas_err_frm(index);

    for i in 0..6 {
        assert_eq!(bf.bit(index + i).kind(), BitKind::PasErrFlag);
        assert_eq!(bf.bit(index + i).value(), BitValue::Recessive);
    }
}

// ===== Scenario: arbitration loss =====

#[test]
fn arbitration_loss_at_first_differing_id_bit() {
    let flags = FrameFlags::new(
        FrameKind::Can20,
        IdentKind::Base,
        RtrFlag::DataFrame,
        BrsFlag::DontShift,
        EsiFlag::ErrorActive,
    );
    let winner = expand(Frame::with_data(flags, 0, 0x245, &[]).unwrap());
    let mut loser = expand(Frame::with_data(flags, 0, 0x445, &[]).unwrap());

    // Find the first identifier bit where the two frames differ; the node
    // transmitting recessive there loses.
    let diff = (0..11)
        .find(|&n| {
            winner.bit_of_no_stuff(n, BitKind::BaseIdent).value()
                != loser.bit_of_no_stuff(n, BitKind::BaseIdent).value()
        })
        .unwrap();
    let index = loser.index_of_no_stuff(diff, BitKind::BaseIdent);
    assert_eq!(
        loser.bit(index).value(),
        BitValue::Recessive,
        "0x445 transmits recessive where 0x245 is dominant"
    );

    assert!(loser.loose_arbit(index));

    let ack = loser.index_of(0, BitKind::Ack);
    for (i, bit) in loser.bits().iter().enumerate().skip(index) {
        if i == ack {
            assert_eq!(bit.value(), BitValue::Dominant);
        } else {
            assert_eq!(bit.value(), BitValue::Recessive);
        }
    }
}

// ===== Round-trip and randomised invariants =====

/// Reads identifier, DLC, data and flags back from the expanded bits.
fn read_back(bf: &BitFrame) -> Frame {
    let bits: Vec<_> = bf
        .bits()
        .iter()
        .filter(|b| b.stuff_kind() == StuffKind::NoStuff)
        .collect();

    let field = |kind: BitKind| -> Vec<BitValue> {
        bits.iter()
            .filter(|b| b.kind() == kind)
            .map(|b| b.value())
            .collect()
    };
    let to_int = |values: &[BitValue]| -> u32 {
        values
            .iter()
            .fold(0, |acc, &v| (acc << 1) | v as u32)
    };

    let is_fd = !field(BitKind::Edl).is_empty();
    let ext_bits = field(BitKind::ExtIdent);
    let ident_kind = if ext_bits.is_empty() {
        IdentKind::Base
    } else {
        IdentKind::Extended
    };
    let rtr = if field(BitKind::Rtr).first() == Some(&BitValue::Recessive) {
        RtrFlag::RtrFrame
    } else {
        RtrFlag::DataFrame
    };
    let brs = if field(BitKind::Brs).first() == Some(&BitValue::Recessive) {
        BrsFlag::Shift
    } else {
        BrsFlag::DontShift
    };
    let esi = if field(BitKind::Esi).first() == Some(&BitValue::Recessive) {
        EsiFlag::ErrorPassive
    } else {
        EsiFlag::ErrorActive
    };
    let kind = if is_fd { FrameKind::CanFd } else { FrameKind::Can20 };
    let flags = FrameFlags::new(kind, ident_kind, rtr, brs, esi);

    let base = to_int(&field(BitKind::BaseIdent));
    let ident = match ident_kind {
        IdentKind::Base => base,
        IdentKind::Extended => (base << 18) | to_int(&ext_bits),
    };

    let dlc = to_int(&field(BitKind::Dlc)) as u8;

    let data_bits = field(BitKind::Data);
    let data: Vec<u8> = data_bits
        .chunks(8)
        .map(|byte| byte.iter().fold(0u8, |acc, &v| (acc << 1) | v as u8))
        .collect();

    Frame::with_data(flags, dlc, ident, &data).unwrap()
}

#[test]
fn random_frames_round_trip_through_bits() {
    let mut rng = seeded_rng(0x5EED_0001);

    for _ in 0..64 {
        let frame = random_frame(&mut rng);
        let bf = expand(frame);
        let read = read_back(&bf);
        assert_eq!(read, frame, "frame: {}", frame);
    }
}

#[test]
fn random_frames_stuff_correctly() {
    let mut rng = seeded_rng(0x5EED_0002);

    for _ in 0..64 {
        let frame = random_frame(&mut rng);
        let bf = expand(frame);
        assert_stuffing_valid(&bf);
    }
}

#[test]
fn random_classical_frames_carry_their_own_crc15() {
    let mut rng = seeded_rng(0x5EED_0003);
    let flags = FrameFlags::any().with_kind(FrameKind::Can20);

    for _ in 0..64 {
        let mut frame = Frame::with_flags(flags);
        frame.randomize(&mut rng);
        let bf = expand(frame);

        assert_eq!(rescan_crc15(&bf), read_crc_bits(&bf), "frame: {}", frame);
        assert_eq!(rescan_crc15(&bf), bf.crc());
    }
}

#[test]
fn random_fd_frames_carry_their_own_crc() {
    let mut rng = seeded_rng(0x5EED_0004);
    let flags = FrameFlags::any().with_kind(FrameKind::CanFd);

    for _ in 0..64 {
        let mut frame = Frame::with_flags(flags);
        frame.randomize(&mut rng);
        let bf = expand(frame);

        let (width, poly) = if frame.data_len() <= 16 {
            (17, 0x3685B)
        } else {
            (21, 0x302899)
        };
        assert_eq!(
            rescan_crc_fd(&bf, width, poly),
            read_crc_bits(&bf),
            "frame: {}",
            frame
        );
    }
}

#[test]
fn random_fd_frames_decode_their_stuff_count() {
    let mut rng = seeded_rng(0x5EED_0005);
    let flags = FrameFlags::any().with_kind(FrameKind::CanFd);

    for _ in 0..64 {
        let mut frame = Frame::with_flags(flags);
        frame.randomize(&mut rng);
        let bf = expand(frame);

        let sc = bf.index_of_no_stuff(0, BitKind::StuffCnt);
        let transmitted = (bf.bit(sc).value() as u8) << 2
            | (bf.bit(sc + 1).value() as u8) << 1
            | bf.bit(sc + 2).value() as u8;
        assert_eq!(gray_decode(transmitted), bf.stuff_count());
        assert_eq!(
            bf.stuff_count() as usize,
            bf.num_stuff_bits(StuffKind::Normal) % 8
        );
    }
}

#[test]
fn update_frame_reproduces_builder_output_on_random_frames() {
    let mut rng = seeded_rng(0x5EED_0006);

    for _ in 0..32 {
        let frame = random_frame(&mut rng);
        let bf = expand(frame);

        for recalc in [false, true] {
            let mut updated = bf.clone();
            updated.update_frame(recalc);

            assert_eq!(updated.len(), bf.len());
            for i in 0..bf.len() {
                assert_eq!(updated.bit(i).kind(), bf.bit(i).kind());
                assert_eq!(updated.bit(i).value(), bf.bit(i).value());
                assert_eq!(updated.bit(i).stuff_kind(), bf.bit(i).stuff_kind());
            }
        }
    }
}

#[test]
fn flipping_data_and_updating_keeps_frame_consistent() {
    let mut rng = seeded_rng(0x5EED_0007);
    // Pin the RTR flag so the data field cannot randomise away.
    let flags = FrameFlags::any()
        .with_kind(FrameKind::Can20)
        .with_rtr(RtrFlag::DataFrame);

    for _ in 0..32 {
        let mut frame = Frame::with_dlc(flags, 8).unwrap();
        frame.randomize(&mut rng);
        let mut bf = expand(frame);

        let index = bf.random_index_of(BitKind::Data, &mut rng);
        bf.bit_mut(index).flip();
        bf.update_frame(true);

        assert_stuffing_valid(&bf);
        assert_eq!(rescan_crc15(&bf), read_crc_bits(&bf));
    }
}

#[test]
fn shorten_then_lengthen_restores_quanta_counts() {
    let frame = Frame::with_data(
        FrameFlags::any().with_kind(FrameKind::Can20),
        0,
        0x111,
        &[],
    )
    .unwrap();
    let mut bf = expand(frame);

    for phase in [BitPhase::Prop, BitPhase::Ph1, BitPhase::Ph2] {
        let index = bf.index_of(0, BitKind::Eof);
        let before = bf.bit(index).len_tq(phase);
        let removed = bf.bit_mut(index).shorten_phase(phase, 2);
        assert_eq!(removed, 2);
        bf.bit_mut(index).lengthen_phase(phase, 2);
        assert_eq!(bf.bit(index).len_tq(phase), before);
    }
}
