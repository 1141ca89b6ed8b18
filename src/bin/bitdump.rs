// canstim/src/bin/bitdump.rs

//! Command-line tool to expand a CAN / CAN FD frame into its wire-level
//! bit sequence and, optionally, the driver/monitor streams a test bench
//! would receive. Fields not pinned on the command line are filled from a
//! deterministic seed.

use anyhow::{anyhow, Result};
use canstim::{
    seeded_rng, BitFrame, BitTiming, BrsFlag, EsiFlag, Frame, FrameFlags, FrameKind, IdentKind,
    RtrFlag, TestSequence,
};
use clap::{arg, value_parser, ArgAction, ArgMatches, Command};
use std::process;
use std::time::Duration;

// Make the app version the same as the package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn flag(opts: &ArgMatches, name: &str) -> bool {
    opts.get_one::<bool>(name).copied().unwrap_or(false)
}

fn parse_hex_u32(text: &str) -> Result<u32> {
    let digits = text.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| anyhow!("'{}' is not a hex number", text))
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>> {
    if text.len() % 2 != 0 {
        return Err(anyhow!("payload needs an even number of hex digits"));
    }
    (0..text.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&text[i..i + 2], 16)
                .map_err(|_| anyhow!("'{}' is not a hex byte string", text))
        })
        .collect()
}

fn build_frame(opts: &ArgMatches) -> Result<Frame> {
    let kind = if flag(opts, "fd") {
        FrameKind::CanFd
    } else {
        FrameKind::Can20
    };
    let ident_kind = if flag(opts, "extended") {
        IdentKind::Extended
    } else {
        IdentKind::Base
    };
    let rtr = if flag(opts, "rtr") {
        RtrFlag::RtrFrame
    } else {
        RtrFlag::DataFrame
    };
    let brs = if flag(opts, "brs") {
        BrsFlag::Shift
    } else {
        BrsFlag::DontShift
    };
    let esi = if flag(opts, "error-passive") {
        EsiFlag::ErrorPassive
    } else {
        EsiFlag::ErrorActive
    };
    let flags = FrameFlags::new(kind, ident_kind, rtr, brs, esi);

    // Start fully randomised from the seed, then pin what was given.
    let seed = *opts.get_one::<u64>("seed").unwrap();
    let mut rng = seeded_rng(seed);
    let mut frame = Frame::with_flags(flags);
    frame.randomize(&mut rng);

    if let Some(dlc) = opts.get_one::<u8>("dlc") {
        frame.set_dlc(*dlc)?;
    }
    if let Some(id) = opts.get_one::<String>("id") {
        frame.set_ident(parse_hex_u32(id)?)?;
    }
    if let Some(data) = opts.get_one::<String>("data") {
        let bytes = parse_hex_bytes(data)?;
        frame.set_data_len(bytes.len())?;
        frame.set_data(&bytes);
    }

    Ok(frame)
}

fn run(opts: &ArgMatches) -> Result<()> {
    let frame = build_frame(opts)?;

    let nominal = BitTiming::new(4, 3, 3, 3, 2)?;
    let data = BitTiming::new(2, 1, 1, 1, 1)?;
    let bit_frame = BitFrame::new(frame, nominal, data);

    println!("{}", frame);
    println!();
    println!("{}", bit_frame);

    let clock = Duration::from_nanos(*opts.get_one::<u64>("clock").unwrap());

    if flag(opts, "detailed") {
        println!();
        print!("{}", bit_frame.detailed_listing(clock));
    }

    if flag(opts, "streams") {
        let seq = TestSequence::with_frames(clock, &bit_frame, &bit_frame);
        let driven: Duration = seq.driver_items().iter().map(|i| i.duration).sum();
        let monitored: Duration = seq.monitor_items().iter().map(|i| i.duration).sum();

        println!();
        println!(
            "driver stream:  {} items, {} ns",
            seq.driver_items().len(),
            driven.as_nanos()
        );
        println!(
            "monitor stream: {} items, {} ns",
            seq.monitor_items().len(),
            monitored.as_nanos()
        );
    }

    Ok(())
}

fn main() {
    let opts = Command::new("bitdump")
        .version(VERSION)
        .about("Expand a CAN / CAN FD frame into its wire-level bit sequence")
        .arg(arg!(--fd "Build a CAN FD frame").action(ArgAction::SetTrue))
        .arg(arg!(--brs "Enable bit-rate shift (CAN FD only)").action(ArgAction::SetTrue))
        .arg(
            arg!(--"error-passive" "Mark the transmitter error passive (CAN FD only)")
                .action(ArgAction::SetTrue),
        )
        .arg(arg!(--extended "Use a 29-bit identifier").action(ArgAction::SetTrue))
        .arg(arg!(--rtr "Build a remote frame (classical only)").action(ArgAction::SetTrue))
        .arg(arg!(--id <ID> "Identifier as a hex number").required(false))
        .arg(
            arg!(--dlc <DLC> "Data length code (0-15)")
                .required(false)
                .value_parser(value_parser!(u8)),
        )
        .arg(arg!(--data <BYTES> "Payload as a hex byte string, e.g. DEADBEEF").required(false))
        .arg(
            arg!(--seed <SEED> "Seed for fields not given on the command line")
                .required(false)
                .value_parser(value_parser!(u64))
                .default_value("0"),
        )
        .arg(
            arg!(--clock <NS> "DUT clock period in nanoseconds")
                .required(false)
                .value_parser(value_parser!(u64))
                .default_value("10"),
        )
        .arg(arg!(--detailed "Print the per-bit duration listing").action(ArgAction::SetTrue))
        .arg(arg!(--streams "Print driver/monitor stream summaries").action(ArgAction::SetTrue))
        .get_matches();

    if let Err(err) = run(&opts) {
        eprintln!("{}", err);
        process::exit(1);
    }
}
