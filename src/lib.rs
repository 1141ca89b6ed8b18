// canstim/src/lib.rs
//
// The main lib file for the canstim library.

//! Bit-level CAN / CAN FD stimulus generation for controller compliance
//! testing.
//!
//! Conformance testing a CAN controller means driving its RX pin with
//! cycle-accurate, deliberately corrupted bus traffic and checking its TX
//! pin bit-for-bit against the reaction the standard prescribes. This crate
//! is the frame model that makes those stimuli: it expands a logical frame
//! into the exact wire bit sequence (stuff bits, Gray-coded stuff count,
//! CRC-15/17/21), lets a test mutate it at bit, time-quantum or clock-cycle
//! granularity, and serialises the result into driver and monitor item
//! streams for an HDL test bench.
//!
//! # The model
//!
//! The model is a strict ownership tree mirroring how timing works on the
//! bus:
//!
//! * [`Frame`] is the logical frame: flags, identifier, DLC, payload.
//! * [`BitFrame`] is the frame expanded to [`Bit`]s, plus the mutation
//!   engine (error/overload splicing, arbitration loss, restuffing,
//!   input-delay compensation).
//! * [`Bit`] is one bus bit owning its [`TimeQuanta`], resolving per phase
//!   whether it runs at the nominal or the data bit rate.
//! * [`TimeQuanta`] is one quantum owning its [`Cycle`]s, one per clock
//!   cycle of the baud-rate prescaler.
//!
//! # From frame to streams
//!
//! ```
//! use canstim::{BitFrame, BitTiming, Frame, FrameFlags, FrameKind, TestSequence};
//! use std::time::Duration;
//!
//! let flags = FrameFlags::any().with_kind(FrameKind::Can20);
//! let frame = Frame::with_data(flags, 2, 0x1A5, &[0xDE, 0xAD]).unwrap();
//!
//! let nominal = BitTiming::new(4, 3, 3, 3, 2).unwrap();
//! let data = BitTiming::new(2, 1, 1, 1, 1).unwrap();
//!
//! // What the test drives into the DUT, and what the DUT must answer.
//! let mut driven = BitFrame::new(frame, nominal, data);
//! let monitored = BitFrame::new(frame, nominal, data);
//! driven.put_ack();
//!
//! let seq = TestSequence::with_frames(Duration::from_nanos(10), &driven, &monitored);
//! assert!(!seq.driver_items().is_empty());
//! ```
//!
//! # What this crate is not
//!
//! It does not implement a CAN controller, schedule real time or perform
//! any I/O. Time is integer clock cycles and time quanta; pushing streams
//! into a simulator and programming a concrete DUT happen behind the
//! [`PliBridge`] and [`DutAdapter`] traits, implemented elsewhere.
//!
//! # Crate Features
//!
//! ### Non-default
//!
//! * **utils** -
//!   Whether to build command-line utilities. This brings in additional
//!   dependencies like [anyhow](https://docs.rs/anyhow/latest/anyhow/) and
//!   [clap](https://docs.rs/clap/latest/clap/)
//!

// clippy: do not warn about protocol names like "CanFd" inside the docs
#![allow(clippy::doc_markdown)]
// Some lints
#![deny(
    missing_docs,
    missing_copy_implementations,
    missing_debug_implementations,
    unstable_features,
    unused_import_braces,
    unused_qualifications,
    unsafe_code
)]

// Re-export the embedded_can crate so that applications can rely on
// finding the same version we use.
pub use embedded_can::{self, ExtendedId, Frame as EmbeddedFrame, Id, StandardId};

pub mod errors;
pub use errors::ConstructionError;

pub mod flags;
pub use flags::{BitValue, BrsFlag, EsiFlag, FrameFlags, FrameKind, IdentKind, RtrFlag};

pub mod timing;
pub use timing::{BitRate, BitTiming};

pub mod cycle;
pub use cycle::Cycle;

pub mod quanta;
pub use quanta::{BitPhase, TimeQuanta};

pub mod bit;
pub use bit::{Bit, BitKind, StuffKind};

pub mod frame;
pub use frame::{Frame, MAX_DATA_LEN};

pub mod bit_frame;
pub use bit_frame::{BitFrame, CyclePos};

pub mod sequence;
pub use sequence::{DriverItem, MonitorItem, TestSequence};

pub mod rng;
pub use rng::{seeded_rng, TestRng};

pub mod dut;
pub use dut::{CanVersion, DutAdapter, FaultState, SspKind};

pub mod pli;
pub use pli::{MonitorTrigger, PliBridge};
