//! Cycle-accurate Game Boy / Game Boy Color emulation core.
//!
//! This crate contains the platform-agnostic machine: CPU, memory bus,
//! event scheduler, cartridge controllers and their clock chips, plus
//! native and BESS state handling. Frontends drive it through the
//! [`gameboy`] facade and plug in the traits from [`sinks`].

/// Audio Processing Unit (APU) emulation.
pub mod apu;

/// Read-only import of BESS state trailers.
pub mod bess;

/// Cartridge mappers (MBC) and ROM/RAM/RTC handling.
pub mod cartridge;

/// Core settings persisted as TOML.
pub mod config;

/// SM83 CPU core.
pub mod cpu;

pub mod error;

/// High-level facade that wires the CPU and MMU into a single machine.
pub mod gameboy;

/// Hardware models and post-boot state.
pub mod hardware;

/// Joypad input register and edge-triggered interrupt behavior.
pub mod input;

/// Memory map and hardware plumbing.
pub mod mmu;

/// Pixel Processing Unit (PPU) emulation.
pub mod ppu;

/// Native save-state image.
pub mod savestate;

/// Deadline slots and interrupt bookkeeping.
pub mod scheduler;

/// Serial unit and link cable plumbing.
pub mod serial;

/// Host-side collaborators: video, audio, input and wall clock.
pub mod sinks;

/// Divider/timer unit.
pub mod timer;

pub use config::CoreConfig;
pub use error::{ImportError, LoadError, StateError};
pub use gameboy::GameBoy;
pub use hardware::Model;
