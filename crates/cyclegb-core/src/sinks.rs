//! Host-side collaborators the core calls into.
//!
//! All of them are invoked synchronously from inside `run_for` and must not
//! call back into the machine.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Receives one composed frame per video frame, 0x00RRGGBB per pixel.
pub trait VideoSink {
    fn frame(&mut self, pixels: &[u32], stride: usize);
}

/// Receives stereo samples at one sample per two base clock cycles.
pub trait AudioSink {
    fn samples(&mut self, samples: &[[i16; 2]]);
}

/// Joypad state, sampled whenever the game reads P1.
pub trait InputSource {
    fn poll(&mut self) -> Buttons;
}

/// Pressed buttons. A set bit means pressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Buttons(pub u8);

impl Buttons {
    pub const A: u8 = 0x01;
    pub const B: u8 = 0x02;
    pub const SELECT: u8 = 0x04;
    pub const START: u8 = 0x08;
    pub const RIGHT: u8 = 0x10;
    pub const LEFT: u8 = 0x20;
    pub const UP: u8 = 0x40;
    pub const DOWN: u8 = 0x80;

    pub fn none() -> Self {
        Self(0)
    }

    pub fn pressed(self, mask: u8) -> bool {
        self.0 & mask != 0
    }
}

/// Wall-clock timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct HostTime {
    pub secs: u64,
    pub usecs: u32,
}

impl HostTime {
    pub fn new(secs: u64, usecs: u32) -> Self {
        Self { secs, usecs }
    }

    pub fn as_micros(self) -> u128 {
        self.secs as u128 * 1_000_000 + self.usecs as u128
    }

    pub fn from_micros(us: u128) -> Self {
        Self {
            secs: (us / 1_000_000) as u64,
            usecs: (us % 1_000_000) as u32,
        }
    }
}

pub trait HostClock {
    fn now(&self) -> HostTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl HostClock for SystemClock {
    fn now(&self) -> HostTime {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => HostTime::new(d.as_secs(), d.subsec_micros()),
            Err(_) => HostTime::default(),
        }
    }
}

/// Manually driven clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct FixedClock {
    time: Rc<Cell<HostTime>>,
}

impl FixedClock {
    pub fn new(time: HostTime) -> Self {
        Self {
            time: Rc::new(Cell::new(time)),
        }
    }

    pub fn set(&self, time: HostTime) {
        self.time.set(time);
    }

    pub fn advance_secs(&self, secs: u64) {
        let t = self.time.get();
        self.time.set(HostTime::new(t.secs + secs, t.usecs));
    }
}

impl HostClock for FixedClock {
    fn now(&self) -> HostTime {
        self.time.get()
    }
}

/// Video sink that keeps the most recent frame and a frame count.
#[derive(Debug, Clone)]
pub struct FrameCapture {
    pub frames: u64,
    pub last: Vec<u32>,
}

impl FrameCapture {
    pub fn new() -> Self {
        Self {
            frames: 0,
            last: Vec::new(),
        }
    }
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSink for FrameCapture {
    fn frame(&mut self, pixels: &[u32], _stride: usize) {
        self.frames += 1;
        self.last.clear();
        self.last.extend_from_slice(pixels);
    }
}

impl<T: VideoSink + ?Sized> VideoSink for Rc<std::cell::RefCell<T>> {
    fn frame(&mut self, pixels: &[u32], stride: usize) {
        self.borrow_mut().frame(pixels, stride);
    }
}

impl<T: AudioSink + ?Sized> AudioSink for Rc<std::cell::RefCell<T>> {
    fn samples(&mut self, samples: &[[i16; 2]]) {
        self.borrow_mut().samples(samples);
    }
}

impl<T: InputSource + ?Sized> InputSource for Rc<std::cell::RefCell<T>> {
    fn poll(&mut self) -> Buttons {
        self.borrow_mut().poll()
    }
}

/// Input source returning a fixed button set, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct HeldButtons {
    state: Rc<Cell<u8>>,
}

impl HeldButtons {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, buttons: Buttons) {
        self.state.set(buttons.0);
    }
}

impl InputSource for HeldButtons {
    fn poll(&mut self) -> Buttons {
        Buttons(self.state.get())
    }
}
