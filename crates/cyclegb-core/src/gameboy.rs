//! The machine as a frontend sees it: one CPU, one bus, one cartridge.

use std::path::Path;

use log::{info, warn};

use crate::{
    bess,
    cartridge::{CartInfo, Cartridge},
    config::{CoreConfig, ModelSelect, TimeMode},
    cpu::Cpu,
    error::{ImportError, LoadError, StateError},
    hardware::{Model, post_boot_cycle},
    mmu::Mmu,
    savestate::{StateCounter, StateReader, StateVisitor, StateWriter},
    serial::LinkPort,
    sinks::{AudioSink, HostClock, InputSource, VideoSink},
};

const DMG_BOOT_ROM_LEN: usize = 0x100;
const CGB_BOOT_ROM_LEN: usize = 0x900;

pub struct GameBoy {
    pub cpu: Cpu,
    pub mmu: Mmu,
    model: Model,
    config: CoreConfig,
}

impl GameBoy {
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    pub fn with_config(config: CoreConfig) -> Self {
        let model = match config.model {
            ModelSelect::Cgb => Model::Cgb,
            ModelSelect::Auto | ModelSelect::Dmg => Model::Dmg,
        };
        let mut mmu = Mmu::new(model);
        mmu.set_cart_bus_pull_up_time(config.cart_bus_pull_up_time);
        Self {
            cpu: Cpu::new(model),
            mmu,
            model,
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn is_cgb(&self) -> bool {
        self.model.is_cgb()
    }

    /// Load a ROM image and power the machine on. On error the current
    /// machine is left running as it was.
    pub fn load_rom(&mut self, data: Vec<u8>) -> Result<(), LoadError> {
        let cart = Cartridge::load(data, self.config.multicart_compat)?;
        self.install(cart);
        Ok(())
    }

    /// Like [`GameBoy::load_rom`], with battery and clock sidecars kept next
    /// to the file (or in the configured save directory).
    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LoadError> {
        let cart = Cartridge::from_file(path, self.config.multicart_compat)?;
        self.install(cart);
        Ok(())
    }

    /// Power-cycle with the same cartridge. Battery RAM and the clock
    /// survive; Game Genie patches do not.
    pub fn reset(&mut self) -> Result<(), LoadError> {
        let Some(cart) = self.mmu.cart.as_mut() else {
            return Ok(());
        };
        let saved = cart.save_data_bytes(self.cpu.cc);
        let fresh = cart.power_cycle(self.config.multicart_compat)?;
        self.install_with(fresh, Some(&saved));
        Ok(())
    }

    fn resolve_model(&self, info: &CartInfo) -> Model {
        match self.config.model {
            ModelSelect::Auto if info.cgb => Model::Cgb,
            ModelSelect::Auto | ModelSelect::Dmg => Model::Dmg,
            ModelSelect::Cgb => Model::Cgb,
        }
    }

    fn boot_image(&self, model: Model) -> Option<Vec<u8>> {
        let (path, len) = match model {
            Model::Dmg => (self.config.dmg_bootrom_path.as_ref()?, DMG_BOOT_ROM_LEN),
            Model::Cgb => (self.config.cgb_bootrom_path.as_ref()?, CGB_BOOT_ROM_LEN),
        };
        match std::fs::read(path) {
            Ok(data) if data.len() >= len => Some(data),
            Ok(data) => {
                warn!(
                    "Boot ROM {} is {:#x} bytes, expected {len:#x}; skipping it",
                    path.display(),
                    data.len()
                );
                None
            }
            Err(e) => {
                warn!("Failed to read boot ROM {}: {e}; skipping it", path.display());
                None
            }
        }
    }

    fn install(&mut self, cart: Cartridge) {
        self.install_with(cart, None);
    }

    fn install_with(&mut self, mut cart: Cartridge, saved: Option<&[u8]>) {
        let model = self.resolve_model(cart.info());
        let dmg_cart = !cart.info().cgb;
        let mut mmu = Mmu::new(model);
        let cpu = match self.boot_image(model) {
            Some(image) => {
                info!("Running {model:?} boot ROM");
                mmu.load_boot_rom(image);
                Cpu::power_on()
            }
            None => {
                let mut cpu = Cpu::new(model);
                cpu.cc = post_boot_cycle(model);
                mmu.apply_boot_state(model, cpu.cc);
                if model.is_cgb() && dmg_cart {
                    mmu.set_dmg_compat();
                }
                cpu
            }
        };
        let cc = cpu.cc;

        cart.set_save_dir(self.config.save_dir.clone());
        cart.set_rtc_divisor_offset(self.config.rtc.divisor_offset);
        cart.set_time_mode(self.config.rtc.mode, cc);
        match saved {
            Some(bytes) => cart.load_save_data_bytes(bytes, cc),
            None => {
                if let Err(e) = cart.load_save_data(cc) {
                    warn!("Failed to load save data: {e}");
                }
            }
        }

        mmu.set_cart_bus_pull_up_time(self.config.cart_bus_pull_up_time);
        mmu.load_cart(cart);
        carry_host_links(&mut self.mmu, &mut mmu);

        self.cpu = cpu;
        self.mmu = mmu;
        self.model = model;
    }

    /// Run for at least `cycles` base-clock cycles. Returns how many were
    /// actually spent, which overshoots by at most one instruction.
    pub fn run_for(&mut self, cycles: u64) -> u64 {
        self.cpu.run_for(&mut self.mmu, cycles)
    }

    // ---- host collaborators ----

    pub fn set_video_sink(&mut self, sink: Option<Box<dyn VideoSink>>) {
        self.mmu.video_sink = sink;
    }

    pub fn set_audio_sink(&mut self, sink: Option<Box<dyn AudioSink>>) {
        self.mmu.audio_sink = sink;
    }

    pub fn set_input_source(&mut self, source: Option<Box<dyn InputSource>>) {
        self.mmu.joypad.set_source(source);
    }

    pub fn connect_link(&mut self, port: Box<dyn LinkPort + Send>) {
        self.mmu.serial.connect(port);
    }

    /// Replace the wall clock used by cartridge clocks in wall mode.
    pub fn set_clock(&mut self, clock: Box<dyn HostClock>) {
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.set_clock(clock);
        }
    }

    // ---- cheats ----

    pub fn set_game_genie(&mut self, codes: &str) {
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.set_game_genie(codes);
        }
    }

    pub fn set_game_shark(&mut self, codes: &str) {
        self.mmu.set_game_shark(codes);
    }

    // ---- cartridge clock ----

    pub fn set_time_mode(&mut self, mode: TimeMode) {
        self.config.rtc.mode = mode;
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.set_time_mode(mode, self.cpu.cc);
        }
    }

    pub fn set_rtc_divisor_offset(&mut self, offset: i32) {
        self.config.rtc.divisor_offset = offset;
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.set_rtc_divisor_offset(offset);
        }
    }

    pub fn set_cart_bus_pull_up_time(&mut self, cycles: u64) {
        self.config.cart_bus_pull_up_time = cycles;
        self.mmu.set_cart_bus_pull_up_time(cycles);
    }

    /// Clock time in divider units, or 0 without a cartridge.
    pub fn time_now(&mut self) -> u64 {
        let cc = self.cpu.cc;
        self.mmu.cart.as_mut().map_or(0, |c| c.time_now(cc))
    }

    pub fn set_time(&mut self, dividers: u64) {
        let cc = self.cpu.cc;
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.set_time(dividers, cc);
        }
    }

    // ---- battery ----

    pub fn save_save_data(&mut self) -> std::io::Result<()> {
        let cc = self.cpu.cc;
        match self.mmu.cart.as_mut() {
            Some(cart) => cart.save_save_data(cc),
            None => Ok(()),
        }
    }

    pub fn load_save_data(&mut self) -> std::io::Result<()> {
        let cc = self.cpu.cc;
        match self.mmu.cart.as_mut() {
            Some(cart) => cart.load_save_data(cc),
            None => Ok(()),
        }
    }

    pub fn save_data_bytes(&mut self) -> Vec<u8> {
        let cc = self.cpu.cc;
        self.mmu
            .cart
            .as_mut()
            .map_or_else(Vec::new, |c| c.save_data_bytes(cc))
    }

    pub fn load_save_data_bytes(&mut self, data: &[u8]) {
        let cc = self.cpu.cc;
        if let Some(cart) = self.mmu.cart.as_mut() {
            cart.load_save_data_bytes(data, cc);
        }
    }

    // ---- state ----

    fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        self.cpu.sync_state(v);
        self.mmu.sync_state(v);
    }

    pub fn save_state(&mut self) -> Vec<u8> {
        self.cpu.cc = self.mmu.rebase(self.cpu.cc);
        let mut w = StateWriter::new();
        self.sync_state(&mut w);
        w.into_bytes()
    }

    /// Restore a native image. The image is checked in full before any
    /// field is touched.
    pub fn load_state(&mut self, data: &[u8]) -> Result<(), StateError> {
        if self.mmu.cart.is_none() {
            return Err(StateError::NotLoaded);
        }
        let mut check = StateReader::new(data, false)?;
        self.sync_state(&mut check);
        check.finish()?;

        let mut reader = StateReader::new(data, true)?;
        self.sync_state(&mut reader);
        reader.finish()
    }

    pub fn state_size(&mut self) -> usize {
        let mut counter = StateCounter::new();
        self.sync_state(&mut counter);
        counter.size()
    }

    /// Import a BESS trailer written by another emulator.
    pub fn import_bess(&mut self, data: &[u8]) -> Result<(), ImportError> {
        let state = bess::parse(data, self.model)?;
        bess::apply(&state, &mut self.cpu, &mut self.mmu);
        Ok(())
    }

    // ---- inspection ----

    pub fn cart_info(&self) -> Option<&CartInfo> {
        self.mmu.cart.as_ref().map(|c| c.info())
    }

    pub fn vram(&self) -> &[u8] {
        self.mmu.vram()
    }

    pub fn wram(&self) -> &[u8] {
        self.mmu.wram()
    }

    pub fn oam(&self) -> &[u8] {
        self.mmu.oam()
    }

    pub fn rom(&self) -> &[u8] {
        self.mmu.rom()
    }

    pub fn sram(&self) -> &[u8] {
        self.mmu.sram()
    }
}

impl Default for GameBoy {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GameBoy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameBoy")
            .field("model", &self.model)
            .field("cpu", &self.cpu)
            .field("mmu", &self.mmu)
            .finish()
    }
}

/// Move every host-side hook from the outgoing bus onto its replacement.
fn carry_host_links(old: &mut Mmu, new: &mut Mmu) {
    new.video_sink = old.video_sink.take();
    new.audio_sink = old.audio_sink.take();
    new.joypad.set_source(old.joypad.take_source());
    new.serial.connect(old.serial.disconnect());
}
