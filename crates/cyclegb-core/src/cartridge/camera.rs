use crate::savestate::StateVisitor;

const EXPOSURE_BASE_CYCLES: i64 = 129_784;

/// Pocket Camera sensor controller timing.
///
/// Image capture itself is not modelled. Starting a capture holds trigger
/// bit 0 for the exposure time the real sensor needs, and the SRAM window
/// reads back zero until it completes.
#[derive(Debug, Clone, Default)]
pub struct Camera {
    trigger: u8,
    negative: bool,
    old_negative: bool,
    exposure: u16,
    old_exposure: u16,
    last_cycles: u64,
    cycles_left: i64,
    cancelled: bool,
    ds: bool,
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, cc: u64) {
        if self.cycles_left != 0 {
            self.cycles_left -= (cc.saturating_sub(self.last_cycles) >> self.ds as u32) as i64;
            self.last_cycles = cc;
            if self.cycles_left <= 0 {
                self.trigger &= 0xFE;
                self.cycles_left = 0;
                self.cancelled = false;
            }
        }
    }

    pub fn is_active(&mut self, cc: u64) -> bool {
        self.update(cc);
        self.trigger & 0x01 != 0
    }

    pub fn read(&mut self, addr: u16, cc: u64) -> u8 {
        if addr & 0x7F != 0 {
            return 0;
        }
        self.update(cc);
        self.trigger
    }

    pub fn write(&mut self, addr: u16, data: u8, cc: u64) {
        match addr & 0x7F {
            0x00 => {
                let active = self.is_active(cc);
                if (data & 0x01 != 0) != active {
                    if active {
                        self.cycles_left = 0;
                        self.old_negative = self.negative;
                        self.old_exposure = self.exposure;
                        self.cancelled = true;
                    } else {
                        let (negative, exposure) = if self.cancelled {
                            (self.old_negative, self.old_exposure)
                        } else {
                            (self.negative, self.exposure)
                        };
                        self.cycles_left = EXPOSURE_BASE_CYCLES
                            + if negative { 0 } else { 512 }
                            + ((exposure as i64) << 4);
                        self.last_cycles = cc;
                    }
                }
                self.trigger = data & 0x07;
            }
            0x01 => self.negative = data & 0x80 != 0,
            0x02 => self.exposure = (self.exposure & 0x00FF) | ((data as u16) << 8),
            0x03 => self.exposure = (self.exposure & 0xFF00) | data as u16,
            _ => {}
        }
    }

    pub fn speed_change(&mut self, cc: u64) {
        self.update(cc);
        self.ds = !self.ds;
    }

    pub fn set_double_speed(&mut self, ds: bool) {
        self.ds = ds;
    }

    pub fn rebase(&mut self, cc: u64, dec: u64) {
        self.update(cc);
        self.last_cycles = self.last_cycles.saturating_sub(dec);
    }

    pub fn reset_reference(&mut self, cc: u64) {
        self.last_cycles = cc;
    }

    pub fn sync_state(&mut self, v: &mut dyn StateVisitor) {
        v.enter("camera");
        v.u8("trigger", &mut self.trigger);
        v.bool("negative", &mut self.negative);
        v.bool("old_negative", &mut self.old_negative);
        v.u16("exposure", &mut self.exposure);
        v.u16("old_exposure", &mut self.old_exposure);
        v.u64("last_cycles", &mut self.last_cycles);
        v.i64("cycles_left", &mut self.cycles_left);
        v.bool("cancelled", &mut self.cancelled);
        v.bool("ds", &mut self.ds);
        v.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_time_depends_on_registers() {
        let mut cam = Camera::new();
        cam.write(0x03, 0x10, 0);
        cam.write(0x00, 0x01, 1000);
        let duration = 129_784 + 512 + (0x10 << 4);
        assert!(cam.is_active(1000 + duration - 1));
        assert!(!cam.is_active(1000 + duration));
        assert_eq!(cam.read(0x00, 1000 + duration), 0x00);
    }

    #[test]
    fn stopping_early_cancels_and_reuses_old_settings() {
        let mut cam = Camera::new();
        cam.write(0x01, 0x80, 0);
        cam.write(0x00, 0x01, 0);
        cam.write(0x00, 0x00, 100);
        assert!(!cam.is_active(100));
        cam.write(0x01, 0x00, 100);
        cam.write(0x00, 0x01, 200);
        assert!(cam.is_active(200 + 129_784 - 1));
        assert!(!cam.is_active(200 + 129_784));
    }

    #[test]
    fn other_registers_read_zero() {
        let mut cam = Camera::new();
        cam.write(0x00, 0x06, 0);
        assert_eq!(cam.read(0x00, 0), 0x06);
        assert_eq!(cam.read(0x05, 0), 0x00);
    }
}
