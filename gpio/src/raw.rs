//! Direct register access to the BCM283x GPIO block.
//!
//! The register block is memory-mapped from `/dev/gpiomem` (no root needed on Raspberry Pi OS)
//! or `/dev/mem`. There is no kernel bookkeeping involved, so lines driven this way are invisible
//! to user space unless a [SysfsExporter] is attached.
use crate::sysfs::SysfsExporter;
use crate::{GpioBias, GpioChip, GpioError, GpioResult};
use log::trace;
use memmap2::{MmapOptions, MmapRaw};
use std::fmt::{Debug, Formatter};
use std::fs::OpenOptions;
use std::thread::sleep;
use std::time::Duration;

pub struct RawGpioDriver {
    mmap: MmapRaw,
    exporter: Option<SysfsExporter>,
}

impl RawGpioDriver {
    // 0x7E200000 on the bus, 0x20200000 on the BCM2835, 0xFE200000 on the BCM2711
    const GPIO_BASE: u32 = 0x3F200000;

    const PIN_COUNT: usize = 58;

    // Word offsets into the register block
    const GPFSEL: usize = 0x00 / 4;
    const GPSET: usize = 0x1C / 4;
    const GPCLR: usize = 0x28 / 4;
    const GPLEV: usize = 0x34 / 4;
    const GPPUD: usize = 0x94 / 4;
    const GPPUDCLK: usize = 0x98 / 4;
    const GPIO_PUP_PDN_CNTRL: usize = 0xE4 / 4;

    // What the BCM2835 to BCM2837 return from the pull control registers they do not have
    const NO_PUP_PDN_CNTRL: u32 = 0x6770696f;
    const PULL_CLOCK_SETTLE: Duration = Duration::from_micros(5);

    const FUNCTION_INPUT: u32 = 0b000;
    const FUNCTION_OUTPUT: u32 = 0b001;

    fn create(path: &str) -> GpioResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;

        let mmap = MmapOptions::new()
            .offset(Self::GPIO_BASE as u64)
            .len(4096)
            .map_raw(&file)?;

        Ok(RawGpioDriver {
            mmap,
            exporter: None,
        })
    }

    pub fn new_gpiomem() -> GpioResult<Self> {
        Self::create("/dev/gpiomem")
    }

    pub fn new_mem() -> GpioResult<Self> {
        Self::create("/dev/mem")
    }

    /// Exports acquired lines through sysfs as well.
    pub fn with_exporter(mut self, exporter: SysfsExporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    fn check(&self, pin_index: usize) -> GpioResult<()> {
        if pin_index >= Self::PIN_COUNT {
            return Err(GpioError::InvalidPin(pin_index));
        }
        Ok(())
    }

    fn register(&self, word: usize) -> *mut u32 {
        let base = self.mmap.as_mut_ptr() as *mut u32;
        // SAFETY: every caller stays within the first 0x100 bytes of the 4 KiB mapping
        unsafe { base.add(word) }
    }

    fn read_register(&self, word: usize) -> u32 {
        // SAFETY: see `register`, the mapping lives as long as `self`
        unsafe { self.register(word).read_volatile() }
    }

    fn write_register(&self, word: usize, value: u32) {
        // SAFETY: see `register`
        unsafe { self.register(word).write_volatile(value) }
    }

    /// Reads the 3-bit function select field of the pin.
    pub fn raw_get_pin_function(&self, pin_index: usize) -> GpioResult<u32> {
        self.check(pin_index)?;

        let value = self.read_register(Self::GPFSEL + pin_index / 10);
        Ok((value >> ((pin_index % 10) * 3)) & 0b111)
    }

    /// Writes the 3-bit function select field of the pin, leaving the other pins of the register alone.
    pub fn raw_set_pin_function(&self, pin_index: usize, function: u32) -> GpioResult<()> {
        if function > 0b111 {
            return Err(GpioError::InvalidArgument);
        }
        self.check(pin_index)?;

        let word = Self::GPFSEL + pin_index / 10;
        let shift = (pin_index % 10) * 3;
        let mut value = self.read_register(word);
        value &= !(0b111 << shift);
        value |= function << shift;
        self.write_register(word, value);
        Ok(())
    }

    fn raw_set_pin_output(&self, pin_index: usize, high: bool) -> GpioResult<()> {
        self.check(pin_index)?;

        // GPSETn/GPCLRn are write-1-to-act, no read-modify-write needed
        let bank = if high { Self::GPSET } else { Self::GPCLR };
        self.write_register(bank + pin_index / 32, 1 << (pin_index % 32));
        Ok(())
    }

    fn raw_get_pin_level(&self, pin_index: usize) -> GpioResult<bool> {
        self.check(pin_index)?;

        let value = self.read_register(Self::GPLEV + pin_index / 32);
        Ok((value >> (pin_index % 32)) & 1 != 0)
    }

    /// Whether the chip has the BCM2711 pull control registers.
    fn has_pup_pdn_cntrl(&self) -> bool {
        self.read_register(Self::GPIO_PUP_PDN_CNTRL + 3) != Self::NO_PUP_PDN_CNTRL
    }

    /// Field value for `GPIO_PUP_PDN_CNTRL_REGn`.
    fn pup_pdn_bits(bias: GpioBias) -> u32 {
        match bias {
            GpioBias::None => 0b00,
            GpioBias::PullUp => 0b01,
            GpioBias::PullDown => 0b10,
        }
    }

    /// Control value for `GPPUD`, which encodes the pulls the other way round.
    fn gppud_bits(bias: GpioBias) -> u32 {
        match bias {
            GpioBias::None => 0b00,
            GpioBias::PullDown => 0b01,
            GpioBias::PullUp => 0b10,
        }
    }

    fn raw_set_bias(&self, pin_index: usize, bias: GpioBias) -> GpioResult<()> {
        self.check(pin_index)?;

        if self.has_pup_pdn_cntrl() {
            // GPIO_PUP_PDN_CNTRL_REGn register (yes that is a long name)
            let word = Self::GPIO_PUP_PDN_CNTRL + pin_index / 16;
            let shift = (pin_index % 16) * 2;
            let mut value = self.read_register(word);
            value &= !(0b11 << shift);
            value |= Self::pup_pdn_bits(bias) << shift;
            self.write_register(word, value);
        } else {
            // Older chips latch the control value into the pins clocked through GPPUDCLKn
            let clock = Self::GPPUDCLK + pin_index / 32;
            self.write_register(Self::GPPUD, Self::gppud_bits(bias));
            sleep(Self::PULL_CLOCK_SETTLE);
            self.write_register(clock, 1 << (pin_index % 32));
            sleep(Self::PULL_CLOCK_SETTLE);
            self.write_register(Self::GPPUD, 0);
            self.write_register(clock, 0);
        }
        trace!("Pin {} bias {:?}", pin_index, bias);
        Ok(())
    }
}

impl Debug for RawGpioDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawGpioDriver({:?})", self.mmap.as_ptr().addr())
    }
}

impl GpioChip for RawGpioDriver {
    fn count(&self) -> usize {
        Self::PIN_COUNT
    }

    fn configure_input(&self, index: usize, bias: GpioBias) -> GpioResult<()> {
        self.raw_set_pin_function(index, Self::FUNCTION_INPUT)?;
        self.raw_set_bias(index, bias)?;
        trace!("Pin {} configured as input, bias {:?}", index, bias);
        Ok(())
    }

    fn configure_output(&self, index: usize, initial: bool) -> GpioResult<()> {
        // Latch the level first so the line never glitches to a stale value
        self.raw_set_pin_output(index, initial)?;
        self.raw_set_bias(index, GpioBias::None)?;
        self.raw_set_pin_function(index, Self::FUNCTION_OUTPUT)?;
        trace!("Pin {} configured as output, initial {}", index, initial);
        Ok(())
    }

    fn write(&self, index: usize, value: bool) -> GpioResult<()> {
        self.raw_set_pin_output(index, value)
    }

    fn read(&self, index: usize) -> GpioResult<bool> {
        self.raw_get_pin_level(index)
    }

    fn reset(&self, index: usize) -> GpioResult<()> {
        self.raw_set_pin_function(index, Self::FUNCTION_INPUT)?;
        self.raw_set_bias(index, GpioBias::None)?;
        self.raw_set_pin_output(index, false)?;
        Ok(())
    }

    fn export(&self, index: usize) -> GpioResult<()> {
        match &self.exporter {
            Some(exporter) => exporter.export(index),
            None => Ok(()),
        }
    }

    fn unexport(&self, index: usize) -> GpioResult<()> {
        match &self.exporter {
            Some(exporter) => exporter.unexport(index),
            None => Ok(()),
        }
    }
}
