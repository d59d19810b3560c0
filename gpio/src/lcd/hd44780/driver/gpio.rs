use crate::delay::Delay;
use crate::lcd::hd44780::driver::{
    timing, CursorDirection, DisplayFlags, HD44780Driver, ProtocolState, RegisterSelect,
};
use crate::lcd::hd44780::{negotiate, LcdError, LcdResult, PinAssignment, Signal, TransferMode};
use crate::pins::{PinHandle, PinManager};
use log::{debug, error, info, trace};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// The lines owned by the engine, in acquisition order.
#[derive(Debug)]
struct BusLines {
    handles: Vec<PinHandle>,
    rw: Option<usize>,
    en: usize,
    data: Range<usize>,
}

impl BusLines {
    const RS: usize = 0;

    fn new(handles: Vec<PinHandle>, with_rw: bool) -> Self {
        let rw = with_rw.then_some(1);
        let en = if with_rw { 2 } else { 1 };
        BusLines {
            data: en + 1..handles.len(),
            handles,
            rw,
            en,
        }
    }
}

/// HD44780 protocol engine on a parallel bus made of GPIO lines.
///
/// Owns its lines exclusively from negotiation until [HD44780Driver::shutdown], a fault or drop.
/// Initialization is an explicit state machine, see [GpioHD44780Driver::step].
#[derive(Debug)]
pub struct GpioHD44780Driver {
    pins: Arc<PinManager>,
    assignment: PinAssignment,
    delay: Box<dyn Delay>,
    state: ProtocolState,
    mode: Option<TransferMode>,
    bus: Option<BusLines>,
    stepping: bool,
    flags: DisplayFlags,
}

impl GpioHD44780Driver {
    pub fn new(pins: Arc<PinManager>, assignment: PinAssignment, delay: Box<dyn Delay>) -> Self {
        GpioHD44780Driver {
            pins,
            assignment,
            delay,
            state: ProtocolState::Uninitialized,
            mode: None,
            bus: None,
            stepping: false,
            flags: DisplayFlags::DISPLAY_ON,
        }
    }

    /// Flags sent at the end of initialization. [DisplayFlags::DISPLAY_ON] by default.
    pub fn with_flags(mut self, flags: DisplayFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Performs one transition of the initialization sequence and returns the new state.
    ///
    /// Any failure moves the engine to [ProtocolState::Faulted] and releases its lines. A faulted
    /// engine stays there, [HD44780Driver::init] starts over.
    pub fn step(&mut self) -> LcdResult<ProtocolState> {
        let from = self.state;
        self.stepping = true;
        let result = self.transition(from);
        self.stepping = false;

        match result {
            Ok(to) => {
                debug!("LCD {} -> {}", from, to);
                self.state = to;
                Ok(to)
            }
            Err(LcdError::Faulted) => Err(LcdError::Faulted),
            Err(err) => {
                error!("LCD initialization failed in {}: {}", from, err);
                self.fault();
                Err(err)
            }
        }
    }

    fn transition(&mut self, from: ProtocolState) -> LcdResult<ProtocolState> {
        use ProtocolState::*;

        match from {
            Uninitialized => {
                let mode = negotiate(&self.assignment)?;
                let requests = self.assignment.requests(mode);
                let handles = self.pins.acquire_group(&requests)?;
                self.bus = Some(BusLines::new(handles, self.assignment.is_assigned(Signal::Rw)));
                self.mode = Some(mode);
                info!("LCD on {} in {:?} mode", self.assignment, mode);
                Ok(NegotiatingMode)
            }
            NegotiatingMode => {
                self.wait(timing::POWER_ON);
                for wait in timing::RESET {
                    self.send_nibble(0b0011, RegisterSelect::Command)?;
                    self.wait(wait);
                }
                Ok(Resetting)
            }
            Resetting => {
                let eight_bit = self.mode == Some(TransferMode::EightBit);
                if !eight_bit {
                    // Still in 8-bit mode, a single strobe switches the width
                    self.send_nibble(0b0010, RegisterSelect::Command)?;
                    self.wait(timing::BYTE_SETTLE);
                }
                // Two lines, 5x8 font
                self.function_set(eight_bit, true, false)?;
                self.wait(timing::FUNCTION_LOCK);
                Ok(FunctionLocking)
            }
            FunctionLocking => {
                self.send_command(0b00001000 | DisplayFlags::DISPLAY_OFF.bits())?;
                self.wait(timing::DISPLAY_OFF);
                Ok(DisplayConfiguring)
            }
            DisplayConfiguring => {
                self.clear()?;
                Ok(Cleared)
            }
            Cleared => {
                self.set_entry_mode(CursorDirection::Right, false)?;
                self.set_flags(self.flags)?;
                Ok(Ready)
            }
            Ready => Ok(Ready),
            Faulted => Err(LcdError::Faulted),
        }
    }

    fn fault(&mut self) {
        self.release();
        self.state = ProtocolState::Faulted;
    }

    fn release(&mut self) {
        if let Some(mut bus) = self.bus.take() {
            self.pins.release_group(&mut bus.handles);
            debug!("LCD released {} line(s)", bus.handles.len());
        }
        self.mode = None;
    }

    fn bus(&self) -> LcdResult<&BusLines> {
        let open = self.state == ProtocolState::Ready || self.stepping;
        match &self.bus {
            Some(bus) if open => Ok(bus),
            _ => Err(LcdError::NotReady(self.state)),
        }
    }

    /// Sets RS and the data lines, then strobes EN.
    ///
    /// Bit n of `value` goes to the n-th data line of the bus, i.e. DBn in 8-bit mode and DB(n+4)
    /// in 4-bit mode.
    fn strobe(&mut self, value: u8, rs: RegisterSelect) -> LcdResult<()> {
        let bus = self.bus()?;
        let pins = &self.pins;
        trace!("LCD strobe {:08b}, {:?}", value, rs);

        pins.set(&bus.handles[BusLines::RS], rs.level())?;
        if let Some(rw) = bus.rw {
            pins.set(&bus.handles[rw], false)?;
        }
        for (bit, handle) in bus.handles[bus.data.clone()].iter().enumerate() {
            pins.set(handle, value >> bit & 1 != 0)?;
        }

        let en = bus.en;
        self.delay.delay(timing::ENABLE_SETUP);
        self.pins.set(&self.bus()?.handles[en], true)?;
        self.delay.delay(timing::ENABLE_PULSE);
        self.pins.set(&self.bus()?.handles[en], false)?;
        Ok(())
    }

    fn current_mode(&self) -> LcdResult<TransferMode> {
        self.mode.ok_or(LcdError::NotReady(self.state))
    }
}

impl HD44780Driver for GpioHD44780Driver {
    fn init(&mut self) -> LcdResult<()> {
        if self.state == ProtocolState::Faulted {
            info!("Reinitializing faulted LCD");
            self.state = ProtocolState::Uninitialized;
        }
        while self.state != ProtocolState::Ready {
            self.step()?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.bus.is_some() {
            info!("Shutting LCD down");
        }
        self.release();
        self.state = ProtocolState::Uninitialized;
    }

    fn state(&self) -> ProtocolState {
        self.state
    }

    fn mode(&self) -> Option<TransferMode> {
        self.mode
    }

    fn send_nibble(&mut self, nibble: u8, rs: RegisterSelect) -> LcdResult<()> {
        let nibble = nibble & 0x0F;
        match self.current_mode()? {
            TransferMode::FourBit => self.strobe(nibble, rs),
            TransferMode::EightBit => self.strobe(nibble << 4, rs),
        }
    }

    fn send_byte(&mut self, byte: u8, rs: RegisterSelect) -> LcdResult<()> {
        match self.current_mode()? {
            TransferMode::FourBit => {
                self.send_nibble(byte >> 4, rs)?;
                self.wait(timing::INTER_NIBBLE);
                self.send_nibble(byte & 0x0F, rs)?;
            }
            TransferMode::EightBit => self.strobe(byte, rs)?,
        }
        self.wait(timing::BYTE_SETTLE);
        Ok(())
    }

    fn wait(&mut self, duration: Duration) {
        self.delay.delay(duration);
    }
}

impl Drop for GpioHD44780Driver {
    fn drop(&mut self) {
        self.release();
    }
}
