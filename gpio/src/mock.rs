//! In-memory GPIO lines.
//!
//! [MockChip] keeps every line in memory and records what happens to it in a [Journal], together
//! with the waits issued through [MockDelay]. [PanelModel] replays such a journal the way an
//! HD44780 would, which is enough to check what ends up on the display without hardware.
use crate::delay::Delay;
use crate::lcd::hd44780::{PinAssignment, Signal};
use crate::{GpioBias, GpioChip, GpioDirection, GpioError, GpioResult};
use log::trace;
use std::collections::BTreeSet;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusEvent {
    ConfigureInput { index: usize, bias: GpioBias },
    ConfigureOutput { index: usize, initial: bool },
    Write { index: usize, value: bool },
    Reset { index: usize },
    Export { index: usize },
    Unexport { index: usize },
    Delay(Duration),
}

/// Shared, ordered record of [BusEvent]s.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<BusEvent>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<BusEvent>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: BusEvent) {
        self.lock().push(event);
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.lock()
            .iter()
            .filter_map(|event| match event {
                BusEvent::Delay(duration) => Some(*duration),
                _ => None,
            })
            .collect()
    }

    pub fn total_delay(&self) -> Duration {
        self.delays().into_iter().sum()
    }
}

impl Debug for Journal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Journal({} events)", self.lock().len())
    }
}

#[derive(Debug, Default)]
struct MockState {
    levels: Vec<bool>,
    directions: Vec<Option<GpioDirection>>,
    exported: BTreeSet<usize>,
    fail_configure: BTreeSet<usize>,
    fail_export: BTreeSet<usize>,
    fail_write: BTreeSet<usize>,
}

/// A [GpioChip] that only exists in memory.
///
/// Clones share their lines and journal, so a test can keep one clone and hand the other to the
/// code under test.
#[derive(Clone)]
pub struct MockChip {
    state: Arc<Mutex<MockState>>,
    journal: Journal,
}

impl MockChip {
    pub fn new(count: usize) -> Self {
        Self::with_journal(count, Journal::new())
    }

    pub fn with_journal(count: usize, journal: Journal) -> Self {
        MockChip {
            state: Arc::new(Mutex::new(MockState {
                levels: vec![false; count],
                directions: vec![None; count],
                ..MockState::default()
            })),
            journal,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Makes configuring the line fail.
    pub fn fail_configure_on(self, index: usize) -> Self {
        self.state().fail_configure.insert(index);
        self
    }

    /// Makes exporting the line fail.
    pub fn fail_export_on(self, index: usize) -> Self {
        self.state().fail_export.insert(index);
        self
    }

    /// Makes writes to the line fail, after it has been configured.
    pub fn fail_writes_on(&self, index: usize) {
        self.state().fail_write.insert(index);
    }

    /// Drives an input line from the outside.
    pub fn set_input(&self, index: usize, level: bool) {
        if let Some(slot) = self.state().levels.get_mut(index) {
            *slot = level;
        }
    }

    pub fn level(&self, index: usize) -> bool {
        self.state().levels.get(index).copied().unwrap_or(false)
    }

    pub fn direction(&self, index: usize) -> Option<GpioDirection> {
        self.state().directions.get(index).copied().flatten()
    }

    pub fn is_exported(&self, index: usize) -> bool {
        self.state().exported.contains(&index)
    }

    fn check(state: &MockState, index: usize) -> GpioResult<()> {
        if index >= state.levels.len() {
            return Err(GpioError::InvalidPin(index));
        }
        Ok(())
    }
}

impl Debug for MockChip {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "MockChip({})", self.count())
    }
}

impl GpioChip for MockChip {
    fn count(&self) -> usize {
        self.state().levels.len()
    }

    fn configure_input(&self, index: usize, bias: GpioBias) -> GpioResult<()> {
        let mut state = self.state();
        Self::check(&state, index)?;
        if state.fail_configure.contains(&index) {
            return Err(GpioError::NotSupported);
        }
        state.directions[index] = Some(GpioDirection::Input);
        match bias {
            GpioBias::PullUp => state.levels[index] = true,
            GpioBias::PullDown => state.levels[index] = false,
            GpioBias::None => {}
        }
        self.journal.push(BusEvent::ConfigureInput { index, bias });
        Ok(())
    }

    fn configure_output(&self, index: usize, initial: bool) -> GpioResult<()> {
        let mut state = self.state();
        Self::check(&state, index)?;
        if state.fail_configure.contains(&index) {
            return Err(GpioError::NotSupported);
        }
        state.directions[index] = Some(GpioDirection::Output);
        state.levels[index] = initial;
        self.journal.push(BusEvent::ConfigureOutput { index, initial });
        Ok(())
    }

    fn write(&self, index: usize, value: bool) -> GpioResult<()> {
        let mut state = self.state();
        Self::check(&state, index)?;
        if state.directions[index] != Some(GpioDirection::Output) {
            return Err(GpioError::Direction(index));
        }
        if state.fail_write.contains(&index) {
            return Err(GpioError::Io(std::io::ErrorKind::BrokenPipe));
        }
        state.levels[index] = value;
        self.journal.push(BusEvent::Write { index, value });
        trace!("Mock pin {} <- {}", index, value);
        Ok(())
    }

    fn read(&self, index: usize) -> GpioResult<bool> {
        let state = self.state();
        Self::check(&state, index)?;
        Ok(state.levels[index])
    }

    fn reset(&self, index: usize) -> GpioResult<()> {
        let mut state = self.state();
        Self::check(&state, index)?;
        state.directions[index] = None;
        state.levels[index] = false;
        self.journal.push(BusEvent::Reset { index });
        Ok(())
    }

    fn export(&self, index: usize) -> GpioResult<()> {
        let mut state = self.state();
        if state.fail_export.contains(&index) {
            return Err(GpioError::Export(index));
        }
        state.exported.insert(index);
        self.journal.push(BusEvent::Export { index });
        Ok(())
    }

    fn unexport(&self, index: usize) -> GpioResult<()> {
        self.state().exported.remove(&index);
        self.journal.push(BusEvent::Unexport { index });
        Ok(())
    }
}

/// Records waits in a [Journal] instead of sleeping.
#[derive(Clone, Debug, Default)]
pub struct MockDelay {
    journal: Journal,
}

impl MockDelay {
    pub fn new(journal: Journal) -> Self {
        MockDelay { journal }
    }
}

impl Delay for MockDelay {
    fn delay(&mut self, duration: Duration) {
        self.journal.push(BusEvent::Delay(duration));
    }
}

/// A falling edge on EN, as seen by the panel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pulse {
    pub rs: bool,
    /// Data lines at the time of the edge, DBn in bit n. Unassigned lines read as 0.
    pub bus: u8,
    /// Total wait issued before the edge.
    pub at: Duration,
}

/// Decodes the enable pulses out of a journal.
pub fn pulses(events: &[BusEvent], assignment: &PinAssignment) -> Vec<Pulse> {
    let level_count = events
        .iter()
        .filter_map(|event| match event {
            BusEvent::ConfigureInput { index, .. }
            | BusEvent::ConfigureOutput { index, .. }
            | BusEvent::Write { index, .. }
            | BusEvent::Reset { index }
            | BusEvent::Export { index }
            | BusEvent::Unexport { index } => Some(index + 1),
            BusEvent::Delay(_) => None,
        })
        .max()
        .unwrap_or(0);
    let mut levels = vec![false; level_count];
    let mut elapsed = Duration::ZERO;
    let mut found = Vec::new();

    let en = assignment.get(Signal::En);
    for event in events {
        match *event {
            BusEvent::Delay(duration) => elapsed += duration,
            BusEvent::ConfigureOutput { index, initial } => levels[index] = initial,
            BusEvent::Reset { index } => levels[index] = false,
            BusEvent::Write { index, value } => {
                let falling = Some(index) == en && levels[index] && !value;
                levels[index] = value;
                if falling {
                    let level = |signal| {
                        assignment
                            .get(signal)
                            .and_then(|i| levels.get(i).copied())
                            .unwrap_or(false)
                    };
                    let bus = Signal::DATA
                        .iter()
                        .enumerate()
                        .filter(|(_, signal)| level(**signal))
                        .fold(0u8, |bus, (bit, _)| bus | (1 << bit));
                    found.push(Pulse {
                        rs: level(Signal::Rs),
                        bus,
                        at: elapsed,
                    });
                }
            }
            _ => {}
        }
    }
    found
}

/// Behavioral model of an HD44780 controller with a 2x16 panel.
///
/// Starts in 8-bit mode like the real controller after power-on, follows function-set commands
/// and keeps the display data RAM.
pub struct PanelModel {
    eight_bit: bool,
    high_nibble: Option<u8>,
    address: u8,
    ddram: [u8; 0x80],
    commands: Vec<u8>,
}

impl PanelModel {
    pub const COLUMNS: usize = 16;

    pub fn new() -> Self {
        PanelModel {
            eight_bit: true,
            high_nibble: None,
            address: 0,
            ddram: [b' '; 0x80],
            commands: Vec::new(),
        }
    }

    /// Builds a model that has seen every pulse of the journal.
    pub fn replay(events: &[BusEvent], assignment: &PinAssignment) -> Self {
        let mut panel = Self::new();
        for pulse in pulses(events, assignment) {
            panel.feed(pulse);
        }
        panel
    }

    pub fn feed(&mut self, pulse: Pulse) {
        if self.eight_bit {
            self.execute(pulse.rs, pulse.bus);
            return;
        }
        let nibble = pulse.bus >> 4;
        match self.high_nibble.take() {
            None => self.high_nibble = Some(nibble),
            Some(high) => self.execute(pulse.rs, high << 4 | nibble),
        }
    }

    fn execute(&mut self, rs: bool, byte: u8) {
        if rs {
            self.ddram[self.address as usize] = byte;
            self.address = (self.address + 1) & 0x7F;
            return;
        }

        self.commands.push(byte);
        if byte & 0x80 != 0 {
            self.address = byte & 0x7F;
        } else if byte & 0xE0 == 0x20 {
            self.eight_bit = byte & 0x10 != 0;
            self.high_nibble = None;
        } else if byte & 0xFE == 0x02 {
            self.address = 0;
        } else if byte == 0x01 {
            self.ddram = [b' '; 0x80];
            self.address = 0;
        }
    }

    pub fn is_eight_bit(&self) -> bool {
        self.eight_bit
    }

    /// Every command byte received, in order.
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    /// The last display on/off control command.
    pub fn display_control(&self) -> Option<u8> {
        self.commands
            .iter()
            .rev()
            .copied()
            .find(|command| command & 0xF8 == 0x08)
    }

    /// Visible text of a row (0 or 1), trailing blanks trimmed.
    pub fn row(&self, row: usize) -> String {
        let start = if row == 0 { 0x00 } else { 0x40 };
        let text: String = self.ddram[start..start + Self::COLUMNS]
            .iter()
            .map(|&byte| byte as char)
            .collect();
        text.trim_end().to_string()
    }
}

impl Default for PanelModel {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for PanelModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PanelModel({:?} / {:?})", self.row(0), self.row(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_lines_and_journal() {
        let chip = MockChip::new(4);
        let other = chip.clone();

        other.configure_output(1, true).unwrap();
        other.write(1, false).unwrap();

        assert!(!chip.level(1));
        assert_eq!(chip.direction(1), Some(GpioDirection::Output));
        assert_eq!(chip.journal().events().len(), 2);
    }

    #[test]
    fn writes_need_an_output_line() {
        let chip = MockChip::new(4);
        assert_eq!(chip.write(2, true), Err(GpioError::Direction(2)));
        chip.configure_input(2, GpioBias::PullUp).unwrap();
        assert!(chip.read(2).unwrap());
        assert_eq!(chip.write(2, true), Err(GpioError::Direction(2)));
        assert_eq!(chip.read(9), Err(GpioError::InvalidPin(9)));
    }

    #[test]
    fn delay_goes_to_the_journal() {
        let journal = Journal::new();
        let mut delay = MockDelay::new(journal.clone());
        delay.delay(Duration::from_millis(2));
        delay.delay(Duration::from_micros(50));
        assert_eq!(journal.total_delay(), Duration::from_micros(2050));
    }

    #[test]
    fn pulses_decode_on_falling_enable() {
        let assignment = PinAssignment::four_bit(0, 1, [2, 3, 4, 5]);
        let chip = MockChip::new(6);
        for index in 0..6 {
            chip.configure_output(index, false).unwrap();
        }

        // RS high, DB4 and DB7 high, then strobe EN
        chip.write(0, true).unwrap();
        chip.write(2, true).unwrap();
        chip.write(5, true).unwrap();
        chip.write(1, true).unwrap();
        chip.write(1, false).unwrap();

        let pulses = pulses(&chip.journal().events(), &assignment);
        assert_eq!(pulses.len(), 1);
        assert!(pulses[0].rs);
        assert_eq!(pulses[0].bus, 0x90);
    }

    #[test]
    fn panel_switches_to_four_bit_and_writes_text() {
        let mut panel = PanelModel::new();
        let command = |bus| Pulse { rs: false, bus, at: Duration::ZERO };
        let data = |bus| Pulse { rs: true, bus, at: Duration::ZERO };

        panel.feed(command(0x30));
        panel.feed(command(0x20));
        assert!(!panel.is_eight_bit());

        // 0xC0 (second row), then 'H' = 0x48, 'i' = 0x69
        for pulse in [command(0xC0), command(0x00), data(0x40), data(0x80), data(0x60), data(0x90)] {
            panel.feed(pulse);
        }

        assert_eq!(panel.row(0), "");
        assert_eq!(panel.row(1), "Hi");
        assert_eq!(panel.commands(), &[0x30, 0x20, 0xC0]);
    }
}
