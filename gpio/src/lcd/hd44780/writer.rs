use crate::lcd::hd44780::driver::{DisplayFlags, HD44780Driver, ProtocolState};
use crate::lcd::hd44780::LcdResult;
use log::{debug, warn};

/// How much of a write did not fit on the panel.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Truncation {
    #[default]
    None,
    /// `dropped` characters, line breaks included, were cut off the end.
    Clipped { dropped: usize },
}

impl Truncation {
    pub fn is_clipped(&self) -> bool {
        matches!(self, Truncation::Clipped { .. })
    }
}

/// Cuts `text` down to what a `rows` by `cols` panel shows.
///
/// Follows the layout of [DisplayWriter::write]: a full row wraps straight away and a line break
/// moves to the next row, so a line break in the last row, or right after it fills up, is cut.
pub fn clip(text: &str, rows: usize, cols: usize) -> (&str, Truncation) {
    let mut row = 1;
    let mut column = 0;
    for (offset, ch) in text.char_indices() {
        let fits = if ch == '\n' { row < rows } else { row <= rows };
        if !fits {
            let dropped = text[offset..].chars().count();
            return (&text[..offset], Truncation::Clipped { dropped });
        }

        if ch == '\n' {
            row += 1;
            column = 0;
        } else {
            column += 1;
            if column == cols {
                row += 1;
                column = 0;
            }
        }
    }
    (text, Truncation::None)
}

/// Owns the text shown on the panel and lays it out row by row.
#[derive(Debug)]
pub struct DisplayWriter {
    driver: Box<dyn HD44780Driver + Send>,
    buffer: String,
}

impl DisplayWriter {
    pub const ROWS: usize = 2;
    pub const COLS: usize = 16;

    pub fn new(driver: Box<dyn HD44780Driver + Send>) -> Self {
        DisplayWriter {
            driver,
            buffer: String::new(),
        }
    }

    /// Initializes the panel if needed.
    pub fn init(&mut self) -> LcdResult<()> {
        self.driver.init()
    }

    pub fn shutdown(&mut self) {
        self.driver.shutdown();
    }

    pub fn state(&self) -> ProtocolState {
        self.driver.state()
    }

    /// Redraws the panel with `text` and keeps it as the buffer.
    ///
    /// Text that does not fit on the panel is dropped with a warning, that is not an error.
    /// Characters that are not ASCII are shown as `?`. If drawing fails the buffer keeps the
    /// previous text.
    pub fn write(&mut self, text: &str) -> LcdResult<Truncation> {
        let (text, truncation) = clip(text, Self::ROWS, Self::COLS);
        if let Truncation::Clipped { dropped } = truncation {
            warn!("LCD text too long, dropped {} character(s)", dropped);
        }

        self.render(text)?;
        self.buffer = text.to_string();
        Ok(truncation)
    }

    fn render(&mut self, text: &str) -> LcdResult<()> {
        debug!("LCD <- {:?}", text);
        self.driver.clear()?;
        self.driver.select_row(1)?;

        let mut row = 1;
        let mut column = 0;
        for ch in text.chars() {
            if ch != '\n' {
                self.driver.send_char(Self::to_panel(ch))?;
                column += 1;
            }
            if ch == '\n' || column == Self::COLS {
                row += 1;
                column = 0;
                if row > Self::ROWS {
                    break;
                }
                self.driver.select_row(row)?;
            }
        }
        Ok(())
    }

    fn to_panel(ch: char) -> u8 {
        if ch.is_ascii() {
            ch as u8
        } else {
            warn!("Character {:?} cannot be shown on the LCD", ch);
            b'?'
        }
    }

    /// The text last written, as stored after clipping.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn set_flags(&mut self, flags: DisplayFlags) -> LcdResult<()> {
        self.driver.set_flags(flags)
    }

    /// Direct access to the protocol engine.
    pub fn driver_mut(&mut self) -> &mut (dyn HD44780Driver + Send) {
        self.driver.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcd::hd44780::driver::RegisterSelect;
    use crate::lcd::hd44780::{LcdError, TransferMode};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Sent = Arc<Mutex<Vec<(RegisterSelect, u8)>>>;

    /// Records bytes instead of driving a bus.
    #[derive(Debug, Default)]
    struct Recorder {
        sent: Sent,
        fail: bool,
    }

    impl HD44780Driver for Recorder {
        fn init(&mut self) -> LcdResult<()> {
            Ok(())
        }

        fn shutdown(&mut self) {}

        fn state(&self) -> ProtocolState {
            ProtocolState::Ready
        }

        fn mode(&self) -> Option<TransferMode> {
            Some(TransferMode::FourBit)
        }

        fn send_nibble(&mut self, _nibble: u8, _rs: RegisterSelect) -> LcdResult<()> {
            unreachable!("bytes are recorded whole")
        }

        fn send_byte(&mut self, byte: u8, rs: RegisterSelect) -> LcdResult<()> {
            if self.fail {
                return Err(LcdError::NotReady(ProtocolState::Faulted));
            }
            self.sent.lock().unwrap().push((rs, byte));
            Ok(())
        }

        fn wait(&mut self, _duration: Duration) {}
    }

    fn writer() -> (Sent, DisplayWriter) {
        let recorder = Recorder::default();
        let sent = recorder.sent.clone();
        (sent, DisplayWriter::new(Box::new(recorder)))
    }

    /// Renders the recorded traffic as text, commands in brackets.
    fn transcript(sent: &Sent) -> String {
        sent.lock()
            .unwrap()
            .iter()
            .map(|(rs, byte)| match rs {
                RegisterSelect::Data => (*byte as char).to_string(),
                RegisterSelect::Command => format!("[{:02X}]", byte),
            })
            .collect()
    }

    #[test]
    fn clip_follows_the_layout() {
        assert_eq!(clip("ab\ncd", 2, 4), ("ab\ncd", Truncation::None));
        assert_eq!(clip("abcdefgh", 2, 4), ("abcdefgh", Truncation::None));
        assert_eq!(clip("abcdefghij", 2, 4), ("abcdefgh", Truncation::Clipped { dropped: 2 }));
        assert_eq!(clip("ab\n\ncd", 2, 4), ("ab\n", Truncation::Clipped { dropped: 3 }));
        assert_eq!(clip("abcd\nef", 2, 4), ("abcd", Truncation::Clipped { dropped: 3 }));
        assert_eq!(clip("ab\ncdefgh", 2, 4), ("ab\ncdef", Truncation::Clipped { dropped: 2 }));
        assert_eq!(clip("", 2, 4), ("", Truncation::None));
        assert_eq!(clip("żółwie", 1, 4), ("żółw", Truncation::Clipped { dropped: 2 }));
    }

    #[test]
    fn line_breaks_alone_are_bounded_by_the_rows() {
        let (sent, mut writer) = writer();

        let truncation = writer.write(&"\n".repeat(40)).unwrap();

        assert_eq!(truncation, Truncation::Clipped { dropped: 39 });
        assert_eq!(writer.buffer(), "\n");
        assert_eq!(transcript(&sent), "[01][80][C0]");
    }

    #[test]
    fn buffer_matches_what_the_second_row_shows() {
        let (sent, mut writer) = writer();
        let text = format!("Hello\n{}", "x".repeat(20));

        let truncation = writer.write(&text).unwrap();

        let shown = format!("Hello\n{}", "x".repeat(16));
        assert_eq!(truncation, Truncation::Clipped { dropped: 4 });
        assert_eq!(writer.buffer(), shown);
        assert_eq!(transcript(&sent), format!("[01][80]Hello[C0]{}", "x".repeat(16)));
    }

    #[test]
    fn newline_moves_to_the_second_row() {
        let (sent, mut writer) = writer();

        assert_eq!(writer.write("Hi\nyo").unwrap(), Truncation::None);

        assert_eq!(transcript(&sent), "[01][80]Hi[C0]yo");
        assert_eq!(writer.buffer(), "Hi\nyo");
    }

    #[test]
    fn full_row_wraps_on_its_own() {
        let (sent, mut writer) = writer();

        writer.write(&"A".repeat(20)).unwrap();

        assert_eq!(
            transcript(&sent),
            format!("[01][80]{}[C0]{}", "A".repeat(16), "A".repeat(4))
        );
    }

    #[test]
    fn line_break_after_a_full_row_takes_another_row() {
        let (sent, mut writer) = writer();

        let truncation = writer.write(&format!("{}\nB", "A".repeat(16))).unwrap();

        assert_eq!(transcript(&sent), format!("[01][80]{}[C0]", "A".repeat(16)));
        assert_eq!(truncation, Truncation::Clipped { dropped: 2 });
        assert_eq!(writer.buffer(), "A".repeat(16));
    }

    #[test]
    fn non_ascii_becomes_question_marks() {
        let (sent, mut writer) = writer();

        writer.write("20°C").unwrap();

        assert_eq!(transcript(&sent), "[01][80]20?C");
        assert_eq!(writer.buffer(), "20°C");
    }

    #[test]
    fn buffer_keeps_exactly_the_capacity() {
        let (_, mut writer) = writer();
        let long = "x".repeat(40);

        let truncation = writer.write(&long).unwrap();

        assert_eq!(truncation, Truncation::Clipped { dropped: 8 });
        assert_eq!(writer.buffer().len(), DisplayWriter::ROWS * DisplayWriter::COLS);
    }

    #[test]
    fn engine_errors_propagate() {
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let mut writer = DisplayWriter::new(Box::new(recorder));
        assert!(writer.write("hello").is_err());
        assert_eq!(writer.buffer(), "");
    }
}
