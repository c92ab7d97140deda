//! Three-terminal console multiplexer.
//!
//! Only one of [`NUM_TERMINALS`] virtual terminals is ever shown on the real
//! VGA text buffer at a time; the rest keep their screen contents in an
//! off-screen shadow grid that gets swapped in on [`switch_to`]. Each
//! terminal also owns a small line-discipline buffer fed by the keyboard
//! driver: printable characters echo to the screen and accumulate in the
//! buffer until Enter, at which point a blocked `term_read` wakes up.

use spin::Mutex;
use volatile::Volatile;
use x86_64::instructions::interrupts;

#[macro_use]
pub mod macros;

/// Number of virtual terminals (and process groups).
pub const NUM_TERMINALS: usize = 3;

/// VGA text mode column count.
pub const BUFFER_WIDTH: usize = 80;
/// VGA text mode row count.
pub const BUFFER_HEIGHT: usize = 25;

/// Capacity of each terminal's line-discipline buffer.
pub const LINE_BUFFER_SIZE: usize = 128;

const TAB_SIZE: usize = 4;

/// A foreground/background color pair, as stored in VGA text-mode cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(dead_code, reason = "full VGA palette kept for completeness")]
pub enum Color {
    Black = 0,
    Blue = 1,
    Green = 2,
    Cyan = 3,
    Red = 4,
    Magenta = 5,
    Brown = 6,
    LightGray = 7,
    DarkGray = 8,
    LightBlue = 9,
    LightGreen = 10,
    LightCyan = 11,
    LightRed = 12,
    Pink = 13,
    Yellow = 14,
    White = 15,
}

/// Packed foreground/background byte as the VGA text mode expects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct ColorCode(u8);

impl ColorCode {
    #[must_use]
    pub fn new(foreground: Color, background: Color) -> Self {
        Self((background as u8) << 4 | (foreground as u8))
    }
}

/// One character cell: a glyph plus its color attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ScreenChar {
    pub ascii_character: u8,
    pub color_code: ColorCode,
}

impl ScreenChar {
    const fn blank(color_code: ColorCode) -> Self {
        Self {
            ascii_character: b' ',
            color_code,
        }
    }
}

/// Layout of the real, memory-mapped VGA text buffer at `0xB8000`.
#[repr(transparent)]
struct VgaBuffer {
    chars: [[Volatile<ScreenChar>; BUFFER_WIDTH]; BUFFER_HEIGHT],
}

/// An off-screen copy of a terminal's screen contents, swapped onto the
/// real VGA buffer when that terminal becomes visible.
type ShadowGrid = [[ScreenChar; BUFFER_WIDTH]; BUFFER_HEIGHT];

const DEFAULT_COLOR: ColorCode = ColorCode(0x0E); // yellow on black, matching the default VGA Writer

fn blank_grid() -> ShadowGrid {
    [[ScreenChar::blank(DEFAULT_COLOR); BUFFER_WIDTH]; BUFFER_HEIGHT]
}

/// Per-terminal state: line-discipline buffer plus cursor/shadow contents.
struct Terminal {
    line: [u8; LINE_BUFFER_SIZE],
    line_len: usize,
    read_in_progress: bool,
    newline_seen: bool,
    cursor_row: usize,
    cursor_col: usize,
    shadow: ShadowGrid,
}

impl Terminal {
    fn new() -> Self {
        Self {
            line: [0; LINE_BUFFER_SIZE],
            line_len: 0,
            read_in_progress: false,
            newline_seen: false,
            cursor_row: 0,
            cursor_col: 0,
            shadow: blank_grid(),
        }
    }
}

static TERMINALS: Mutex<[Option<Terminal>; NUM_TERMINALS]> = Mutex::new([None, None, None]);

/// Which terminal's contents are currently shown on the real VGA buffer.
static VISIBLE: Mutex<usize> = Mutex::new(0);

fn vga() -> &'static mut VgaBuffer {
    // SAFETY: 0xB8000 is the fixed physical/virtual address of the VGA text
    // buffer under identity-mapped low memory; this reference is never
    // aliased outside of the `TERMINALS` lock that serializes all console
    // access.
    unsafe { &mut *core::ptr::with_exposed_provenance_mut::<VgaBuffer>(0xB8000) }
}

/// Initializes all three terminals to a blank screen and shows terminal 0.
pub fn init() {
    interrupts::without_interrupts(|| {
        let mut terminals = TERMINALS.lock();
        for slot in terminals.iter_mut() {
            *slot = Some(Terminal::new());
        }
        clear_vga();
    });
}

fn clear_vga() {
    let screen = vga();
    for row in screen.chars.iter_mut() {
        for cell in row.iter_mut() {
            cell.write(ScreenChar::blank(DEFAULT_COLOR));
        }
    }
}

/// Writes `bytes` to `group`'s terminal, following the original line
/// discipline: if `group` is visible, characters render directly to the VGA
/// buffer; otherwise they render into that terminal's shadow grid while the
/// cursor bookkeeping for the currently visible terminal is left untouched.
///
/// Returns the number of bytes written (always `bytes.len()`; the console
/// never blocks or refuses a write).
pub fn write(group: usize, bytes: &[u8]) -> usize {
    interrupts::without_interrupts(|| {
        let mut terminals = TERMINALS.lock();
        for &byte in bytes {
            render_byte(&mut terminals, group, byte);
        }
    });
    bytes.len()
}

/// Feeds one keystroke byte into `group`'s line discipline: handles
/// backspace, tab expansion, and newline the same way [`write`] does for
/// program output, and additionally buffers the byte for a pending
/// `term_read`.
pub fn key_input(group: usize, byte: u8) {
    interrupts::without_interrupts(|| {
        let mut terminals = TERMINALS.lock();
        let term = terminals[group].as_mut().expect("terminal not initialized");

        if byte == 0x08 {
            if term.line_len > 0 {
                term.line_len -= 1;
                render_byte(&mut terminals, group, 0x08);
            }
            return;
        }

        // No write of any kind, `\n` included, is allowed once the buffer
        // holds `LINE_BUFFER_SIZE - 1` bytes: letting a trailing `\n` through
        // at that point would push `line_len` to `LINE_BUFFER_SIZE`, and a
        // second `\n` arriving before a pending read drains the buffer would
        // then index one past the end of `line`.
        if term.line_len >= LINE_BUFFER_SIZE - 1 {
            return;
        }

        if byte == b'\t' {
            for _ in 0..TAB_SIZE {
                let term = terminals[group].as_mut().expect("terminal not initialized");
                if term.line_len >= LINE_BUFFER_SIZE - 1 {
                    break;
                }
                term.line[term.line_len] = b' ';
                term.line_len += 1;
                let stop = term.line_len % TAB_SIZE == 0;
                render_byte(&mut terminals, group, b' ');
                if stop {
                    break;
                }
            }
            return;
        }

        let term = terminals[group].as_mut().expect("terminal not initialized");
        term.line[term.line_len] = byte;
        term.line_len += 1;
        let is_newline = byte == b'\n';
        render_byte(&mut terminals, group, byte);

        if is_newline {
            let term = terminals[group].as_mut().expect("terminal not initialized");
            term.newline_seen = true;
            if !term.read_in_progress {
                term.line_len = 0;
            }
        }
    });
}

/// Must be called with interrupts already disabled and `TERMINALS` locked.
fn render_byte(terminals: &mut [Option<Terminal>; NUM_TERMINALS], group: usize, byte: u8) {
    let visible = *VISIBLE.lock();
    let term = terminals[group].as_mut().expect("terminal not initialized");

    if visible == group {
        let mut sink = VgaSink;
        put_char(&mut sink, &mut term.cursor_row, &mut term.cursor_col, byte);
    } else {
        let mut sink = ShadowSink(&mut term.shadow);
        put_char(&mut sink, &mut term.cursor_row, &mut term.cursor_col, byte);
    }
}

/// Abstracts over "the real VGA buffer" and "an in-memory shadow grid" so
/// `put_char`'s scrolling/echo logic is written once.
trait Grid {
    fn set(&mut self, row: usize, col: usize, ch: ScreenChar);
    fn get(&self, row: usize, col: usize) -> ScreenChar;
}

struct VgaSink;

impl Grid for VgaSink {
    fn set(&mut self, row: usize, col: usize, ch: ScreenChar) {
        vga().chars[row][col].write(ch);
    }
    fn get(&self, row: usize, col: usize) -> ScreenChar {
        vga().chars[row][col].read()
    }
}

struct ShadowSink<'a>(&'a mut ShadowGrid);

impl Grid for ShadowSink<'_> {
    fn set(&mut self, row: usize, col: usize, ch: ScreenChar) {
        self.0[row][col] = ch;
    }
    fn get(&self, row: usize, col: usize) -> ScreenChar {
        self.0[row][col]
    }
}

fn put_char(grid: &mut dyn Grid, row: &mut usize, col: &mut usize, byte: u8) {
    match byte {
        b'\n' => {
            new_line(grid, row, col);
        }
        0x08 => {
            // Destructive backspace: move back one column and blank it.
            if *col > 0 {
                *col -= 1;
            } else if *row > 0 {
                *row -= 1;
                *col = BUFFER_WIDTH - 1;
            }
            grid.set(*row, *col, ScreenChar::blank(DEFAULT_COLOR));
        }
        printable => {
            if *col >= BUFFER_WIDTH {
                new_line(grid, row, col);
            }
            grid.set(
                *row,
                *col,
                ScreenChar {
                    ascii_character: printable,
                    color_code: DEFAULT_COLOR,
                },
            );
            *col += 1;
        }
    }
}

fn new_line(grid: &mut dyn Grid, row: &mut usize, col: &mut usize) {
    if *row + 1 < BUFFER_HEIGHT {
        *row += 1;
    } else {
        for r in 1..BUFFER_HEIGHT {
            for c in 0..BUFFER_WIDTH {
                let above = grid.get(r, c);
                grid.set(r - 1, c, above);
            }
        }
        for c in 0..BUFFER_WIDTH {
            grid.set(BUFFER_HEIGHT - 1, c, ScreenChar::blank(DEFAULT_COLOR));
        }
    }
    *col = 0;
}

/// Clears `group`'s screen (Ctrl+L) without touching its line buffer: a
/// pending `read`'s already-typed characters survive the clear.
pub fn clear_screen(group: usize) {
    interrupts::without_interrupts(|| {
        let mut terminals = TERMINALS.lock();
        let visible = *VISIBLE.lock();
        let term = terminals[group].as_mut().expect("terminal not initialized");
        term.shadow = blank_grid();
        term.cursor_row = 0;
        term.cursor_col = 0;
        if visible == group {
            clear_vga();
        }
    });
}

/// Switches the visible terminal, swapping the outgoing terminal's on-screen
/// contents into its shadow grid and the incoming terminal's shadow grid
/// onto the screen (Ctrl+Alt+F1..F3).
///
/// # Errors
///
/// Returns an error if `group` is out of range.
pub fn switch_to(group: usize) -> Result<(), &'static str> {
    if group >= NUM_TERMINALS {
        return Err("console: invalid terminal number");
    }

    interrupts::without_interrupts(|| {
        let mut terminals = TERMINALS.lock();
        let mut visible = VISIBLE.lock();

        if *visible == group {
            return Ok(());
        }

        {
            let outgoing = terminals[*visible].as_mut().expect("terminal not initialized");
            let screen = vga();
            for r in 0..BUFFER_HEIGHT {
                for c in 0..BUFFER_WIDTH {
                    outgoing.shadow[r][c] = screen.chars[r][c].read();
                }
            }
        }

        *visible = group;

        {
            let incoming = terminals[group].as_ref().expect("terminal not initialized");
            let screen = vga();
            for r in 0..BUFFER_HEIGHT {
                for c in 0..BUFFER_WIDTH {
                    screen.chars[r][c].write(incoming.shadow[r][c]);
                }
            }
        }

        Ok(())
    })
}

/// Marks `group`'s line buffer as awaiting a new line of input and busy-waits
/// until Enter is seen, then copies at most `buf.len()` bytes into `buf` and
/// clears the buffer.
///
/// Mirrors `term_read`'s blocking behavior: callers must invoke this with
/// interrupts enabled so the keyboard ISR can still run.
pub fn read(group: usize, buf: &mut [u8]) -> usize {
    {
        let mut terminals = TERMINALS.lock();
        let term = terminals[group].as_mut().expect("terminal not initialized");
        term.read_in_progress = true;
        term.newline_seen = false;
    }

    loop {
        let seen = TERMINALS.lock()[group]
            .as_ref()
            .expect("terminal not initialized")
            .newline_seen;
        if seen {
            break;
        }
        x86_64::instructions::hlt();
    }

    let mut terminals = TERMINALS.lock();
    let term = terminals[group].as_mut().expect("terminal not initialized");
    let to_copy = core::cmp::min(buf.len(), term.line_len);
    buf[..to_copy].copy_from_slice(&term.line[..to_copy]);
    term.line_len = 0;
    term.read_in_progress = false;
    to_copy
}

/// Returns which terminal is currently shown on the real VGA buffer.
#[must_use]
pub fn visible_group() -> usize {
    *VISIBLE.lock()
}

/// Writes directly to terminal 0, bypassing process groups. Used for kernel
/// boot diagnostics before the scheduler and process table exist.
#[doc(hidden)]
pub fn kernel_write_str(s: &str) {
    write(0, s.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn test_tab_expands_to_tab_size_boundary() {
        init();
        key_input(0, b'a');
        key_input(0, b'\t');
        let terminals = TERMINALS.lock();
        let term = terminals[0].as_ref().unwrap();
        // 'a' then enough spaces to reach the next TAB_SIZE boundary.
        assert_eq!(term.line_len % TAB_SIZE, 0);
        assert_eq!(term.line[0], b'a');
    }

    #[test_case]
    fn test_backspace_removes_last_buffered_char() {
        init();
        key_input(0, b'x');
        key_input(0, b'y');
        key_input(0, 0x08);
        let terminals = TERMINALS.lock();
        assert_eq!(terminals[0].as_ref().unwrap().line_len, 1);
    }

    #[test_case]
    fn test_newline_marks_terminal_ready() {
        init();
        key_input(1, b'h');
        key_input(1, b'i');
        key_input(1, b'\n');
        let terminals = TERMINALS.lock();
        assert!(terminals[1].as_ref().unwrap().newline_seen);
    }

    #[test_case]
    fn test_line_buffer_rejects_overflow_even_for_newline() {
        init();
        {
            let mut terminals = TERMINALS.lock();
            let term = terminals[2].as_mut().unwrap();
            term.line_len = LINE_BUFFER_SIZE - 1;
            term.read_in_progress = true;
        }
        key_input(2, b'\n');
        let terminals = TERMINALS.lock();
        let term = terminals[2].as_ref().unwrap();
        assert_eq!(term.line_len, LINE_BUFFER_SIZE - 1, "a full buffer must reject even a newline");
        assert!(!term.newline_seen);
    }

    #[test_case]
    fn test_clear_screen_preserves_line_buffer() {
        init();
        key_input(0, b'h');
        key_input(0, b'i');
        clear_screen(0);
        let terminals = TERMINALS.lock();
        let term = terminals[0].as_ref().unwrap();
        assert_eq!(term.line_len, 2, "clearing the screen must not touch buffered input");
        assert_eq!(term.cursor_row, 0);
        assert_eq!(term.cursor_col, 0);
    }
}
