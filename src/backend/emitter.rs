//! The assembly line buffer and running binary-location counter
//! (spec.md §4.8).
//!
//! Grounded on `gwcc/backend/lc3.py`'s `_emit_line`/`emit_*` family. Each
//! line tracks the binary location it was emitted at rather than having
//! that location baked into its text immediately, so a relocation can
//! regenerate a line span and re-measure it before the final render.

/// One line of the eventual assembly text. `Text` lines (comments, blank
/// separators) carry no binary-location suffix and do not advance the
/// counter; `Located` lines do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmittedLine {
    Text(String),
    Located { text: String, loc: u16 },
}

impl EmittedLine {
    fn render(&self) -> String {
        match self {
            EmittedLine::Text(s) => s.clone(),
            EmittedLine::Located { text, loc } => format!("{text}\t; loc={loc:02x}"),
        }
    }
}

/// A line buffer with a running 16-bit binary-location counter and a
/// quiet-mode toggle that suppresses comments and blank lines for terser
/// output (spec.md §4.8, the `-g`/`--symbols` CLI flag of §6.3).
#[derive(Clone, Debug)]
pub struct Emitter {
    lines: Vec<EmittedLine>,
    cur_loc: u16,
    quiet: bool,
}

impl Emitter {
    pub fn new(quiet: bool) -> Self {
        Emitter {
            lines: Vec::new(),
            cur_loc: 0,
            quiet,
        }
    }

    /// A fresh emitter seeded at `start_loc`, used to regenerate a
    /// relocation's line span for length comparison.
    pub fn scratch(quiet: bool, start_loc: u16) -> Self {
        Emitter {
            lines: Vec::new(),
            cur_loc: start_loc,
            quiet,
        }
    }

    pub fn quiet(&self) -> bool {
        self.quiet
    }

    pub fn cur_loc(&self) -> u16 {
        self.cur_loc
    }

    pub fn num_lines(&self) -> usize {
        self.lines.len()
    }

    fn push_located(&mut self, text: String, binary_len: u16) {
        self.lines.push(EmittedLine::Located { text, loc: self.cur_loc });
        self.cur_loc = self.cur_loc.wrapping_add(binary_len);
    }

    pub fn emit_insn(&mut self, insn: impl Into<String>) {
        self.push_located(insn.into(), 1);
    }

    /// `.orig xADDR`. The line itself records the counter's *previous*
    /// value (the end of whatever came before); the counter jumps to `to`
    /// immediately after, for every subsequent emit.
    pub fn emit_orig(&mut self, to: u16) {
        self.push_located(format!(".orig x{to:04X}"), 0);
        self.cur_loc = to;
    }

    pub fn emit_section_end(&mut self) {
        self.push_located(".end".to_string(), 0);
    }

    pub fn emit_fill(&mut self, value: u16, name: Option<&str>) {
        match name {
            Some(name) => self.push_located(format!("{name} .fill x{value:04X}"), 1),
            None => self.push_located(format!(".fill x{value:04X}"), 1),
        }
    }

    pub fn emit_blkw(&mut self, name: &str, size: u16) {
        self.push_located(format!("{name} .blkw {size}"), size);
    }

    pub fn emit_comment(&mut self, text: impl Into<String>) {
        if !self.quiet {
            self.lines.push(EmittedLine::Text(format!("; {}", text.into())));
        }
    }

    pub fn emit_newline(&mut self) {
        if !self.quiet {
            self.lines.push(EmittedLine::Text(String::new()));
        }
    }

    /// Replace `len` lines starting at `idx` with `replacement`, for
    /// relocation application.
    pub fn splice(&mut self, idx: usize, len: usize, replacement: Vec<EmittedLine>) {
        self.lines.splice(idx..idx + len, replacement);
    }

    /// The binary location recorded at the start of the line at `idx`.
    pub fn loc_at(&self, idx: usize) -> Option<u16> {
        match self.lines.get(idx) {
            Some(EmittedLine::Located { loc, .. }) => Some(*loc),
            _ => None,
        }
    }

    pub fn into_lines(self) -> Vec<EmittedLine> {
        self.lines
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out += &line.render();
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_advances_by_declared_binary_length() {
        let mut e = Emitter::new(false);
        e.emit_orig(0x3000);
        e.emit_insn("ADD r0, r0, #0");
        e.emit_blkw("_x", 3);
        assert_eq!(e.cur_loc(), 0x3004);
    }

    #[test]
    fn quiet_mode_drops_comments_and_blanks() {
        let mut e = Emitter::new(true);
        e.emit_comment("hello");
        e.emit_newline();
        e.emit_insn("RET");
        assert_eq!(e.num_lines(), 1);
    }

    #[test]
    fn splice_replaces_exact_line_range() {
        let mut e = Emitter::new(false);
        e.emit_insn("A");
        let idx = e.num_lines();
        e.emit_insn("B");
        e.emit_insn("C");
        let len = e.num_lines() - idx;
        e.splice(idx, len, vec![EmittedLine::Located { text: "B2".into(), loc: 1 }]);
        assert_eq!(e.num_lines(), 2);
    }
}
