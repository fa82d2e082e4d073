//! Pointer-tracking tape code writer
//!
//! [`TapeWriter`] knows where the data pointer is at every point of the code
//! it writes, so callers address cells absolutely and the writer emits the
//! `<` / `>` runs in between. Every loop it writes starts and ends on the
//! same cell, which keeps the static pointer position exact.
//!
//! Scratch cells are lent out through [`Scratch`]. Every primitive expects
//! the scratch cells it uses to be zero on entry and leaves them zero.

use super::ir::{Operand, Value};
use crate::parser::BinaryOperator;
use crate::runtime::CellWidth;

/// The eight symbols of the base tape language
pub const BASE_SYMBOLS: [char; 8] = ['+', '-', '<', '>', '[', ']', '.', ','];

/// Negate the current cell
pub const NEGATE: char = '~';
/// Call a user function
pub const CALL: char = '@';
/// Call nothing could resolve
pub const UNRESOLVED_CALL: char = '?';
/// Return from a function
pub const RETURN: char = '^';
/// Label anchor
pub const LABEL: char = ':';
/// Unconditional jump
pub const JUMP: char = '|';
/// Conditional jump
pub const CONDITIONAL_JUMP: char = '=';
/// Module import
pub const IMPORT: char = '&';
/// Variable export
pub const EXPORT: char = '%';
/// Object construction
pub const OBJECT: char = '*';
/// Comment
pub const COMMENT: char = '#';

/// Every extension sigil
pub const SIGILS: [char; 11] = [
    NEGATE,
    CALL,
    UNRESOLVED_CALL,
    RETURN,
    LABEL,
    JUMP,
    CONDITIONAL_JUMP,
    IMPORT,
    EXPORT,
    OBJECT,
    COMMENT,
];

/// Base-language expansion of [`NEGATE`]. Needs the cell to the right to be zero.
pub const NEGATE_EXPANSION: &str = "[->-<]>[-<+>]<";

/// Cells reserved above the program's variables
pub const SCRATCH_CELLS: usize = 12;

/// Largest constant written as a plain run of `+` or `-`
const DIRECT_LIMIT: u64 = 16;

/// Named scratch cells starting at a base address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scratch {
    /// First scratch cell
    pub base: usize,
    /// Negation cell
    pub neg: usize,
    /// Always zero; right neighbour of `neg`
    pub guard: usize,
    /// Constant-building cells
    pub k1: usize,
    /// Constant-building multiplier
    pub k2: usize,
    /// Work cells
    pub a: usize,
    #[allow(missing_docs)]
    pub b: usize,
    #[allow(missing_docs)]
    pub c: usize,
    #[allow(missing_docs)]
    pub d: usize,
    #[allow(missing_docs)]
    pub e: usize,
    #[allow(missing_docs)]
    pub f: usize,
    #[allow(missing_docs)]
    pub g: usize,
    #[allow(missing_docs)]
    pub h: usize,
}

impl Scratch {
    /// Scratch block starting at `base`
    pub fn at(base: usize) -> Self {
        Scratch {
            base,
            neg: base,
            guard: base + 1,
            k1: base + 2,
            k2: base + 3,
            a: base + 4,
            b: base + 5,
            c: base + 6,
            d: base + 7,
            e: base + 8,
            f: base + 9,
            g: base + 10,
            h: base + 11,
        }
    }
}

/// Replaces tape symbols, sigils and line breaks so free text cannot be
/// executed
pub fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if BASE_SYMBOLS.contains(&c) || SIGILS.contains(&c) || c == '\n' || c == '\r' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// Writes tape code while tracking the data pointer
#[derive(Debug, Clone)]
pub struct TapeWriter {
    code: String,
    pointer: usize,
    width: CellWidth,
}

impl TapeWriter {
    /// Writer with the pointer on cell 0
    pub fn new(width: CellWidth) -> Self {
        Self::at(0, width)
    }

    /// Writer with the pointer on `pointer`
    pub fn at(pointer: usize, width: CellWidth) -> Self {
        TapeWriter {
            code: String::new(),
            pointer,
            width,
        }
    }

    /// Current pointer position
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    /// Cell width literals are encoded for
    pub fn width(&self) -> CellWidth {
        self.width
    }

    /// Code written so far
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Consumes the writer, returning its code
    pub fn into_code(self) -> String {
        self.code
    }

    /// Appends text that leaves the pointer where it is
    pub fn raw(&mut self, text: &str) {
        self.code.push_str(text);
    }

    /// Moves the pointer to `cell`
    pub fn move_to(&mut self, cell: usize) {
        if cell > self.pointer {
            self.code.extend(std::iter::repeat('>').take(cell - self.pointer));
        } else {
            self.code.extend(std::iter::repeat('<').take(self.pointer - cell));
        }
        self.pointer = cell;
    }

    /// `cell += n`
    pub fn inc(&mut self, cell: usize, n: usize) {
        self.move_to(cell);
        self.code.extend(std::iter::repeat('+').take(n));
    }

    /// `cell -= n`
    pub fn dec(&mut self, cell: usize, n: usize) {
        self.move_to(cell);
        self.code.extend(std::iter::repeat('-').take(n));
    }

    /// `cell = 0`
    pub fn clear(&mut self, cell: usize) {
        self.move_to(cell);
        self.code.push_str("[-]");
    }

    /// `while cell != 0 { body }`. The body may move anywhere; the loop
    /// closes on `cell`.
    pub fn loop_at(&mut self, cell: usize, body: impl FnOnce(&mut Self)) {
        self.move_to(cell);
        self.code.push('[');
        body(self);
        self.move_to(cell);
        self.code.push(']');
    }

    /// `to += from; from = 0`
    pub fn move_add(&mut self, from: usize, to: usize) {
        self.loop_at(from, |w| {
            w.dec(from, 1);
            w.inc(to, 1);
        });
    }

    /// `to -= from; from = 0`
    pub fn move_sub(&mut self, from: usize, to: usize) {
        self.loop_at(from, |w| {
            w.dec(from, 1);
            w.dec(to, 1);
        });
    }

    /// `to += from`, restoring `from` through `tmp`
    pub fn copy_add(&mut self, from: usize, to: usize, tmp: usize) {
        self.loop_at(from, |w| {
            w.dec(from, 1);
            w.inc(to, 1);
            w.inc(tmp, 1);
        });
        self.move_add(tmp, from);
    }

    /// Builds `value` in the zero cell `cell` in base 16, using `tmp` to multiply
    pub fn build(&mut self, cell: usize, value: u64, tmp: usize) {
        let mut digits = Vec::new();
        let mut rest = value;
        while rest > 0 {
            digits.push((rest % 16) as usize);
            rest /= 16;
        }

        for (i, digit) in digits.into_iter().rev().enumerate() {
            if i > 0 {
                // cell *= 16
                self.move_add(cell, tmp);
                self.loop_at(tmp, |w| {
                    w.dec(tmp, 1);
                    w.inc(cell, 16);
                });
            }
            self.inc(cell, digit);
        }
    }

    /// `cell += n` modulo the cell width
    pub fn add_const(&mut self, cell: usize, n: i64, s: &Scratch) {
        let value = self.width.wrap(n);
        let down = self.width.modulus() - value;
        if value == 0 {
            return;
        }
        if value <= DIRECT_LIMIT {
            self.inc(cell, value as usize);
        } else if down <= DIRECT_LIMIT {
            self.dec(cell, down as usize);
        } else {
            self.build(s.k1, value, s.k2);
            self.move_add(s.k1, cell);
        }
    }

    /// `cell += n` where negative literals are written as their magnitude
    /// followed by a negation
    pub fn add_literal(&mut self, cell: usize, n: i64, s: &Scratch) {
        if n >= 0 {
            self.add_const(cell, n, s);
            return;
        }
        let magnitude = (u128::from(n.unsigned_abs()) % u128::from(self.width.modulus())) as i64;
        if magnitude == 0 {
            return;
        }
        self.add_const(s.neg, magnitude, s);
        self.move_to(s.neg);
        self.code.push(NEGATE);
        self.move_add(s.neg, cell);
    }

    /// Writes every cell of `value` starting at `address`
    pub fn write_value(&mut self, address: usize, value: &Value, s: &Scratch) {
        for (offset, n) in value.cells().into_iter().enumerate() {
            self.clear(address + offset);
            self.add_literal(address + offset, n, s);
        }
    }

    /// `cell += operand`, reading the operand's first cell
    pub fn load(&mut self, operand: &Operand, cell: usize, s: &Scratch) {
        match operand {
            Operand::Literal(value) => {
                let first = value.cells().first().copied().unwrap_or(0);
                self.add_literal(cell, first, s);
            }
            Operand::Address { address, .. } => self.copy_add(*address, cell, s.k1),
        }
    }

    /// `flag = operand != 0` for a zero `flag`
    pub fn set_bool(&mut self, flag: usize, operand: &Operand, s: &Scratch) {
        match operand {
            Operand::Literal(value) => {
                if value.is_truthy() {
                    self.inc(flag, 1);
                }
            }
            Operand::Address { address, .. } => {
                self.copy_add(*address, s.a, s.b);
                self.loop_at(s.a, |w| {
                    w.clear(s.a);
                    w.inc(flag, 1);
                });
            }
        }
    }

    /// Outputs the operand. A variable's first cell is always output; the
    /// cells after it only when non-zero, since a grown variable keeps zero
    /// padding behind a shorter value.
    pub fn print_operand(&mut self, operand: &Operand, s: &Scratch) {
        match operand {
            Operand::Literal(value) => {
                for n in value.cells() {
                    self.add_literal(s.a, n, s);
                    self.output(s.a);
                    self.clear(s.a);
                }
            }
            Operand::Address { address, len } => {
                self.output(*address);
                for cell in address + 1..address + len {
                    self.copy_add(cell, s.a, s.b);
                    self.loop_at(s.a, |w| {
                        w.output(cell);
                        w.clear(s.a);
                    });
                }
            }
        }
    }

    /// `.` on `cell`
    pub fn output(&mut self, cell: usize) {
        self.move_to(cell);
        self.code.push('.');
    }

    /// `,` on `cell`
    pub fn input(&mut self, cell: usize) {
        self.move_to(cell);
        self.code.push(',');
    }

    /// Sigil followed by sanitized text
    pub fn sigil(&mut self, sigil: char, text: &str) {
        self.code.push(sigil);
        self.code.push_str(&sanitize(text));
    }

    /// `target = left op right` on the operands' first cells. Comparisons
    /// are unsigned on the wrapped cell values; division by zero yields an
    /// unspecified value.
    pub fn binary(
        &mut self,
        operator: BinaryOperator,
        left: &Operand,
        right: &Operand,
        target: usize,
        s: &Scratch,
    ) {
        let (a, b) = (s.a, s.b);
        match operator {
            BinaryOperator::Add | BinaryOperator::Sub => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.clear(target);
                self.move_add(a, target);
                if operator == BinaryOperator::Add {
                    self.move_add(b, target);
                } else {
                    self.move_sub(b, target);
                }
            }

            BinaryOperator::Mul => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.clear(target);
                self.loop_at(a, |w| {
                    w.dec(a, 1);
                    w.copy_add(b, target, s.c);
                });
                self.clear(b);
            }

            BinaryOperator::Div | BinaryOperator::Mod => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.divmod(s);
                self.clear(target);
                let (keep, drop) = if operator == BinaryOperator::Div {
                    (s.d, s.e)
                } else {
                    (s.e, s.d)
                };
                self.move_add(keep, target);
                self.clear(drop);
            }

            BinaryOperator::Eq | BinaryOperator::NotEq => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.move_sub(b, a);
                self.clear(target);
                if operator == BinaryOperator::Eq {
                    self.inc(target, 1);
                    self.loop_at(a, |w| {
                        w.clear(a);
                        w.dec(target, 1);
                    });
                } else {
                    self.loop_at(a, |w| {
                        w.clear(a);
                        w.inc(target, 1);
                    });
                }
            }

            BinaryOperator::Lt | BinaryOperator::Gt | BinaryOperator::LtEq | BinaryOperator::GtEq => {
                // x < y, x > y == y < x, x <= y == !(y < x), x >= y == !(x < y)
                let (first, second, negate) = match operator {
                    BinaryOperator::Lt => (left, right, false),
                    BinaryOperator::Gt => (right, left, false),
                    BinaryOperator::LtEq => (right, left, true),
                    _ => (left, right, true),
                };
                self.load(first, a, s);
                self.load(second, b, s);
                self.less_than(s);
                self.clear(target);
                if negate {
                    self.inc(target, 1);
                    self.loop_at(b, |w| {
                        w.clear(b);
                        w.dec(target, 1);
                    });
                } else {
                    self.loop_at(b, |w| {
                        w.clear(b);
                        w.inc(target, 1);
                    });
                }
            }

            BinaryOperator::And => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.clear(target);
                self.copy_add(a, target, s.c);
                // left truthy: result is right
                self.loop_at(a, |w| {
                    w.clear(a);
                    w.clear(target);
                    w.copy_add(b, target, s.c);
                });
                self.clear(b);
            }

            BinaryOperator::Or => {
                self.load(left, a, s);
                self.load(right, b, s);
                self.clear(target);
                self.copy_add(a, target, s.c);
                self.inc(s.f, 1);
                self.loop_at(a, |w| {
                    w.clear(a);
                    w.dec(s.f, 1);
                });
                // left falsy: result is right
                self.loop_at(s.f, |w| {
                    w.clear(target);
                    w.copy_add(b, target, s.c);
                    w.dec(s.f, 1);
                });
                self.clear(b);
            }
        }
    }

    /// With x in `a` and y in `b`: leaves `a = 0`, `b = max(y - x, 0)`
    fn less_than(&mut self, s: &Scratch) {
        let (a, b, t1, t2) = (s.a, s.b, s.g, s.h);
        self.loop_at(a, |w| {
            w.dec(a, 1);
            // if b != 0 { b -= 1 }
            w.copy_add(b, t1, t2);
            w.loop_at(t1, |w| {
                w.clear(t1);
                w.dec(b, 1);
            });
        });
    }

    /// With n in `a` and d in `b`: leaves n / d in `d`, n % d in `e`, and
    /// `a`, `b` and the work cells zero
    fn divmod(&mut self, s: &Scratch) {
        let (a, b, left, quotient, remainder, flag, t1, t2) =
            (s.a, s.b, s.c, s.d, s.e, s.f, s.g, s.h);
        self.copy_add(b, left, t1);
        self.loop_at(a, |w| {
            w.dec(a, 1);
            w.dec(left, 1);
            w.inc(remainder, 1);
            // flag = left == 0
            w.inc(flag, 1);
            w.copy_add(left, t1, t2);
            w.loop_at(t1, |w| {
                w.clear(t1);
                w.dec(flag, 1);
            });
            w.loop_at(flag, |w| {
                w.inc(quotient, 1);
                w.clear(remainder);
                w.copy_add(b, left, t1);
                w.dec(flag, 1);
            });
        });
        self.clear(b);
        self.clear(left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{Interpreter, InterpreterConfig};

    fn run(code: &str) -> Vec<u64> {
        let mut interp = Interpreter::new(InterpreterConfig::default());
        interp.run(code, b"").unwrap().output_cells
    }

    fn eval_binary(operator: BinaryOperator, l: i64, r: i64) -> u64 {
        let s = Scratch::at(10);
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.binary(operator, &Operand::int(l), &Operand::int(r), 0, &s);
        w.output(0);
        run(w.code())[0]
    }

    #[test]
    fn test_move_to_tracks_pointer() {
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.move_to(3);
        w.move_to(1);
        assert_eq!(w.code(), ">>><<");
        assert_eq!(w.pointer(), 1);
    }

    #[test]
    fn test_small_constants_are_direct() {
        let s = Scratch::at(10);
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.add_const(0, 3, &s);
        w.add_const(0, -2, &s);
        assert_eq!(w.code(), "+++--");
    }

    #[test]
    fn test_large_constant_builds_value() {
        let s = Scratch::at(10);
        for n in [17i64, 65, 122, 200, 255] {
            let mut w = TapeWriter::new(CellWidth::Bits8);
            w.add_const(0, n, &s);
            w.output(0);
            assert_eq!(run(w.code()), vec![n as u64], "constant {}", n);
        }
    }

    #[test]
    fn test_negative_literal_uses_negation() {
        let s = Scratch::at(10);
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.write_value(0, &Value::Int(-3), &s);
        assert!(w.code().contains(NEGATE));
        w.output(0);
        assert_eq!(run(w.code()), vec![253]);
    }

    #[test]
    fn test_binary_templates() {
        use BinaryOperator::*;
        assert_eq!(eval_binary(Add, 2, 3), 5);
        assert_eq!(eval_binary(Sub, 2, 3), 255);
        assert_eq!(eval_binary(Mul, 6, 7), 42);
        assert_eq!(eval_binary(Div, 17, 5), 3);
        assert_eq!(eval_binary(Mod, 17, 5), 2);
        assert_eq!(eval_binary(Div, 4, 4), 1);
        assert_eq!(eval_binary(Mod, 3, 7), 3);
        assert_eq!(eval_binary(Eq, 4, 4), 1);
        assert_eq!(eval_binary(NotEq, 4, 4), 0);
        assert_eq!(eval_binary(Lt, 2, 5), 1);
        assert_eq!(eval_binary(Lt, 5, 2), 0);
        assert_eq!(eval_binary(Lt, 3, 3), 0);
        assert_eq!(eval_binary(Gt, 5, 2), 1);
        assert_eq!(eval_binary(LtEq, 3, 3), 1);
        assert_eq!(eval_binary(GtEq, 2, 3), 0);
        assert_eq!(eval_binary(And, 2, 9), 9);
        assert_eq!(eval_binary(And, 0, 9), 0);
        assert_eq!(eval_binary(Or, 0, 9), 9);
        assert_eq!(eval_binary(Or, 4, 9), 4);
    }

    #[test]
    fn test_copy_add_restores_source() {
        let s = Scratch::at(10);
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.add_const(1, 7, &s);
        w.copy_add(1, 2, 3);
        w.output(1);
        w.output(2);
        w.output(3);
        assert_eq!(run(w.code()), vec![7, 7, 0]);
    }

    #[test]
    fn test_print_variable_skips_zero_padding() {
        let s = Scratch::at(10);
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.write_value(0, &Value::Str("a".into()), &s);
        w.print_operand(&Operand::Address { address: 0, len: 3 }, &s);
        w.write_value(0, &Value::Str("bc".into()), &s);
        w.print_operand(&Operand::Address { address: 0, len: 3 }, &s);
        assert_eq!(run(w.code()), vec![97, 98, 99]);

        // a zero first cell is still printed
        let mut w = TapeWriter::new(CellWidth::Bits8);
        w.print_operand(&Operand::Address { address: 0, len: 2 }, &s);
        assert_eq!(run(w.code()), vec![0]);
    }

    #[test]
    fn test_sanitize_removes_executable_characters() {
        assert_eq!(sanitize("a+b [x] ~y\nz"), "a_b _x_ _y_z");
    }
}
