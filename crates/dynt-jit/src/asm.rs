//! Minimal x86-64 instruction encoder.
//!
//! The emitter drives this interface; nothing else about instruction
//! encoding leaks out of this module. Only the original eight registers
//! are used, with 64-bit operand size throughout, so every instruction
//! carries a plain `REX.W` prefix and ModRM encoding never needs the
//! extension bits.
//!
//! Forward jumps hand out a [`Label`] over a 32-bit relative placeholder
//! that [`Asm::patch`] resolves to the current position; backward jumps
//! take the recorded target offset directly.

/// The eight classic general-purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
}

/// A base-plus-displacement memory operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: Reg,
    pub disp: i32,
}

/// Build a memory operand.
pub fn mem(base: Reg, disp: i32) -> Operand {
    Operand::Mem(Mem { base, disp })
}

/// An instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(Reg),
    Mem(Mem),
    Imm(i64),
}

/// Condition codes for `jcc_forward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cc {
    E,
    Ne,
    L,
    G,
    Le,
    Ge,
}

impl Cc {
    fn rel32_opcode(self) -> u8 {
        match self {
            Cc::E => 0x84,
            Cc::Ne => 0x85,
            Cc::L => 0x8C,
            Cc::G => 0x8F,
            Cc::Le => 0x8E,
            Cc::Ge => 0x8D,
        }
    }
}

/// A forward-jump fixup: the buffer offset of a rel32 placeholder.
#[derive(Debug)]
#[must_use]
pub struct Label(usize);

/// Opcode bytes for the regular two-operand ALU instructions.
struct AluOp {
    /// `op r/m64, r64`
    rm_r: u8,
    /// `op r64, r/m64`
    r_rm: u8,
    /// ModRM extension for the `0x81 /ext imm32` form
    imm_ext: u8,
}

const MOV: AluOp = AluOp { rm_r: 0x89, r_rm: 0x8B, imm_ext: 0 };
const ADD: AluOp = AluOp { rm_r: 0x01, r_rm: 0x03, imm_ext: 0 };
const OR: AluOp = AluOp { rm_r: 0x09, r_rm: 0x0B, imm_ext: 1 };
const AND: AluOp = AluOp { rm_r: 0x21, r_rm: 0x23, imm_ext: 4 };
const SUB: AluOp = AluOp { rm_r: 0x29, r_rm: 0x2B, imm_ext: 5 };
const XOR: AluOp = AluOp { rm_r: 0x31, r_rm: 0x33, imm_ext: 6 };
const CMP: AluOp = AluOp { rm_r: 0x39, r_rm: 0x3B, imm_ext: 7 };

/// Growing code buffer with encoding methods.
#[derive(Default)]
pub struct Asm {
    buf: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn byte(&mut self, b: u8) {
        self.buf.push(b);
    }

    fn imm32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn rex_w(&mut self) {
        self.byte(0x48);
    }

    /// ModRM with mod=11 (register direct).
    fn modrm_reg(&mut self, reg: u8, rm: Reg) {
        self.byte(0b1100_0000 | (reg << 3) | rm as u8);
    }

    /// ModRM (plus SIB/displacement) for `[base + disp]`.
    fn modrm_mem(&mut self, reg: u8, m: Mem) {
        let rm = m.base as u8;
        let needs_sib = m.base == Reg::Rsp;
        // [rbp] with mod=00 would mean rip-relative, so rbp always
        // carries a displacement byte
        let (mode, disp8) = if m.disp == 0 && m.base != Reg::Rbp {
            (0b00, None)
        } else if (-128..=127).contains(&m.disp) {
            (0b01, Some(m.disp as i8))
        } else {
            (0b10, None)
        };

        self.byte((mode << 6) | (reg << 3) | if needs_sib { 0b100 } else { rm });
        if needs_sib {
            self.byte(0x24);
        }
        match (mode, disp8) {
            (0b01, Some(d)) => self.byte(d as u8),
            (0b10, _) => self.imm32(m.disp),
            _ => {}
        }
    }

    fn alu(&mut self, op: &AluOp, dst: Operand, src: Operand) {
        match (dst, src) {
            (Operand::Reg(d), Operand::Reg(s)) => {
                self.rex_w();
                self.byte(op.rm_r);
                self.modrm_reg(s as u8, d);
            }
            (Operand::Reg(d), Operand::Mem(m)) => {
                self.rex_w();
                self.byte(op.r_rm);
                self.modrm_mem(d as u8, m);
            }
            (Operand::Mem(m), Operand::Reg(s)) => {
                self.rex_w();
                self.byte(op.rm_r);
                self.modrm_mem(s as u8, m);
            }
            (Operand::Reg(_), Operand::Imm(v)) | (Operand::Mem(_), Operand::Imm(v)) => {
                let v = i32::try_from(v).expect("ALU immediate must fit in 32 bits");
                self.rex_w();
                if op.rm_r == MOV.rm_r {
                    // MOV has its own immediate form: C7 /0 imm32
                    self.byte(0xC7);
                    match dst {
                        Operand::Reg(d) => self.modrm_reg(0, d),
                        Operand::Mem(m) => self.modrm_mem(0, m),
                        Operand::Imm(_) => unreachable!(),
                    }
                } else {
                    self.byte(0x81);
                    match dst {
                        Operand::Reg(d) => self.modrm_reg(op.imm_ext, d),
                        Operand::Mem(m) => self.modrm_mem(op.imm_ext, m),
                        Operand::Imm(_) => unreachable!(),
                    }
                }
                self.imm32(v);
            }
            _ => panic!("unencodable operand pair {:?}, {:?}", dst, src),
        }
    }

    pub fn mov(&mut self, dst: Operand, src: Operand) {
        if dst == src {
            return;
        }
        self.alu(&MOV, dst, src);
    }

    pub fn add(&mut self, dst: Operand, src: Operand) {
        self.alu(&ADD, dst, src);
    }

    pub fn sub(&mut self, dst: Operand, src: Operand) {
        self.alu(&SUB, dst, src);
    }

    pub fn cmp(&mut self, dst: Operand, src: Operand) {
        self.alu(&CMP, dst, src);
    }

    pub fn and(&mut self, dst: Operand, src: Operand) {
        self.alu(&AND, dst, src);
    }

    pub fn or(&mut self, dst: Operand, src: Operand) {
        self.alu(&OR, dst, src);
    }

    pub fn xor(&mut self, dst: Operand, src: Operand) {
        self.alu(&XOR, dst, src);
    }

    /// `imul dst, src` (two-operand signed multiply).
    pub fn imul(&mut self, dst: Reg, src: Operand) {
        self.rex_w();
        self.byte(0x0F);
        self.byte(0xAF);
        match src {
            Operand::Reg(s) => self.modrm_reg(dst as u8, s),
            Operand::Mem(m) => self.modrm_mem(dst as u8, m),
            Operand::Imm(_) => panic!("imul takes a register or memory source"),
        }
    }

    /// Sign-extend RAX into RDX:RAX.
    pub fn cqo(&mut self) {
        self.rex_w();
        self.byte(0x99);
    }

    /// Signed divide RDX:RAX by `divisor`; quotient in RAX, remainder in
    /// RDX.
    pub fn idiv(&mut self, divisor: Reg) {
        self.rex_w();
        self.byte(0xF7);
        self.modrm_reg(7, divisor);
    }

    pub fn push(&mut self, reg: Reg) {
        self.byte(0x50 + reg as u8);
    }

    pub fn pop(&mut self, reg: Reg) {
        self.byte(0x58 + reg as u8);
    }

    pub fn lea(&mut self, dst: Reg, m: Mem) {
        self.rex_w();
        self.byte(0x8D);
        self.modrm_mem(dst as u8, m);
    }

    /// Load a full 64-bit immediate.
    pub fn mov_imm64(&mut self, dst: Reg, value: u64) {
        self.rex_w();
        self.byte(0xB8 + dst as u8);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn call_reg(&mut self, reg: Reg) {
        self.byte(0xFF);
        self.modrm_reg(2, reg);
    }

    pub fn ret(&mut self) {
        self.byte(0xC3);
    }

    /// Unconditional forward jump; patch later.
    pub fn jmp_forward(&mut self) -> Label {
        self.byte(0xE9);
        let at = self.buf.len();
        self.imm32(0);
        Label(at)
    }

    /// Conditional forward jump; patch later.
    pub fn jcc_forward(&mut self, cc: Cc) -> Label {
        self.byte(0x0F);
        self.byte(cc.rel32_opcode());
        let at = self.buf.len();
        self.imm32(0);
        Label(at)
    }

    /// Unconditional jump to an already-emitted offset.
    pub fn jmp_backward(&mut self, target: usize) {
        self.byte(0xE9);
        let next = self.buf.len() + 4;
        let rel = target as i64 - next as i64;
        self.imm32(i32::try_from(rel).expect("backward jump out of range"));
    }

    /// Resolve a forward jump to the current position.
    pub fn patch(&mut self, label: Label) {
        let rel = self.buf.len() as i64 - (label.0 + 4) as i64;
        let rel = i32::try_from(rel).expect("forward jump out of range");
        self.buf[label.0..label.0 + 4].copy_from_slice(&rel.to_le_bytes());
    }
}
