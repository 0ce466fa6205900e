use crate::error::RuntimeError;

/// Bytecode instructions. Operands follow the opcode byte, little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    Nop,
    Dup,
    Pop,
    Call,
    TCall,
    Jmp,
    Brf,
    Brt,
    JmpL,
    BrfL,
    BrtL,
    Ret,
    TApply,

    Eq,
    Eqv,
    Equal,
    Atomp,
    Not,
    Nullp,
    Booleanp,
    Symbolp,
    Numberp,
    Boundp,
    Pairp,
    Builtinp,
    Vectorp,
    Fixnump,

    Cons,
    List,
    Car,
    Cdr,
    SetCar,
    SetCdr,
    Eval,
    Apply,

    Add,
    Sub,
    Mul,
    Div,
    NumEq,
    Lt,
    Compare,

    Vector,
    Aref,
    Aset,

    LoadT,
    LoadF,
    LoadNil,
    Load0,
    Load1,
    LoadI8,
    LoadV,
    LoadVL,
    LoadG,
    LoadA,
    LoadC,
    LoadGL,

    SetG,
    SetA,
    SetC,
    SetGL,

    Closure,
    TryCatch,
    Argc,
    Vargc,
    Close,
    Let,
    For,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    U8,
    I8,
    I16,
    I32,
    U32,
}

impl Operand {
    pub fn width(self) -> usize {
        match self {
            Operand::U8 | Operand::I8 => 1,
            Operand::I16 => 2,
            Operand::I32 | Operand::U32 => 4,
        }
    }
}

impl Op {
    pub const ALL: [Op; 68] = [
        Op::Nop,
        Op::Dup,
        Op::Pop,
        Op::Call,
        Op::TCall,
        Op::Jmp,
        Op::Brf,
        Op::Brt,
        Op::JmpL,
        Op::BrfL,
        Op::BrtL,
        Op::Ret,
        Op::TApply,
        Op::Eq,
        Op::Eqv,
        Op::Equal,
        Op::Atomp,
        Op::Not,
        Op::Nullp,
        Op::Booleanp,
        Op::Symbolp,
        Op::Numberp,
        Op::Boundp,
        Op::Pairp,
        Op::Builtinp,
        Op::Vectorp,
        Op::Fixnump,
        Op::Cons,
        Op::List,
        Op::Car,
        Op::Cdr,
        Op::SetCar,
        Op::SetCdr,
        Op::Eval,
        Op::Apply,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::Div,
        Op::NumEq,
        Op::Lt,
        Op::Compare,
        Op::Vector,
        Op::Aref,
        Op::Aset,
        Op::LoadT,
        Op::LoadF,
        Op::LoadNil,
        Op::Load0,
        Op::Load1,
        Op::LoadI8,
        Op::LoadV,
        Op::LoadVL,
        Op::LoadG,
        Op::LoadA,
        Op::LoadC,
        Op::LoadGL,
        Op::SetG,
        Op::SetA,
        Op::SetC,
        Op::SetGL,
        Op::Closure,
        Op::TryCatch,
        Op::Argc,
        Op::Vargc,
        Op::Close,
        Op::Let,
        Op::For,
    ];

    pub fn operands(self) -> &'static [Operand] {
        match self {
            Op::Call
            | Op::TCall
            | Op::TApply
            | Op::List
            | Op::Apply
            | Op::Vector
            | Op::LoadV
            | Op::LoadG
            | Op::LoadA
            | Op::SetG
            | Op::SetA
            | Op::Argc
            | Op::Vargc
            | Op::Let => &[Operand::U8],
            Op::Jmp | Op::Brf | Op::Brt => &[Operand::I16],
            Op::JmpL | Op::BrfL | Op::BrtL => &[Operand::I32],
            Op::LoadI8 => &[Operand::I8],
            Op::LoadVL | Op::LoadGL | Op::SetGL => &[Operand::U32],
            Op::LoadC | Op::SetC => &[Operand::U8, Operand::U8],
            _ => &[],
        }
    }

    /// Encoded size, opcode byte included.
    pub fn width(self) -> usize {
        1 + self.operands().iter().map(|operand| operand.width()).sum::<usize>()
    }

    pub fn name(self) -> String {
        format!("{self:?}").to_lowercase()
    }
}

impl TryFrom<u8> for Op {
    type Error = RuntimeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Op::ALL
            .get(byte as usize)
            .copied()
            .ok_or_else(|| RuntimeError::InvalidBytecode(format!("unknown opcode {byte:#x}")))
    }
}
