//! Instruction opcodes
//!
//! Only the subset of the instruction set the weaver needs to clone, splice
//! and relocate method bodies. Operand shapes are fixed per opcode (see
//! [`Opcode::operand_kind`]).

/// Shape of the operand carried by an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand
    None,
    /// 64-bit integer immediate
    Int,
    /// 64-bit float immediate
    Float,
    /// String literal
    String,
    /// Type signature
    Type,
    /// Field reference
    Field,
    /// Method reference
    Method,
    /// Branch target (instruction index)
    Branch,
    /// Jump table
    Switch,
    /// Local variable index
    Local,
    /// Argument index
    Arg,
}

/// Instruction opcode
///
/// Opcodes are organized into categories:
/// - 0x00-0x0F: Stack and constants
/// - 0x10-0x1F: Arguments and locals
/// - 0x20-0x2F: Fields
/// - 0x30-0x3F: Calls and returns
/// - 0x40-0x4F: Control flow
/// - 0x50-0x5F: Objects and arrays
/// - 0x60-0x6F: Arithmetic and comparison
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value
    Pop = 0x01,
    /// Duplicate top value
    Dup = 0x02,
    /// Push null
    Ldnull = 0x03,
    /// Push 32-bit integer (operand: int)
    LdcI4 = 0x04,
    /// Push 64-bit integer (operand: int)
    LdcI8 = 0x05,
    /// Push 64-bit float (operand: float)
    LdcR8 = 0x06,
    /// Push string literal (operand: string)
    Ldstr = 0x07,

    // ===== Arguments & Locals (0x10-0x1F) =====
    /// Load argument (operand: arg)
    Ldarg = 0x10,
    /// Store argument (operand: arg)
    Starg = 0x11,
    /// Load argument address (operand: arg)
    Ldarga = 0x12,
    /// Load local (operand: local)
    Ldloc = 0x13,
    /// Store local (operand: local)
    Stloc = 0x14,
    /// Load local address (operand: local)
    Ldloca = 0x15,

    // ===== Fields (0x20-0x2F) =====
    /// Load instance field (operand: field)
    Ldfld = 0x20,
    /// Store instance field (operand: field)
    Stfld = 0x21,
    /// Load static field (operand: field)
    Ldsfld = 0x22,
    /// Store static field (operand: field)
    Stsfld = 0x23,
    /// Load field address (operand: field)
    Ldflda = 0x24,

    // ===== Calls & Returns (0x30-0x3F) =====
    /// Direct call (operand: method)
    Call = 0x30,
    /// Late-bound call (operand: method)
    Callvirt = 0x31,
    /// Allocate and construct (operand: method)
    Newobj = 0x32,
    /// Return
    Ret = 0x33,
    /// Load function pointer (operand: method)
    Ldftn = 0x34,
    /// Load virtual function pointer (operand: method)
    Ldvirtftn = 0x35,

    // ===== Control Flow (0x40-0x4F) =====
    /// Unconditional branch (operand: branch)
    Br = 0x40,
    /// Branch if true (operand: branch)
    Brtrue = 0x41,
    /// Branch if false (operand: branch)
    Brfalse = 0x42,
    /// Jump table (operand: switch)
    Switch = 0x43,
    /// Throw exception
    Throw = 0x44,

    // ===== Objects & Arrays (0x50-0x5F) =====
    /// Box value type (operand: type)
    Box = 0x50,
    /// Unbox to value (operand: type)
    Unbox = 0x51,
    /// Checked cast (operand: type)
    Castclass = 0x52,
    /// Type test (operand: type)
    Isinst = 0x53,
    /// Load runtime type handle (operand: type)
    Ldtoken = 0x54,
    /// Allocate array (operand: type)
    Newarr = 0x55,
    /// Load array element (operand: type)
    Ldelem = 0x56,
    /// Store array element (operand: type)
    Stelem = 0x57,
    /// Zero-initialize value at address (operand: type)
    Initobj = 0x58,

    // ===== Arithmetic & Comparison (0x60-0x6F) =====
    /// Add
    Add = 0x60,
    /// Subtract
    Sub = 0x61,
    /// Multiply
    Mul = 0x62,
    /// Compare equal
    Ceq = 0x63,
    /// Compare less than
    Clt = 0x64,
    /// Compare greater than
    Cgt = 0x65,
}

impl Opcode {
    /// Convert byte to opcode
    ///
    /// Returns None if the byte does not correspond to a valid opcode.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Ldnull),
            0x04 => Some(Self::LdcI4),
            0x05 => Some(Self::LdcI8),
            0x06 => Some(Self::LdcR8),
            0x07 => Some(Self::Ldstr),

            0x10 => Some(Self::Ldarg),
            0x11 => Some(Self::Starg),
            0x12 => Some(Self::Ldarga),
            0x13 => Some(Self::Ldloc),
            0x14 => Some(Self::Stloc),
            0x15 => Some(Self::Ldloca),

            0x20 => Some(Self::Ldfld),
            0x21 => Some(Self::Stfld),
            0x22 => Some(Self::Ldsfld),
            0x23 => Some(Self::Stsfld),
            0x24 => Some(Self::Ldflda),

            0x30 => Some(Self::Call),
            0x31 => Some(Self::Callvirt),
            0x32 => Some(Self::Newobj),
            0x33 => Some(Self::Ret),
            0x34 => Some(Self::Ldftn),
            0x35 => Some(Self::Ldvirtftn),

            0x40 => Some(Self::Br),
            0x41 => Some(Self::Brtrue),
            0x42 => Some(Self::Brfalse),
            0x43 => Some(Self::Switch),
            0x44 => Some(Self::Throw),

            0x50 => Some(Self::Box),
            0x51 => Some(Self::Unbox),
            0x52 => Some(Self::Castclass),
            0x53 => Some(Self::Isinst),
            0x54 => Some(Self::Ldtoken),
            0x55 => Some(Self::Newarr),
            0x56 => Some(Self::Ldelem),
            0x57 => Some(Self::Stelem),
            0x58 => Some(Self::Initobj),

            0x60 => Some(Self::Add),
            0x61 => Some(Self::Sub),
            0x62 => Some(Self::Mul),
            0x63 => Some(Self::Ceq),
            0x64 => Some(Self::Clt),
            0x65 => Some(Self::Cgt),

            _ => None,
        }
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Operand shape carried by this opcode
    pub fn operand_kind(self) -> OperandKind {
        match self {
            Self::LdcI4 | Self::LdcI8 => OperandKind::Int,
            Self::LdcR8 => OperandKind::Float,
            Self::Ldstr => OperandKind::String,
            Self::Ldarg | Self::Starg | Self::Ldarga => OperandKind::Arg,
            Self::Ldloc | Self::Stloc | Self::Ldloca => OperandKind::Local,
            Self::Ldfld | Self::Stfld | Self::Ldsfld | Self::Stsfld | Self::Ldflda => {
                OperandKind::Field
            }
            Self::Call | Self::Callvirt | Self::Newobj | Self::Ldftn | Self::Ldvirtftn => {
                OperandKind::Method
            }
            Self::Br | Self::Brtrue | Self::Brfalse => OperandKind::Branch,
            Self::Switch => OperandKind::Switch,
            Self::Box
            | Self::Unbox
            | Self::Castclass
            | Self::Isinst
            | Self::Ldtoken
            | Self::Newarr
            | Self::Ldelem
            | Self::Stelem
            | Self::Initobj => OperandKind::Type,
            _ => OperandKind::None,
        }
    }

    /// Check if this opcode transfers control to an instruction index
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Br | Self::Brtrue | Self::Brfalse | Self::Switch)
    }

    /// Check if this opcode invokes a method
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::Callvirt | Self::Newobj)
    }

    /// Check if this opcode reads a field value
    pub fn is_field_load(self) -> bool {
        matches!(self, Self::Ldfld | Self::Ldsfld)
    }

    /// Check if this opcode terminates a basic block
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Br | Self::Switch | Self::Ret | Self::Throw)
    }
}
