//! Method bodies
//!
//! Branch operands and exception handler bounds are instruction indices, so
//! splicing a block into a body has to relocate them. [`MethodBody::splice`]
//! does that for the two relocation policies the weaver needs.

use crate::encoder::{Decode, DecodeError, Encode, MetadataReader, MetadataWriter};
use crate::opcode::Opcode;
use crate::signature::{FieldRef, MethodRef, TypeSig};

/// An instruction operand
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Integer immediate
    Int(i64),
    /// Float immediate
    Float(f64),
    /// String literal
    String(String),
    /// Type signature
    Type(TypeSig),
    /// Field reference
    Field(FieldRef),
    /// Method reference
    Method(MethodRef),
    /// Branch target index
    Branch(u32),
    /// Jump table target indices
    Switch(Vec<u32>),
    /// Local variable index
    Local(u16),
    /// Argument index (0 is `this` for instance methods)
    Arg(u16),
}

impl Operand {
    /// Method operand
    pub fn as_method(&self) -> Option<&MethodRef> {
        match self {
            Operand::Method(method) => Some(method),
            _ => None,
        }
    }

    /// Field operand
    pub fn as_field(&self) -> Option<&FieldRef> {
        match self {
            Operand::Field(field) => Some(field),
            _ => None,
        }
    }

    /// Type operand
    pub fn as_type(&self) -> Option<&TypeSig> {
        match self {
            Operand::Type(sig) => Some(sig),
            _ => None,
        }
    }
}

/// A single instruction
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Opcode
    pub opcode: Opcode,
    /// Operand
    pub operand: Operand,
}

impl Instruction {
    /// Instruction with an explicit operand
    pub fn new(opcode: Opcode, operand: Operand) -> Self {
        Self { opcode, operand }
    }

    /// Instruction without operand
    pub fn simple(opcode: Opcode) -> Self {
        Self::new(opcode, Operand::None)
    }

    /// Branch to an instruction index
    pub fn branch(opcode: Opcode, target: u32) -> Self {
        Self::new(opcode, Operand::Branch(target))
    }

    /// `call method`
    pub fn call(method: MethodRef) -> Self {
        Self::new(Opcode::Call, Operand::Method(method))
    }

    /// `callvirt method`
    pub fn callvirt(method: MethodRef) -> Self {
        Self::new(Opcode::Callvirt, Operand::Method(method))
    }

    /// `ldarg index`
    pub fn ldarg(index: u16) -> Self {
        Self::new(Opcode::Ldarg, Operand::Arg(index))
    }

    /// `ldloc index`
    pub fn ldloc(index: u16) -> Self {
        Self::new(Opcode::Ldloc, Operand::Local(index))
    }

    /// `stloc index`
    pub fn stloc(index: u16) -> Self {
        Self::new(Opcode::Stloc, Operand::Local(index))
    }

    /// `ldc.i4 value`
    pub fn ldc_i4(value: i32) -> Self {
        Self::new(Opcode::LdcI4, Operand::Int(value as i64))
    }

    /// `ldstr value`
    pub fn ldstr(value: impl Into<String>) -> Self {
        Self::new(Opcode::Ldstr, Operand::String(value.into()))
    }

    /// `ldfld field`
    pub fn ldfld(field: FieldRef) -> Self {
        Self::new(Opcode::Ldfld, Operand::Field(field))
    }

    /// `stfld field`
    pub fn stfld(field: FieldRef) -> Self {
        Self::new(Opcode::Stfld, Operand::Field(field))
    }

    /// `ret`
    pub fn ret() -> Self {
        Self::simple(Opcode::Ret)
    }

    /// Branch targets of this instruction
    pub fn targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::Switch(targets) => targets.clone(),
            _ => Vec::new(),
        }
    }

    /// Map every branch target through `relocate`
    pub fn relocate(&mut self, relocate: impl Fn(u32) -> u32) {
        match &mut self.operand {
            Operand::Branch(target) => *target = relocate(*target),
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = relocate(*target);
                }
            }
            _ => {}
        }
    }
}

/// Kind of exception handler
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerKind {
    /// Catch clause for the given exception type
    Catch(TypeSig),
    /// Finally clause
    Finally,
}

/// An exception handling region
///
/// Bounds are instruction indices; ends are exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Handler kind
    pub kind: HandlerKind,
    /// First protected instruction
    pub try_start: u32,
    /// End of the protected range
    pub try_end: u32,
    /// First handler instruction
    pub handler_start: u32,
    /// End of the handler range
    pub handler_end: u32,
}

/// How existing jump targets react to a spliced block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpPolicy {
    /// Jumps to the insertion index keep targeting the original instruction
    /// (the block is skipped by them)
    Shift,
    /// Jumps to the insertion index now target the start of the block
    Capture,
}

/// A method body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodBody {
    /// Maximum evaluation stack depth
    pub max_stack: u16,
    /// Zero-initialize locals
    pub init_locals: bool,
    /// Local variable types
    pub locals: Vec<TypeSig>,
    /// Instructions
    pub instructions: Vec<Instruction>,
    /// Exception handlers
    pub handlers: Vec<ExceptionHandler>,
}

impl MethodBody {
    /// Body with the given instructions and no locals
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            max_stack: 8,
            init_locals: true,
            locals: Vec::new(),
            instructions,
            handlers: Vec::new(),
        }
    }

    /// Append a local and return its index
    pub fn add_local(&mut self, local_type: TypeSig) -> u16 {
        self.locals.push(local_type);
        (self.locals.len() - 1) as u16
    }

    /// Indices of every `ret` instruction
    pub fn returns(&self) -> Vec<usize> {
        self.instructions
            .iter()
            .enumerate()
            .filter(|(_, instr)| instr.opcode == Opcode::Ret)
            .map(|(index, _)| index)
            .collect()
    }

    /// Index of the first constructor chaining call (`call .ctor`)
    pub fn find_base_constructor_call(&self) -> Option<usize> {
        self.instructions.iter().position(|instr| {
            instr.opcode == Opcode::Call
                && instr
                    .operand
                    .as_method()
                    .map(MethodRef::is_constructor)
                    .unwrap_or(false)
        })
    }

    /// Insert `block` before the instruction at `at`.
    ///
    /// Branch targets inside `block` are relative to the block; a target equal
    /// to `block.len()` continues with the instruction originally at `at`.
    /// Existing branch targets and handler bounds are relocated according to
    /// `policy`.
    pub fn splice(&mut self, at: usize, mut block: Vec<Instruction>, policy: JumpPolicy) {
        let at = at.min(self.instructions.len()) as u32;
        let len = block.len() as u32;
        if len == 0 {
            return;
        }

        let moves_start = |target: u32| match policy {
            JumpPolicy::Shift => target >= at,
            JumpPolicy::Capture => target > at,
        };
        let relocate = |target: u32| if moves_start(target) { target + len } else { target };

        for instr in &mut self.instructions {
            instr.relocate(relocate);
        }
        for handler in &mut self.handlers {
            handler.try_start = relocate(handler.try_start);
            handler.handler_start = relocate(handler.handler_start);
            if handler.try_end > at {
                handler.try_end += len;
            }
            if handler.handler_end > at {
                handler.handler_end += len;
            }
        }
        for instr in &mut block {
            instr.relocate(|target| target + at);
        }

        let tail = self.instructions.split_off(at as usize);
        self.instructions.extend(block);
        self.instructions.extend(tail);
    }
}

// ============================================================================
// Encoding
// ============================================================================

impl Encode for Operand {
    fn encode(&self, writer: &mut MetadataWriter) {
        match self {
            Operand::None => writer.emit_u8(0),
            Operand::Int(value) => {
                writer.emit_u8(1);
                writer.emit_i64(*value);
            }
            Operand::Float(value) => {
                writer.emit_u8(2);
                writer.emit_f64(*value);
            }
            Operand::String(value) => {
                writer.emit_u8(3);
                writer.emit_str(value);
            }
            Operand::Type(sig) => {
                writer.emit_u8(4);
                sig.encode(writer);
            }
            Operand::Field(field) => {
                writer.emit_u8(5);
                field.encode(writer);
            }
            Operand::Method(method) => {
                writer.emit_u8(6);
                method.encode(writer);
            }
            Operand::Branch(target) => {
                writer.emit_u8(7);
                writer.emit_u32(*target);
            }
            Operand::Switch(targets) => {
                writer.emit_u8(8);
                writer.emit_u32(targets.len() as u32);
                for target in targets {
                    writer.emit_u32(*target);
                }
            }
            Operand::Local(index) => {
                writer.emit_u8(9);
                writer.emit_u16(*index);
            }
            Operand::Arg(index) => {
                writer.emit_u8(10);
                writer.emit_u16(*index);
            }
        }
    }
}

impl Decode for Operand {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(Operand::None),
            1 => Ok(Operand::Int(reader.read_i64()?)),
            2 => Ok(Operand::Float(reader.read_f64()?)),
            3 => Ok(Operand::String(reader.read_string()?)),
            4 => Ok(Operand::Type(Decode::decode(reader)?)),
            5 => Ok(Operand::Field(Decode::decode(reader)?)),
            6 => Ok(Operand::Method(Decode::decode(reader)?)),
            7 => Ok(Operand::Branch(reader.read_u32()?)),
            8 => {
                let count = reader.read_u32()? as usize;
                let mut targets = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    targets.push(reader.read_u32()?);
                }
                Ok(Operand::Switch(targets))
            }
            9 => Ok(Operand::Local(reader.read_u16()?)),
            10 => Ok(Operand::Arg(reader.read_u16()?)),
            tag => Err(DecodeError::InvalidTag {
                kind: "operand",
                tag,
                offset,
            }),
        }
    }
}

impl Encode for Instruction {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_u8(self.opcode.to_u8());
        self.operand.encode(writer);
    }
}

impl Decode for Instruction {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;
        Ok(Self {
            opcode,
            operand: Operand::decode(reader)?,
        })
    }
}

impl Encode for ExceptionHandler {
    fn encode(&self, writer: &mut MetadataWriter) {
        match &self.kind {
            HandlerKind::Catch(sig) => {
                writer.emit_u8(0);
                sig.encode(writer);
            }
            HandlerKind::Finally => writer.emit_u8(1),
        }
        writer.emit_u32(self.try_start);
        writer.emit_u32(self.try_end);
        writer.emit_u32(self.handler_start);
        writer.emit_u32(self.handler_end);
    }
}

impl Decode for ExceptionHandler {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let kind = match reader.read_u8()? {
            0 => HandlerKind::Catch(Decode::decode(reader)?),
            1 => HandlerKind::Finally,
            tag => {
                return Err(DecodeError::InvalidTag {
                    kind: "exception handler",
                    tag,
                    offset,
                })
            }
        };
        Ok(Self {
            kind,
            try_start: reader.read_u32()?,
            try_end: reader.read_u32()?,
            handler_start: reader.read_u32()?,
            handler_end: reader.read_u32()?,
        })
    }
}

impl Encode for MethodBody {
    fn encode(&self, writer: &mut MetadataWriter) {
        writer.emit_u16(self.max_stack);
        writer.emit_bool(self.init_locals);
        self.locals.encode(writer);
        self.instructions.encode(writer);
        self.handlers.encode(writer);
    }
}

impl Decode for MethodBody {
    fn decode(reader: &mut MetadataReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            max_stack: reader.read_u16()?,
            init_locals: reader.read_bool()?,
            locals: Decode::decode(reader)?,
            instructions: Decode::decode(reader)?,
            handlers: Decode::decode(reader)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `0: ldarg.1; 1: brfalse 3; 2: nop; 3: ret`
    fn looping_body() -> MethodBody {
        MethodBody::new(vec![
            Instruction::ldarg(1),
            Instruction::branch(Opcode::Brfalse, 3),
            Instruction::simple(Opcode::Nop),
            Instruction::ret(),
        ])
    }

    #[test]
    fn test_splice_shift_keeps_jump_on_original() {
        let mut body = looping_body();
        body.splice(3, vec![Instruction::simple(Opcode::Pop)], JumpPolicy::Shift);
        assert_eq!(body.instructions.len(), 5);
        assert_eq!(body.instructions[1].operand, Operand::Branch(4));
        assert_eq!(body.instructions[4].opcode, Opcode::Ret);
    }

    #[test]
    fn test_splice_capture_redirects_jump_to_block() {
        let mut body = looping_body();
        body.splice(3, vec![Instruction::simple(Opcode::Pop)], JumpPolicy::Capture);
        assert_eq!(body.instructions[1].operand, Operand::Branch(3));
        assert_eq!(body.instructions[3].opcode, Opcode::Pop);
    }

    #[test]
    fn test_splice_relocates_block_branches() {
        let mut body = looping_body();
        let block = vec![
            Instruction::branch(Opcode::Br, 2),
            Instruction::simple(Opcode::Nop),
        ];
        body.splice(2, block, JumpPolicy::Shift);
        // block-relative target 2 is the instruction originally at index 2
        assert_eq!(body.instructions[2].operand, Operand::Branch(4));
        assert_eq!(body.instructions[4].opcode, Opcode::Nop);
        assert_eq!(body.instructions[1].operand, Operand::Branch(5));
    }

    #[test]
    fn test_splice_relocates_handlers() {
        let mut body = looping_body();
        body.handlers.push(ExceptionHandler {
            kind: HandlerKind::Finally,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 3,
        });
        body.splice(1, vec![Instruction::simple(Opcode::Nop)], JumpPolicy::Shift);
        let handler = &body.handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (0, 3));
        assert_eq!((handler.handler_start, handler.handler_end), (3, 4));
    }

    #[test]
    fn test_find_base_constructor_call() {
        let ctor = MethodRef {
            declaring: TypeSig::object(),
            name: ".ctor".to_string(),
            has_this: true,
            return_type: TypeSig::void(),
            params: Vec::new(),
            generic_arity: 0,
            generic_args: Vec::new(),
        };
        let body = MethodBody::new(vec![
            Instruction::ldarg(0),
            Instruction::call(ctor),
            Instruction::ret(),
        ]);
        assert_eq!(body.find_base_constructor_call(), Some(1));
        assert_eq!(body.returns(), vec![2]);
    }

    #[test]
    fn test_invalid_opcode_rejected() {
        let bytes = [0xeeu8, 0];
        let result = Instruction::decode(&mut MetadataReader::new(&bytes));
        assert!(matches!(result, Err(DecodeError::InvalidOpcode(0xee, 0))));
    }
}
