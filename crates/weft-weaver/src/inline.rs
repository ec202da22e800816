//! Inlined advice blocks
//!
//! Advice bodies are not called from the target; they are copied into it.
//! [`prepare_block`] turns an already resolved advice body into an
//! [`InlineBlock`] whose argument accesses address the target method's
//! frame, and [`compose`] splices a method's blocks into its original body.
//!
//! Inside a block, branch targets and handler bounds are block-relative and
//! local indices count from the block's own first local. A branch to
//! `instructions.len()` continues with whatever follows the block.

use std::cmp::Reverse;
use std::ops::Range;

use weft_metadata::{ExceptionHandler, Instruction, JumpPolicy, MethodBody, Opcode, Operand, TypeSig};

use crate::contribution::BodyEdit;

/// Instructions ready to be spliced into a target body
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InlineBlock {
    /// Instructions; branch targets are block-relative
    pub instructions: Vec<Instruction>,
    /// Locals the block needs, indexed from zero
    pub locals: Vec<TypeSig>,
    /// Exception handlers, block-relative
    pub handlers: Vec<ExceptionHandler>,
    /// Evaluation stack depth the block adds
    pub max_stack: u16,
}

impl InlineBlock {
    /// Block without locals or handlers
    pub fn new(instructions: Vec<Instruction>) -> Self {
        let max_stack = instructions.len().min(u16::MAX as usize) as u16;
        Self {
            instructions,
            locals: Vec::new(),
            handlers: Vec::new(),
            max_stack,
        }
    }

    /// Number of instructions
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the block has no instructions
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }
}

/// How an advice method's frame maps onto the target method's frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBinding {
    /// The advice method is an instance method
    pub advice_has_this: bool,
    /// The target method is an instance method
    pub target_has_this: bool,
    /// Advice parameter receiving the value on top of the stack, and its type
    pub value: Option<(u16, TypeSig)>,
}

impl FrameBinding {
    /// Binding for advice that does not consume a stack value
    pub fn new(advice_has_this: bool, target_has_this: bool) -> Self {
        Self {
            advice_has_this,
            target_has_this,
            value: None,
        }
    }

    /// Bind advice parameter `param` to the value on top of the stack
    pub fn with_value(mut self, param: u16, value_type: TypeSig) -> Self {
        self.value = Some((param, value_type));
        self
    }
}

enum ArgSlot {
    Arg(u16),
    Value,
}

fn map_arg(binding: &FrameBinding, arg: u16) -> ArgSlot {
    let param = if binding.advice_has_this {
        if arg == 0 {
            return ArgSlot::Arg(0);
        }
        arg - 1
    } else {
        arg
    };
    if matches!(&binding.value, Some((value, _)) if *value == param) {
        return ArgSlot::Value;
    }
    ArgSlot::Arg(param + u16::from(binding.target_has_this))
}

/// Build an inlinable block from a resolved advice body
///
/// `ret` becomes a jump past the block. With a value binding the block
/// starts by storing the stack top into a fresh local that stands in for
/// the bound parameter.
pub fn prepare_block(body: &MethodBody, binding: &FrameBinding) -> InlineBlock {
    let mut locals = body.locals.clone();
    let mut prefix = Vec::new();
    let value_local = binding.value.as_ref().map(|(_, value_type)| {
        locals.push(value_type.clone());
        let local = (locals.len() - 1) as u16;
        prefix.push(Instruction::stloc(local));
        local
    });
    let shift = prefix.len() as u32;
    let end = shift + body.instructions.len() as u32;

    let mut instructions = prefix;
    for instr in &body.instructions {
        let rewritten = match (instr.opcode, &instr.operand) {
            (Opcode::Ret, _) => Instruction::branch(Opcode::Br, end),
            (Opcode::Ldarg | Opcode::Starg | Opcode::Ldarga, Operand::Arg(arg)) => {
                match (map_arg(binding, *arg), value_local) {
                    (ArgSlot::Value, Some(local)) => {
                        let opcode = match instr.opcode {
                            Opcode::Ldarg => Opcode::Ldloc,
                            Opcode::Starg => Opcode::Stloc,
                            _ => Opcode::Ldloca,
                        };
                        Instruction::new(opcode, Operand::Local(local))
                    }
                    (ArgSlot::Arg(mapped), _) => Instruction::new(instr.opcode, Operand::Arg(mapped)),
                    (ArgSlot::Value, None) => instr.clone(),
                }
            }
            (_, Operand::Branch(target)) => Instruction::branch(instr.opcode, target + shift),
            (_, Operand::Switch(targets)) => Instruction::new(
                instr.opcode,
                Operand::Switch(targets.iter().map(|target| target + shift).collect()),
            ),
            _ => instr.clone(),
        };
        instructions.push(rewritten);
    }

    let handlers = body
        .handlers
        .iter()
        .map(|handler| ExceptionHandler {
            kind: handler.kind.clone(),
            try_start: handler.try_start + shift,
            try_end: handler.try_end + shift,
            handler_start: handler.handler_start + shift,
            handler_end: handler.handler_end + shift,
        })
        .collect();

    InlineBlock {
        instructions,
        locals,
        handlers,
        max_stack: body.max_stack.saturating_add(1),
    }
}

/// Splice one block into a body before instruction `at`
pub fn splice_block(body: &mut MethodBody, at: usize, block: &InlineBlock, policy: JumpPolicy) {
    if block.is_empty() {
        return;
    }
    let at = at.min(body.instructions.len());
    let base = body.locals.len() as u16;
    body.locals.extend(block.locals.iter().cloned());
    let instructions = block
        .instructions
        .iter()
        .map(|instr| match &instr.operand {
            Operand::Local(local) => Instruction::new(instr.opcode, Operand::Local(local + base)),
            _ => instr.clone(),
        })
        .collect();
    body.splice(at, instructions, policy);
    let offset = at as u32;
    body.handlers.extend(block.handlers.iter().map(|handler| ExceptionHandler {
        kind: handler.kind.clone(),
        try_start: handler.try_start + offset,
        try_end: handler.try_end + offset,
        handler_start: handler.handler_start + offset,
        handler_end: handler.handler_end + offset,
    }));
    body.max_stack = body.max_stack.saturating_add(block.max_stack);
}

/// Blocks already spliced at one index, in body order
struct SplicedRun {
    at: usize,
    len: usize,
    handlers: Range<usize>,
}

/// Apply every edit of one method to a copy of its original body
///
/// Edit indices refer to the original body. Replacements apply in place
/// first; insertions then apply from the highest index down, and blocks
/// sharing an index end up in ascending [`OrderKey`] order. A capturing
/// block only captures jumps from outside the blocks spliced after it at
/// the same index.
///
/// [`OrderKey`]: crate::contribution::OrderKey
pub fn compose(original: &MethodBody, edits: &[&BodyEdit]) -> MethodBody {
    let mut body = original.clone();
    for edit in edits {
        if let BodyEdit::Replace { at, instruction, .. } = edit {
            if let Some(slot) = body.instructions.get_mut(*at) {
                *slot = instruction.clone();
            }
        }
    }
    let mut inserts: Vec<_> = edits
        .iter()
        .filter_map(|edit| match edit {
            BodyEdit::Insert {
                at,
                policy,
                block,
                key,
                ..
            } => Some((*at, *key, *policy, block)),
            BodyEdit::Replace { .. } => None,
        })
        .collect();
    inserts.sort_by_key(|(at, key, _, _)| (Reverse(*at), Reverse(*key)));
    let mut run: Option<SplicedRun> = None;
    for (at, _, policy, block) in inserts {
        let at = at.min(body.instructions.len());
        let (before, handlers_before) = (body.instructions.len(), body.handlers.len());
        splice_block(&mut body, at, block, policy);
        let added = body.instructions.len() - before;

        let mut current = SplicedRun {
            at,
            len: added,
            handlers: handlers_before..body.handlers.len(),
        };
        if let Some(earlier) = run.take().filter(|earlier| earlier.at == at) {
            if policy == JumpPolicy::Capture && added > 0 {
                release_captured(&mut body, &earlier, added);
            }
            current.len += earlier.len;
            current.handlers.start = earlier.handlers.start;
        }
        run = Some(current);
    }
    body
}

/// Point jumps and handlers of `earlier` that targeted its own start, and
/// were left on the index a block of `added` instructions now occupies, back
/// at `earlier`'s start
fn release_captured(body: &mut MethodBody, earlier: &SplicedRun, added: usize) {
    let old_start = earlier.at as u32;
    let new_start = (earlier.at + added) as u32;
    let follow = |target: u32| if target == old_start { new_start } else { target };
    let range = earlier.at + added..earlier.at + added + earlier.len;
    for instr in &mut body.instructions[range] {
        instr.relocate(follow);
    }
    for handler in &mut body.handlers[earlier.handlers.clone()] {
        handler.try_start = follow(handler.try_start);
        handler.handler_start = follow(handler.handler_start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contribution::{MethodKey, OrderKey};
    use crate::item::ItemId;
    use weft_metadata::{HandlerKind, TypeName};

    fn key(slot: u8, time: u8, aspect: usize) -> OrderKey {
        OrderKey {
            slot,
            point: 0,
            time,
            aspect,
            item: ItemId(aspect as u32),
        }
    }

    fn method() -> MethodKey {
        MethodKey {
            ty: TypeName::new("App", "App", "Order"),
            method: 0,
        }
    }

    fn insert(at: usize, policy: JumpPolicy, marker: i32, key: OrderKey) -> BodyEdit {
        BodyEdit::Insert {
            method: method(),
            at,
            policy,
            block: InlineBlock::new(vec![Instruction::ldc_i4(marker), Instruction::simple(Opcode::Pop)]),
            key,
        }
    }

    #[test]
    fn test_ret_becomes_jump_past_block() {
        let advice = MethodBody::new(vec![
            Instruction::ldarg(0),
            Instruction::branch(Opcode::Brfalse, 3),
            Instruction::ret(),
            Instruction::ret(),
        ]);
        let block = prepare_block(&advice, &FrameBinding::new(false, true));
        assert_eq!(block.instructions[0], Instruction::ldarg(1));
        assert_eq!(block.instructions[1].operand, Operand::Branch(3));
        assert_eq!(block.instructions[2], Instruction::branch(Opcode::Br, 4));
        assert_eq!(block.instructions[3], Instruction::branch(Opcode::Br, 4));
    }

    #[test]
    fn test_instance_advice_keeps_this() {
        let advice = MethodBody::new(vec![Instruction::ldarg(0), Instruction::ldarg(1), Instruction::ret()]);
        let block = prepare_block(&advice, &FrameBinding::new(true, true));
        assert_eq!(block.instructions[0], Instruction::ldarg(0));
        assert_eq!(block.instructions[1], Instruction::ldarg(1));
    }

    #[test]
    fn test_value_parameter_becomes_local() {
        let mut advice = MethodBody::new(vec![
            Instruction::ldarg(1),
            Instruction::ldc_i4(1),
            Instruction::simple(Opcode::Add),
            Instruction::ret(),
        ]);
        advice.locals.push(TypeSig::string());
        let binding = FrameBinding::new(false, true).with_value(1, TypeSig::int32());
        let block = prepare_block(&advice, &binding);
        assert_eq!(block.locals, vec![TypeSig::string(), TypeSig::int32()]);
        assert_eq!(block.instructions[0], Instruction::stloc(1));
        assert_eq!(block.instructions[1], Instruction::ldloc(1));
        assert_eq!(block.instructions[4], Instruction::branch(Opcode::Br, 5));
    }

    #[test]
    fn test_compose_orders_blocks_at_same_index() {
        let original = MethodBody::new(vec![Instruction::simple(Opcode::Nop), Instruction::ret()]);
        let late = insert(1, JumpPolicy::Capture, 2, key(1, 1, 0));
        let early = insert(1, JumpPolicy::Capture, 1, key(1, 0, 1));
        let body = compose(&original, &[&late, &early]);
        assert_eq!(body.instructions.len(), 6);
        assert_eq!(body.instructions[1], Instruction::ldc_i4(1));
        assert_eq!(body.instructions[3], Instruction::ldc_i4(2));
        assert_eq!(body.instructions[5].opcode, Opcode::Ret);
    }

    #[test]
    fn test_capture_leaves_later_block_loop_alone() {
        let original = MethodBody::new(vec![Instruction::branch(Opcode::Br, 1), Instruction::ret()]);
        let looping = BodyEdit::Insert {
            method: method(),
            at: 1,
            policy: JumpPolicy::Capture,
            block: InlineBlock::new(vec![Instruction::ldc_i4(9), Instruction::branch(Opcode::Brtrue, 0)]),
            key: key(1, 1, 0),
        };
        let early = insert(1, JumpPolicy::Capture, 1, key(1, 0, 1));
        let body = compose(&original, &[&looping, &early]);
        assert_eq!(body.instructions.len(), 6);
        // outside jumps enter the first block at the index
        assert_eq!(body.instructions[0].operand, Operand::Branch(1));
        assert_eq!(body.instructions[3], Instruction::ldc_i4(9));
        assert_eq!(body.instructions[4].operand, Operand::Branch(3));
    }

    #[test]
    fn test_capture_leaves_later_block_handler_alone() {
        let original = MethodBody::new(vec![Instruction::simple(Opcode::Nop), Instruction::ret()]);
        let mut guarded = InlineBlock::new(vec![
            Instruction::simple(Opcode::Nop),
            Instruction::simple(Opcode::Nop),
            Instruction::simple(Opcode::Nop),
        ]);
        guarded.handlers.push(ExceptionHandler {
            kind: HandlerKind::Finally,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 3,
        });
        let guarded = BodyEdit::Insert {
            method: method(),
            at: 1,
            policy: JumpPolicy::Shift,
            block: guarded,
            key: key(1, 1, 0),
        };
        let early = insert(1, JumpPolicy::Capture, 1, key(1, 0, 1));
        let body = compose(&original, &[&guarded, &early]);
        let handler = &body.handlers[0];
        assert_eq!((handler.try_start, handler.try_end), (3, 5));
        assert_eq!((handler.handler_start, handler.handler_end), (5, 6));
    }

    #[test]
    fn test_compose_keeps_original_indices_meaningful() {
        let original = MethodBody::new(vec![
            Instruction::ldarg(1),
            Instruction::branch(Opcode::Brfalse, 3),
            Instruction::simple(Opcode::Nop),
            Instruction::ret(),
        ]);
        let entry = insert(0, JumpPolicy::Shift, 1, key(1, 0, 0));
        let exit = insert(3, JumpPolicy::Capture, 2, key(1, 1, 0));
        let body = compose(&original, &[&entry, &exit]);
        // jump to the original ret now lands on the exit block
        assert_eq!(body.instructions[3].operand, Operand::Branch(5));
        assert_eq!(body.instructions[5], Instruction::ldc_i4(2));
        assert_eq!(body.instructions[0], Instruction::ldc_i4(1));
    }

    #[test]
    fn test_block_locals_and_handlers_are_rebased() {
        let mut original = MethodBody::new(vec![Instruction::simple(Opcode::Nop), Instruction::ret()]);
        original.locals.push(TypeSig::int32());
        let mut block = InlineBlock::new(vec![
            Instruction::ldloc(0),
            Instruction::simple(Opcode::Pop),
            Instruction::simple(Opcode::Nop),
        ]);
        block.locals.push(TypeSig::string());
        block.handlers.push(ExceptionHandler {
            kind: HandlerKind::Finally,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 3,
        });
        let edit = BodyEdit::Insert {
            method: method(),
            at: 1,
            policy: JumpPolicy::Shift,
            block,
            key: key(1, 0, 0),
        };
        let body = compose(&original, &[&edit]);
        assert_eq!(body.locals, vec![TypeSig::int32(), TypeSig::string()]);
        assert_eq!(body.instructions[1], Instruction::ldloc(1));
        let handler = &body.handlers[0];
        assert_eq!((handler.try_start, handler.handler_end), (1, 4));
    }

    #[test]
    fn test_replace_applies_in_place() {
        let original = MethodBody::new(vec![Instruction::ldarg(0), Instruction::ret()]);
        let edit = BodyEdit::Replace {
            method: method(),
            at: 0,
            instruction: Instruction::ldarg(1),
        };
        let entry = insert(0, JumpPolicy::Shift, 7, key(1, 0, 0));
        let body = compose(&original, &[&entry, &edit]);
        assert_eq!(body.instructions[2], Instruction::ldarg(1));
    }
}
