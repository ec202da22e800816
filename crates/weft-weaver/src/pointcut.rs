//! Pointcut evaluation boundary
//!
//! The query language itself lives outside the weaver. The weaver only
//! needs a [`PointcutEvaluator`] turning a [`Pointcut`] into join points;
//! [`PatternEvaluator`] is a glob-based implementation.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use tracing::warn;
use weft_metadata::{MethodDef, Opcode, Operand, TypeDef};

use crate::joinpoint::{member_name, Joinpoint, JoinpointContainer, MemberId};

/// A pointcut expression
///
/// Every string is a glob pattern. Type patterns match `Ns.Outer/Inner`;
/// call and field patterns match `Ns.Type::name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pointcut {
    /// Whole modules
    Assemblies {
        /// Module name pattern
        modules: String,
    },
    /// Types
    Types {
        /// Type name pattern
        types: String,
    },
    /// Members of types
    Members {
        /// Type name pattern
        types: String,
        /// Member name pattern
        members: String,
    },
    /// Call instructions (`call`, `callvirt`, `newobj`)
    Calls {
        /// Enclosing type pattern
        types: String,
        /// Enclosing method pattern
        members: String,
        /// Callee pattern
        callee: String,
    },
    /// Field loads (`ldfld`, `ldsfld`)
    FieldAccesses {
        /// Enclosing type pattern
        types: String,
        /// Enclosing method pattern
        members: String,
        /// Field pattern
        field: String,
    },
}

/// Turns a pointcut into concrete join points
pub trait PointcutEvaluator {
    /// Join points matched by `pointcut`, in a deterministic order
    fn evaluate(&self, pointcut: &Pointcut, container: &JoinpointContainer<'_>) -> Vec<Joinpoint>;
}

/// Glob-pattern evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternEvaluator;

impl PatternEvaluator {
    /// Create an evaluator
    pub fn new() -> Self {
        Self
    }
}

fn compile(pattern: &str) -> Option<Pattern> {
    match Pattern::new(pattern) {
        Ok(compiled) => Some(compiled),
        Err(error) => {
            warn!(pattern, %error, "invalid pointcut pattern");
            None
        }
    }
}

impl PointcutEvaluator for PatternEvaluator {
    fn evaluate(&self, pointcut: &Pointcut, container: &JoinpointContainer<'_>) -> Vec<Joinpoint> {
        match pointcut {
            Pointcut::Assemblies { modules } => {
                let Some(pattern) = compile(modules) else {
                    return Vec::new();
                };
                container
                    .modules()
                    .filter(|module| pattern.matches(module))
                    .map(|module| Joinpoint::Assembly {
                        module: module.to_string(),
                    })
                    .collect()
            }
            Pointcut::Types { types } => {
                let Some(pattern) = compile(types) else {
                    return Vec::new();
                };
                container
                    .types()
                    .into_iter()
                    .filter(|(name, _)| pattern.matches(&name.full_name()))
                    .map(|(ty, _)| Joinpoint::Type { ty })
                    .collect()
            }
            Pointcut::Members { types, members } => {
                let (Some(type_pattern), Some(member_pattern)) = (compile(types), compile(members))
                else {
                    return Vec::new();
                };
                let mut result = Vec::new();
                for (ty, def) in container.types() {
                    if !type_pattern.matches(&ty.full_name()) {
                        continue;
                    }
                    for member in container.members(def) {
                        let matched = member_name(def, member)
                            .map(|name| member_pattern.matches(name))
                            .unwrap_or(false);
                        if matched {
                            result.push(Joinpoint::Member {
                                ty: ty.clone(),
                                member,
                            });
                        }
                    }
                }
                result
            }
            Pointcut::Calls {
                types,
                members,
                callee,
            } => instruction_joinpoints(container, types, members, callee, |opcode, operand| {
                if !opcode.is_call() {
                    return None;
                }
                operand
                    .as_method()
                    .map(|method| format!("{}::{}", method.declaring, method.name))
            }),
            Pointcut::FieldAccesses {
                types,
                members,
                field,
            } => instruction_joinpoints(container, types, members, field, |opcode, operand| {
                if !opcode.is_field_load() {
                    return None;
                }
                operand
                    .as_field()
                    .map(|field| format!("{}::{}", field.declaring, field.name))
            }),
        }
    }
}

fn instruction_joinpoints(
    container: &JoinpointContainer<'_>,
    types: &str,
    members: &str,
    operand_pattern: &str,
    describe: impl Fn(Opcode, &Operand) -> Option<String>,
) -> Vec<Joinpoint> {
    let (Some(type_pattern), Some(member_pattern), Some(operand_pattern)) =
        (compile(types), compile(members), compile(operand_pattern))
    else {
        return Vec::new();
    };
    let mut result = Vec::new();
    for (ty, def) in container.types() {
        if !type_pattern.matches(&ty.full_name()) {
            continue;
        }
        for (index, method) in methods_matching(def, container, &member_pattern) {
            for (offset, instr) in container.instructions(method) {
                let matched = describe(instr.opcode, &instr.operand)
                    .map(|text| operand_pattern.matches(&text))
                    .unwrap_or(false);
                if matched {
                    result.push(Joinpoint::Instruction {
                        ty: ty.clone(),
                        method: index,
                        offset,
                    });
                }
            }
        }
    }
    result
}

fn methods_matching<'a>(
    def: &'a TypeDef,
    container: &JoinpointContainer<'_>,
    pattern: &Pattern,
) -> Vec<(usize, &'a MethodDef)> {
    container
        .members(def)
        .into_iter()
        .filter_map(|member| match member {
            MemberId::Method(index) => def.methods.get(index).map(|method| (index, method)),
            _ => None,
        })
        .filter(|(_, method)| pattern.matches(&method.name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_metadata::{
        Instruction, MethodBody, MethodRef, Module, ModuleSet, TypeName, TypeSig,
    };

    fn sample_set() -> ModuleSet {
        let log = MethodRef {
            declaring: TypeSig::Named(TypeName::new("Lib", "Lib", "Log")),
            name: "Write".to_string(),
            has_this: false,
            return_type: TypeSig::void(),
            params: Vec::new(),
            generic_arity: 0,
            generic_args: Vec::new(),
        };
        let mut order = TypeDef::new("App", "Order", 0);
        order.methods.push(
            MethodDef::new("Add", 0, TypeSig::void(), Vec::new()).with_body(MethodBody::new(vec![
                Instruction::call(log),
                Instruction::ret(),
            ])),
        );
        order.methods.push(MethodDef::new("Remove", 0, TypeSig::void(), Vec::new()));
        let mut module = Module::new("App");
        module.types.push(order);
        module.types.push(TypeDef::new("App.Util", "Helper", 0));
        let mut set = ModuleSet::new();
        set.insert(module);
        set
    }

    #[test]
    fn test_types_pattern() {
        let set = sample_set();
        let container = JoinpointContainer::new(&set, vec!["App".to_string()]);
        let matched = PatternEvaluator.evaluate(
            &Pointcut::Types {
                types: "App.*".to_string(),
            },
            &container,
        );
        assert_eq!(matched.len(), 2);
        let matched = PatternEvaluator.evaluate(
            &Pointcut::Types {
                types: "App.Order".to_string(),
            },
            &container,
        );
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_members_pattern() {
        let set = sample_set();
        let container = JoinpointContainer::new(&set, vec!["App".to_string()]);
        let matched = PatternEvaluator.evaluate(
            &Pointcut::Members {
                types: "App.Order".to_string(),
                members: "R*".to_string(),
            },
            &container,
        );
        assert_eq!(
            matched,
            vec![Joinpoint::Member {
                ty: TypeName::new("App", "App", "Order"),
                member: MemberId::Method(1),
            }]
        );
    }

    #[test]
    fn test_calls_pattern() {
        let set = sample_set();
        let container = JoinpointContainer::new(&set, vec!["App".to_string()]);
        let matched = PatternEvaluator.evaluate(
            &Pointcut::Calls {
                types: "*".to_string(),
                members: "*".to_string(),
                callee: "Lib.Log::*".to_string(),
            },
            &container,
        );
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].offset(), Some(0));
    }

    #[test]
    fn test_invalid_pattern_matches_nothing() {
        let set = sample_set();
        let container = JoinpointContainer::new(&set, vec!["App".to_string()]);
        let matched = PatternEvaluator.evaluate(
            &Pointcut::Assemblies {
                modules: "[".to_string(),
            },
            &container,
        );
        assert!(matched.is_empty());
    }
}
