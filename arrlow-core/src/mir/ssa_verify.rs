//! Checks on lowered bodies.
//!
//! The builder already rejects unterminated blocks and hands out fresh value
//! ids and effect tokens, so this pass only looks for what lowering itself can
//! get wrong:
//! - a value used outside the statement scope that defined it (checked in
//!   block creation order)
//! - a branch passing the wrong number of block arguments
//! - an `array_merge_store` whose original is not an `array_load` result, or
//!   a loaded array merged twice

use std::collections::HashSet;

use thiserror::Error;

use super::ssa::{BlockId, FuncBody, InstKind, Terminator, ValueId};

#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    #[error("{value} used in {block} before its definition")]
    UseBeforeDef { value: ValueId, block: BlockId },

    #[error("branch from {from} to {to} passes {got} args, but the block expects {expected}")]
    BlockArgCountMismatch {
        from: BlockId,
        to: BlockId,
        expected: usize,
        got: usize,
    },

    #[error("array_merge_store in {block} merges {value}, which is not an array_load")]
    MergeWithoutLoad { value: ValueId, block: BlockId },

    #[error("loaded array {value} merged more than once")]
    DuplicateMerge { value: ValueId },
}

/// Verify a lowered body, collecting every violation.
pub fn verify_func(body: &FuncBody) -> Result<(), Vec<VerifyError>> {
    let mut defined: HashSet<ValueId> = body.params.iter().map(|(v, _, _)| *v).collect();
    let mut loads = HashSet::new();
    let mut merged = HashSet::new();
    let mut errors = Vec::new();

    for (idx, block) in body.blocks.iter().enumerate() {
        let block_id = BlockId(idx as u32);
        defined.extend(block.params.iter().map(|p| p.value));

        for &inst_id in &block.insts {
            let inst = body.get_inst(inst_id);
            for value in inst.kind.operands() {
                if !defined.contains(&value) {
                    errors.push(VerifyError::UseBeforeDef { value, block: block_id });
                }
            }
            match &inst.kind {
                InstKind::ArrayLoad { .. } => loads.extend(inst.result),
                InstKind::ArrayMergeStore { original, .. } => {
                    if !loads.contains(original) {
                        errors.push(VerifyError::MergeWithoutLoad {
                            value: *original,
                            block: block_id,
                        });
                    } else if !merged.insert(*original) {
                        errors.push(VerifyError::DuplicateMerge { value: *original });
                    }
                }
                _ => {}
            }
            defined.extend(inst.result);
        }

        let mut uses = Vec::new();
        let mut edges: Vec<(BlockId, &[ValueId])> = Vec::new();
        match &block.terminator {
            Some(Terminator::Branch { target, args }) => edges.push((*target, args.as_slice())),
            Some(Terminator::CondBranch {
                cond,
                then_target,
                then_args,
                else_target,
                else_args,
            }) => {
                uses.push(*cond);
                edges.push((*then_target, then_args.as_slice()));
                edges.push((*else_target, else_args.as_slice()));
            }
            Some(Terminator::Return(value)) => uses.push(*value),
            Some(Terminator::ReturnUnit | Terminator::Unreachable) | None => {}
        }
        for (to, args) in edges {
            uses.extend_from_slice(args);
            let expected = body.get_block(to).params.len();
            if args.len() != expected {
                errors.push(VerifyError::BlockArgCountMismatch {
                    from: block_id,
                    to,
                    expected,
                    got: args.len(),
                });
            }
        }
        for value in uses {
            if !defined.contains(&value) {
                errors.push(VerifyError::UseBeforeDef { value, block: block_id });
            }
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::ssa_builder::FuncBuilder;
    use crate::types;

    #[test]
    fn test_use_before_def() {
        let mut builder = FuncBuilder::new("bad", vec![], types::i32());
        builder.terminate(Terminator::Return(ValueId(999))).unwrap();

        let errors = verify_func(&builder.finish().unwrap()).unwrap_err();
        assert!(matches!(errors[0], VerifyError::UseBeforeDef { .. }));
    }

    #[test]
    fn test_block_arg_count_mismatch() {
        let mut builder = FuncBuilder::new("bad", vec![], types::unit());
        let (target, _) = builder.create_block_with_params(vec![types::i32()]);
        builder.branch(target, vec![]).unwrap();
        builder.switch_to_block(target).unwrap();
        builder.terminate(Terminator::ReturnUnit).unwrap();

        let errors = verify_func(&builder.finish().unwrap()).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, VerifyError::BlockArgCountMismatch { expected: 1, got: 0, .. })));
    }

    #[test]
    fn test_merge_requires_load() {
        let arr_ty = types::array_value(1, types::i32());
        let mut builder = FuncBuilder::new(
            "bad_merge",
            vec![
                (types::reference(types::i32()), "a".to_string()),
                (arr_ty.clone(), "v".to_string()),
            ],
            types::unit(),
        );
        let a = builder.get_param(0);
        let v = builder.get_param(1);
        builder.push_array_merge_store(v, v, a, None).unwrap();
        builder.terminate(Terminator::ReturnUnit).unwrap();

        let errors = verify_func(&builder.finish().unwrap()).unwrap_err();
        assert!(matches!(errors[0], VerifyError::MergeWithoutLoad { .. }));
        assert!(errors[0].to_string().contains("not an array_load"));
    }

    #[test]
    fn test_duplicate_merge_rejected() {
        let arr_ty = types::array_value(1, types::i32());
        let mut builder = FuncBuilder::new(
            "twice",
            vec![(types::reference(types::i32()), "a".to_string())],
            types::unit(),
        );
        let a = builder.get_param(0);
        let n = builder.push_index(4).unwrap();
        let shape = builder.push_shape(vec![n]).unwrap();
        let loaded = builder.push_array_load(a, Some(shape), arr_ty).unwrap();
        builder.push_array_merge_store(loaded, loaded, a, Some(shape)).unwrap();
        builder.push_array_merge_store(loaded, loaded, a, Some(shape)).unwrap();
        builder.terminate(Terminator::ReturnUnit).unwrap();

        let errors = verify_func(&builder.finish().unwrap()).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], VerifyError::DuplicateMerge { .. }));
    }
}
