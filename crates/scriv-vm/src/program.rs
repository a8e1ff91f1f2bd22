//! The loaded program: a Program re-linked for execution.
//!
//! Loading resolves each command's pair chain into a shared span record
//! (the full first/last extent of an if...endif or loop block), keeps the
//! argument table as data offsets, and fingerprints the ordered command
//! signatures so save states can detect whether they are resuming into
//! the same program.

use sha2::{Digest, Sha256};

use scriv_bytecode::program::{LABEL_UNRESOLVED, Label, Program};
use scriv_core::Signature;

use crate::error::RuntimeError;

/// A command re-linked against the live tables.
#[derive(Clone, Copy, Debug)]
pub struct VmCmd {
    pub sig: Signature,
    /// First argument slot in the argument table.
    pub arg_slot: usize,
    /// Next command in this command's pair chain (wraps to the opener).
    pub next_pair: usize,
    /// Command opening the enclosing pair/child scope.
    pub parent: usize,
    /// Index into the pair span table.
    pub pair: u32,
}

/// Full extent of one pair chain.
#[derive(Clone, Copy, Debug)]
pub struct PairSpan {
    pub first: usize,
    pub last: usize,
}

#[derive(Debug)]
pub struct LoadedProgram {
    pub cmds: Vec<VmCmd>,
    pub pairs: Vec<PairSpan>,
    pub labels: Vec<Label>,
    pub arg_offsets: Vec<u32>,
    pub data: Vec<u8>,
    /// 128-bit fingerprint of the ordered command signatures.
    pub fingerprint: [u8; 16],
}

impl LoadedProgram {
    pub fn link(program: &Program) -> Result<Self, RuntimeError> {
        let count = program.cmds.len();
        let clamp = |idx: i32, fallback: usize| -> usize {
            if idx >= 0 && (idx as usize) < count {
                idx as usize
            } else {
                fallback
            }
        };

        let mut cmds: Vec<VmCmd> = program
            .cmds
            .iter()
            .enumerate()
            .map(|(i, cmd)| VmCmd {
                sig: Signature(cmd.signature),
                arg_slot: cmd.arg_offset as usize,
                next_pair: clamp(cmd.pair_index, i),
                parent: clamp(cmd.parent_index, i),
                pair: u32::MAX,
            })
            .collect();

        // Resolve pair chains into shared spans, exactly one per cycle.
        let mut pairs = Vec::new();
        for first in 0..count {
            if cmds[first].pair != u32::MAX {
                continue;
            }
            let id = pairs.len() as u32;
            cmds[first].pair = id;
            let mut last = first;
            let mut steps = 0;
            while cmds[last].next_pair != first {
                last = cmds[last].next_pair;
                cmds[last].pair = id;
                steps += 1;
                if steps > count {
                    return Err(RuntimeError::BadJump(last as i64));
                }
            }
            pairs.push(PairSpan { first, last });
        }

        let mut hasher = Sha256::new();
        for cmd in &program.cmds {
            hasher.update(cmd.signature.to_le_bytes());
        }
        let digest = hasher.finalize();
        let mut fingerprint = [0u8; 16];
        fingerprint.copy_from_slice(&digest[..16]);

        Ok(Self {
            cmds,
            pairs,
            labels: program.labels.clone(),
            arg_offsets: program.args.iter().map(|a| a.data_offset).collect(),
            data: program.data.clone(),
            fingerprint,
        })
    }

    /// Calc blob of one argument of one command.
    pub fn arg_data(&self, cmd: usize, index: usize) -> Option<&[u8]> {
        let slot = self.cmds.get(cmd)?.arg_slot + index;
        let offset = *self.arg_offsets.get(slot)? as usize;
        self.data.get(offset..)
    }

    /// Last registered label with this name hash, resolved or not.
    pub fn label_by_hash(&self, hash: u32) -> Option<&Label> {
        self.labels.iter().rev().find(|l| l.name_hash == hash)
    }

    /// Command index a label resolves to, when defined.
    pub fn label_target(&self, hash: u32) -> Option<usize> {
        self.label_by_hash(hash)
            .filter(|l| l.cmd_index != LABEL_UNRESOLVED && l.cmd_index >= 0)
            .map(|l| l.cmd_index as usize)
    }
}
