//! Serializable program summaries for tooling.

use serde::Serialize;

use crate::opcode::CalcOp;
use crate::program::{LABEL_UNRESOLVED, Program};

/// Flat summary of a compiled program, for the CLI `dump` command.
#[derive(Debug, Serialize)]
pub struct ProgramDump {
    pub cmd_count: usize,
    pub arg_count: usize,
    pub label_count: usize,
    pub data_bytes: usize,
    pub labels: Vec<LabelDump>,
    pub cmds: Vec<CmdDump>,
}

#[derive(Debug, Serialize)]
pub struct LabelDump {
    pub name_hash: String,
    pub cmd_index: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CmdDump {
    pub index: usize,
    pub signature: String,
    pub pair_index: i32,
    pub parent_index: i32,
    pub arg_offset: u32,
    /// Opcode mnemonics of the first argument blob, when present.
    pub first_arg_ops: Vec<String>,
}

/// Summarize a program.
pub fn dump(program: &Program) -> ProgramDump {
    let labels = program
        .labels
        .iter()
        .map(|l| LabelDump {
            name_hash: format!("{:08x}", l.name_hash),
            cmd_index: (l.cmd_index != LABEL_UNRESOLVED).then_some(l.cmd_index),
        })
        .collect();

    let cmds = program
        .cmds
        .iter()
        .enumerate()
        .map(|(index, cmd)| CmdDump {
            index,
            signature: format!("{:08x}", cmd.signature),
            pair_index: cmd.pair_index,
            parent_index: cmd.parent_index,
            arg_offset: cmd.arg_offset,
            first_arg_ops: arg_ops(program, cmd.arg_offset as usize),
        })
        .collect();

    ProgramDump {
        cmd_count: program.cmds.len(),
        arg_count: program.args.len(),
        label_count: program.labels.len(),
        data_bytes: program.data.len(),
        labels,
        cmds,
    }
}

fn arg_ops(program: &Program, arg_slot: usize) -> Vec<String> {
    let Some(blob) = program.arg_data(arg_slot) else {
        return Vec::new();
    };
    let mut cursor = crate::calcio::CalcCursor::new(blob);
    let mut ops = Vec::new();
    loop {
        let Ok(op) = cursor.next_op() else {
            ops.push("?".to_owned());
            break;
        };
        ops.push(format!("{op:?}"));
        match op {
            CalcOp::End => break,
            CalcOp::Push => {
                if cursor.read_value().is_err() {
                    ops.push("?".to_owned());
                    break;
                }
            }
            _ => {}
        }
    }
    ops
}
