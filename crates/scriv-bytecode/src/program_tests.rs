//! Tests for the Program wire format.

use crate::program::{
    Arg, BIG_ENDIAN, Cmd, Label, LITTLE_ENDIAN, Program, ProgramError, host_endian,
};

fn sample() -> Program {
    Program {
        labels: vec![Label {
            name_hash: 0xdead_beef,
            cmd_index: 2,
        }],
        cmds: vec![
            Cmd {
                signature: 0x1111_1111,
                pair_index: 0,
                parent_index: 0,
                arg_offset: 0,
            },
            Cmd {
                signature: 0x2222_2222,
                pair_index: 1,
                parent_index: 1,
                arg_offset: 1,
            },
        ],
        args: vec![Arg { data_offset: 0 }, Arg { data_offset: 8 }],
        data: vec![1, 2, 3, 4, 5, 6, 7, 8, 9],
    }
}

#[test]
fn encode_decode_roundtrip() {
    let program = sample();
    let blob = program.encode();
    let back = Program::decode(&blob).unwrap();

    assert_eq!(back.labels, program.labels);
    assert_eq!(back.cmds, program.cmds);
    assert_eq!(back.args, program.args);
    assert_eq!(back.data, program.data);
}

#[test]
fn endian_mismatch_is_fatal() {
    let mut blob = sample().encode();
    blob[0] = if host_endian() == LITTLE_ENDIAN {
        BIG_ENDIAN
    } else {
        LITTLE_ENDIAN
    };
    assert!(matches!(
        Program::decode(&blob),
        Err(ProgramError::EndianMismatch { .. })
    ));
}

#[test]
fn truncated_blob_is_rejected() {
    let blob = sample().encode();
    assert!(matches!(
        Program::decode(&blob[..16]),
        Err(ProgramError::Truncated(16))
    ));
}

#[test]
fn empty_program_roundtrips() {
    let blob = Program::default().encode();
    let back = Program::decode(&blob).unwrap();
    assert!(back.cmds.is_empty());
    assert!(back.data.is_empty());
}
