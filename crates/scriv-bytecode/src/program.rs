//! The Program binary: header + label/command/argument tables + data.
//!
//! Layout (all multi-byte fields host-endian, guarded by the endian tag):
//!
//! ```text
//! header   {endian: u8, pad[3], cmd_count: i32, arg_count: i32,
//!           label_count: i32, label_off: u32, cmd_off: u32,
//!           arg_off: u32, data_off: u32}                      32 bytes
//! labels   {name_hash: u32, cmd_index: i32}                    8 bytes each
//! cmds     {signature: u32, pair_index: i32,
//!           parent_index: i32, arg_offset: u32}               16 bytes each
//! args     {data_offset: u32}                                  4 bytes each
//! data     raw calc blobs
//! ```
//!
//! Offsets are from the start of the blob. A Program is fully relocatable;
//! loading copies and re-links it against the live tag registry.

/// Header size in bytes (endian byte is padded to 4).
pub const HEADER_SIZE: usize = 32;

/// Sentinel command index of a label that was referenced but never
/// defined.
pub const LABEL_UNRESOLVED: i32 = i32::MIN;

pub const LITTLE_ENDIAN: u8 = 1;
pub const BIG_ENDIAN: u8 = 2;

/// Endian tag of the running host.
pub fn host_endian() -> u8 {
    if cfg!(target_endian = "little") {
        LITTLE_ENDIAN
    } else {
        BIG_ENDIAN
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Label {
    pub name_hash: u32,
    pub cmd_index: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cmd {
    pub signature: u32,
    /// Next command in this command's pair chain, or itself.
    pub pair_index: i32,
    /// Command opening the enclosing pair/child scope, or itself.
    pub parent_index: i32,
    /// First argument slot in the argument table.
    pub arg_offset: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Arg {
    pub data_offset: u32,
}

/// Errors loading a Program blob.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgramError {
    #[error("bad endian: program was compiled on a {found}-endian host")]
    EndianMismatch { found: &'static str },
    #[error("program blob truncated ({0} bytes)")]
    Truncated(usize),
    #[error("program header is inconsistent")]
    BadHeader,
}

/// A compiled program.
#[derive(Clone, Debug, Default)]
pub struct Program {
    pub labels: Vec<Label>,
    pub cmds: Vec<Cmd>,
    pub args: Vec<Arg>,
    pub data: Vec<u8>,
}

impl Program {
    /// Encode to the relocatable binary form, tagged with host endianness.
    pub fn encode(&self) -> Vec<u8> {
        let label_bytes = self.labels.len() * 8;
        let cmd_bytes = self.cmds.len() * 16;
        let arg_bytes = self.args.len() * 4;

        let label_off = HEADER_SIZE as u32;
        let cmd_off = label_off + label_bytes as u32;
        let arg_off = cmd_off + cmd_bytes as u32;
        let data_off = arg_off + arg_bytes as u32;

        let mut out = Vec::with_capacity(data_off as usize + self.data.len());
        out.push(host_endian());
        out.extend_from_slice(&[0u8; 3]);
        out.extend_from_slice(&(self.cmds.len() as i32).to_ne_bytes());
        out.extend_from_slice(&(self.args.len() as i32).to_ne_bytes());
        out.extend_from_slice(&(self.labels.len() as i32).to_ne_bytes());
        out.extend_from_slice(&label_off.to_ne_bytes());
        out.extend_from_slice(&cmd_off.to_ne_bytes());
        out.extend_from_slice(&arg_off.to_ne_bytes());
        out.extend_from_slice(&data_off.to_ne_bytes());

        for label in &self.labels {
            out.extend_from_slice(&label.name_hash.to_ne_bytes());
            out.extend_from_slice(&label.cmd_index.to_ne_bytes());
        }
        for cmd in &self.cmds {
            out.extend_from_slice(&cmd.signature.to_ne_bytes());
            out.extend_from_slice(&cmd.pair_index.to_ne_bytes());
            out.extend_from_slice(&cmd.parent_index.to_ne_bytes());
            out.extend_from_slice(&cmd.arg_offset.to_ne_bytes());
        }
        for arg in &self.args {
            out.extend_from_slice(&arg.data_offset.to_ne_bytes());
        }
        out.extend_from_slice(&self.data);
        out
    }

    /// Decode a blob produced by [`Program::encode`], rejecting programs
    /// saved on a host of the other endianness.
    pub fn decode(blob: &[u8]) -> Result<Program, ProgramError> {
        if blob.len() < HEADER_SIZE {
            return Err(ProgramError::Truncated(blob.len()));
        }
        if blob[0] != host_endian() {
            let found = if blob[0] == LITTLE_ENDIAN {
                "little"
            } else {
                "big"
            };
            return Err(ProgramError::EndianMismatch { found });
        }

        let mut fields = [0u32; 7];
        for (i, field) in fields.iter_mut().enumerate() {
            let at = 4 + i * 4;
            *field = u32::from_ne_bytes(blob[at..at + 4].try_into().unwrap());
        }
        let [cmd_count, arg_count, label_count, label_off, cmd_off, arg_off, data_off] = fields;
        let (cmd_count, arg_count, label_count) =
            (cmd_count as usize, arg_count as usize, label_count as usize);

        let need = |off: u32, len: usize| -> Result<usize, ProgramError> {
            let off = off as usize;
            if off + len > blob.len() {
                return Err(ProgramError::BadHeader);
            }
            Ok(off)
        };

        let mut labels = Vec::with_capacity(label_count);
        let mut at = need(label_off, label_count * 8)?;
        for _ in 0..label_count {
            labels.push(Label {
                name_hash: u32::from_ne_bytes(blob[at..at + 4].try_into().unwrap()),
                cmd_index: i32::from_ne_bytes(blob[at + 4..at + 8].try_into().unwrap()),
            });
            at += 8;
        }

        let mut cmds = Vec::with_capacity(cmd_count);
        let mut at = need(cmd_off, cmd_count * 16)?;
        for _ in 0..cmd_count {
            cmds.push(Cmd {
                signature: u32::from_ne_bytes(blob[at..at + 4].try_into().unwrap()),
                pair_index: i32::from_ne_bytes(blob[at + 4..at + 8].try_into().unwrap()),
                parent_index: i32::from_ne_bytes(blob[at + 8..at + 12].try_into().unwrap()),
                arg_offset: u32::from_ne_bytes(blob[at + 12..at + 16].try_into().unwrap()),
            });
            at += 16;
        }

        let mut args = Vec::with_capacity(arg_count);
        let mut at = need(arg_off, arg_count * 4)?;
        for _ in 0..arg_count {
            args.push(Arg {
                data_offset: u32::from_ne_bytes(blob[at..at + 4].try_into().unwrap()),
            });
            at += 4;
        }

        let data_start = need(data_off, 0)?;
        let data = blob[data_start..].to_vec();

        Ok(Program {
            labels,
            cmds,
            args,
            data,
        })
    }

    /// Argument data offsets for one command: `arg_offset ..` up to the
    /// next command's slots (the table is laid out in command order).
    pub fn arg_data(&self, arg_slot: usize) -> Option<&[u8]> {
        let off = self.args.get(arg_slot)?.data_offset as usize;
        self.data.get(off..)
    }
}
