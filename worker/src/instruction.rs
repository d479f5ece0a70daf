//! Query script instruction set, grounded on the opcode list in
//! `original_source/worker/src/query_interpreter/query_interpreter.c` (the
//! original's decoder there only handles `CREATE`/`TRUNCATE` and hardcodes
//! its file name; this decoder implements the full set described in §4.2).

use crate::error::{Result, WorkerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Create { file: String, tag: String },
    Truncate { file: String, tag: String, size: u32 },
    Write { file: String, tag: String, base: u64, data: Vec<u8> },
    Read { file: String, tag: String, base: u64, size: u32 },
    Tag { src_file: String, src_tag: String, dst_file: String, dst_tag: String },
    Commit { file: String, tag: String },
    Flush { file: String, tag: String },
    Delete { file: String, tag: String },
    End,
}

/// Parses one script line: space-separated tokens, first token is the
/// opcode name (case-insensitive). `WRITE`'s data token is taken verbatim,
/// so it may not itself contain a space (§4.2).
pub fn decode(line_number: u32, line: &str) -> Result<Instruction> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let malformed = || WorkerError::MalformedInstruction {
        line: line_number,
        text: line.to_string(),
    };

    let Some((opcode, args)) = tokens.split_first() else {
        return Err(malformed());
    };

    match opcode.to_ascii_uppercase().as_str() {
        "CREATE" => match args {
            [file, tag] => Ok(Instruction::Create { file: file.to_string(), tag: tag.to_string() }),
            _ => Err(malformed()),
        },
        "TRUNCATE" => match args {
            [file, tag, size] => Ok(Instruction::Truncate {
                file: file.to_string(),
                tag: tag.to_string(),
                size: size.parse().map_err(|_| malformed())?,
            }),
            _ => Err(malformed()),
        },
        "WRITE" => match args {
            [file, tag, base, data] => Ok(Instruction::Write {
                file: file.to_string(),
                tag: tag.to_string(),
                base: base.parse().map_err(|_| malformed())?,
                data: data.as_bytes().to_vec(),
            }),
            _ => Err(malformed()),
        },
        "READ" => match args {
            [file, tag, base, size] => Ok(Instruction::Read {
                file: file.to_string(),
                tag: tag.to_string(),
                base: base.parse().map_err(|_| malformed())?,
                size: size.parse().map_err(|_| malformed())?,
            }),
            _ => Err(malformed()),
        },
        "TAG" => match args {
            [src_file, src_tag, dst_file, dst_tag] => Ok(Instruction::Tag {
                src_file: src_file.to_string(),
                src_tag: src_tag.to_string(),
                dst_file: dst_file.to_string(),
                dst_tag: dst_tag.to_string(),
            }),
            _ => Err(malformed()),
        },
        "COMMIT" => match args {
            [file, tag] => Ok(Instruction::Commit { file: file.to_string(), tag: tag.to_string() }),
            _ => Err(malformed()),
        },
        "FLUSH" => match args {
            [file, tag] => Ok(Instruction::Flush { file: file.to_string(), tag: tag.to_string() }),
            _ => Err(malformed()),
        },
        "DELETE" => match args {
            [file, tag] => Ok(Instruction::Delete { file: file.to_string(), tag: tag.to_string() }),
            _ => Err(malformed()),
        },
        "END" => match args {
            [] => Ok(Instruction::End),
            _ => Err(malformed()),
        },
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_opcode_case_insensitively() {
        assert_eq!(
            decode(0, "create f t1").unwrap(),
            Instruction::Create { file: "f".into(), tag: "t1".into() }
        );
        assert_eq!(
            decode(0, "Write f t1 0 hello").unwrap(),
            Instruction::Write { file: "f".into(), tag: "t1".into(), base: 0, data: b"hello".to_vec() }
        );
        assert_eq!(decode(0, "end").unwrap(), Instruction::End);
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(decode(3, "CREATE f").is_err());
        assert!(decode(3, "END extra").is_err());
    }

    #[test]
    fn rejects_unknown_opcode() {
        assert!(decode(1, "FROBNICATE f t1").is_err());
    }
}
</content>
