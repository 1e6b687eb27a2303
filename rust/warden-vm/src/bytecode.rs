//! Bytecode word layout, opcode catalog and the frozen host ABI.
//!
//! One instruction is one 32-bit word: opcode in the high 8 bits, a 24-bit
//! immediate in the rest. Opcode numeric values and host indices are part
//! of the ABI between compiler and VM — reordering either breaks already
//! emitted programs.

/// Opcodes, partitioned by purpose.
pub mod op {
    // Control
    pub const HALT: u8 = 0x00;
    pub const NOOP: u8 = 0x01;
    pub const JMP: u8 = 0x20;
    pub const JMP_FALSE: u8 = 0x21;
    pub const CALL: u8 = 0x22;
    pub const RET: u8 = 0x23;

    // Stack
    pub const PUSH_C: u8 = 0x02;
    pub const PUSH_L: u8 = 0x03;
    pub const POP_L: u8 = 0x04;
    pub const DROP: u8 = 0x05;
    pub const DUP: u8 = 0x06;

    // Arithmetic
    pub const ADD: u8 = 0x10;
    pub const SUB: u8 = 0x11;
    pub const MUL: u8 = 0x12;
    pub const DIV: u8 = 0x13;
    pub const MOD: u8 = 0x14;
    pub const POW: u8 = 0x15;
    pub const FLOOR_DIV: u8 = 0x16;

    // Bitwise
    pub const BIT_AND: u8 = 0x17;
    pub const BIT_OR: u8 = 0x18;
    pub const BIT_XOR: u8 = 0x19;
    pub const LSHIFT: u8 = 0x1A;
    pub const RSHIFT: u8 = 0x1B;

    // Compare / logic
    pub const EQ: u8 = 0x28;
    pub const NE: u8 = 0x29;
    pub const GT: u8 = 0x2A;
    pub const LT: u8 = 0x2B;
    pub const GTE: u8 = 0x2C;
    pub const LTE: u8 = 0x2D;
    pub const AND: u8 = 0x2E;
    pub const OR: u8 = 0x2F;
    pub const IN: u8 = 0x36;
    pub const NOT_IN: u8 = 0x37;

    // String
    pub const CONTAINS: u8 = 0x38;
    pub const FIND: u8 = 0x39;
    pub const SLICE: u8 = 0x3A;
    pub const LEN: u8 = 0x3B;
    pub const TRIM: u8 = 0x3C;

    // Diag
    pub const ERROR: u8 = 0x3F;

    // Capability
    pub const ADDRESS: u8 = 0x30;
    pub const EXIT_ADDR: u8 = 0x31;

    // Host
    pub const SYSCALL: u8 = 0x40;
}

/// Frozen host-function indices. 0..13 are reserved and may never move;
/// general built-ins occupy 14..63; extensions append at the end.
pub mod host {
    pub const WRITE_FILE: u32 = 0;
    pub const FETCH: u32 = 1;
    pub const PRINT: u32 = 2;
    pub const PARSE_JSON: u32 = 3;
    pub const GET_FIELD: u32 = 4;
    pub const SEND_REQUEST: u32 = 5;
    pub const CHECK_STATUS: u32 = 6;
    pub const PARSE_JSON_KEY: u32 = 7;
    pub const PARSE_AND_GET: u32 = 8;
    pub const FORMAT_STRING: u32 = 9;
    pub const IS_EMPTY: u32 = 10;
    pub const WITH_CLIENT: u32 = 11;
    pub const SET_URL: u32 = 12;
    pub const SET_METHOD: u32 = 13;

    pub const LEN: u32 = 14;
    pub const RANGE: u32 = 15;
    pub const LIST: u32 = 16;
    pub const SUM: u32 = 17;
    pub const MAX: u32 = 18;
    pub const MIN: u32 = 19;
    pub const MAP: u32 = 20;
    pub const ABS: u32 = 21;
    pub const BOOL: u32 = 22;
    pub const INT: u32 = 23;
    pub const STR: u32 = 24;
    pub const FILTER: u32 = 25;
    pub const POW: u32 = 26;
    pub const ALL: u32 = 27;
    pub const ANY: u32 = 28;
    pub const MAKE_LIST: u32 = 29;
    pub const GET_ITEM: u32 = 30;
    pub const SET_ITEM: u32 = 31;
    pub const DIVMOD: u32 = 32;
    pub const ROUND: u32 = 33;
    pub const FLOAT: u32 = 34;
    pub const BIN: u32 = 35;
    pub const OCT: u32 = 36;
    pub const HEX: u32 = 37;
    pub const CHR: u32 = 38;
    pub const ORD: u32 = 39;
    pub const DICT: u32 = 40;
    pub const TUPLE: u32 = 41;
    pub const SET: u32 = 42;
    pub const REVERSED: u32 = 43;
    pub const SORTED: u32 = 44;
    pub const ZIP: u32 = 45;
    pub const ENUMERATE: u32 = 46;
    pub const REPR: u32 = 47;
    pub const ASCII: u32 = 48;
    pub const HASH: u32 = 49;
    pub const ID: u32 = 50;
    pub const TYPE: u32 = 51;
    pub const CALLABLE: u32 = 52;
    pub const ITER: u32 = 53;
    pub const NEXT: u32 = 54;
    pub const LOCALS: u32 = 55;
    pub const GLOBALS: u32 = 56;
    pub const SLICE: u32 = 57;
    pub const BYTES: u32 = 58;
    pub const BYTEARRAY: u32 = 59;
    pub const HAS_NEXT: u32 = 60;
    pub const MAKE_TUPLE: u32 = 61;
    pub const METHOD_CALL: u32 = 62;
    pub const IS_INSTANCE: u32 = 63;

    // Extensions: append only.
    pub const READ_FILE: u32 = 64;

    /// Total number of host slots a fully provisioned machine carries.
    pub const SLOT_COUNT: usize = 65;
}

/// Scope names required by the reference sandboxes. Baked into compiled
/// programs via the word table, so they are ABI too.
pub mod scopes {
    pub const FS_ENV: &str = "FS-ENV";
    pub const HTTP_ENV: &str = "HTTP-ENV";
}

pub const ARG_MASK: u32 = 0x00FF_FFFF;

/// Assemble one instruction word.
pub fn encode(opcode: u8, arg: u32) -> u32 {
    (u32::from(opcode) << 24) | (arg & ARG_MASK)
}

/// Split one instruction word into `(opcode, arg)`.
pub fn decode(word: u32) -> (u8, u32) {
    ((word >> 24) as u8, word & ARG_MASK)
}

/// Pack a CALL immediate: target address in the high 16 bits of the
/// 24-bit field, argument count in the low 8.
pub fn encode_call(addr: u32, argc: u32) -> u32 {
    (addr << 8) | (argc & 0xFF)
}

pub fn decode_call(arg: u32) -> (usize, usize) {
    ((arg >> 8) as usize, (arg & 0xFF) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let w = encode(op::PUSH_C, 0x123456);
        assert_eq!(decode(w), (op::PUSH_C, 0x123456));
    }

    #[test]
    fn arg_is_masked_to_24_bits() {
        let w = encode(op::JMP, 0xFF00_0001);
        assert_eq!(decode(w), (op::JMP, 0x0000_0001));
    }

    #[test]
    fn call_packing() {
        let arg = encode_call(0x1234, 3);
        assert_eq!(decode_call(arg), (0x1234, 3));
        let w = encode(op::CALL, arg);
        let (opcode, arg2) = decode(w);
        assert_eq!(opcode, op::CALL);
        assert_eq!(decode_call(arg2), (0x1234, 3));
    }

    #[test]
    fn reserved_host_indices_are_frozen() {
        // The first fourteen slots are ABI; a failure here means old
        // bytecode would dispatch to the wrong host.
        assert_eq!(host::WRITE_FILE, 0);
        assert_eq!(host::FETCH, 1);
        assert_eq!(host::PRINT, 2);
        assert_eq!(host::PARSE_JSON, 3);
        assert_eq!(host::GET_FIELD, 4);
        assert_eq!(host::SEND_REQUEST, 5);
        assert_eq!(host::CHECK_STATUS, 6);
        assert_eq!(host::PARSE_JSON_KEY, 7);
        assert_eq!(host::PARSE_AND_GET, 8);
        assert_eq!(host::FORMAT_STRING, 9);
        assert_eq!(host::IS_EMPTY, 10);
        assert_eq!(host::WITH_CLIENT, 11);
        assert_eq!(host::SET_URL, 12);
        assert_eq!(host::SET_METHOD, 13);
        assert_eq!(host::LEN, 14);
        assert_eq!(host::IS_INSTANCE, 63);
        assert_eq!(host::READ_FILE, 64);
    }
}
