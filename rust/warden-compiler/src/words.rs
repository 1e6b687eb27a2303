//! Stack-effect signatures for every callable word.
//!
//! One table drives both the analyzer (virtual stack depth, capability
//! checks) and the emitter (host index, count-push convention). Keeping
//! them on a single source of truth is what guarantees the compile-time
//! scope check and the VM's runtime check agree exactly.

use warden_vm::bytecode::{host, scopes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    /// Accepts `min..=max` arguments; the emitter pushes the argument
    /// count on top before dispatch.
    Variadic { min: u8, max: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct WordSig {
    pub host: u32,
    pub arity: Arity,
    /// Number of values the word leaves on the stack (0 or 1).
    pub out: u8,
    pub required_scope: Option<&'static str>,
}

/// Scope names used by the reference sandboxes.
pub const FS_SCOPE: &str = scopes::FS_ENV;
pub const HTTP_SCOPE: &str = scopes::HTTP_ENV;

pub fn signature(name: &str) -> Option<WordSig> {
    use Arity::*;
    let sig = match name {
        // Sandboxed operations
        "write_file" => WordSig { host: host::WRITE_FILE, arity: Fixed(2), out: 0, required_scope: Some(FS_SCOPE) },
        "read_file" => WordSig { host: host::READ_FILE, arity: Fixed(1), out: 1, required_scope: Some(FS_SCOPE) },
        "fetch" => WordSig { host: host::FETCH, arity: Fixed(1), out: 1, required_scope: Some(HTTP_SCOPE) },
        "send_request" => WordSig { host: host::SEND_REQUEST, arity: Fixed(0), out: 1, required_scope: Some(HTTP_SCOPE) },

        // HTTP request builder
        "with_client" => WordSig { host: host::WITH_CLIENT, arity: Fixed(0), out: 0, required_scope: None },
        "set_url" => WordSig { host: host::SET_URL, arity: Fixed(1), out: 0, required_scope: None },
        "set_method" => WordSig { host: host::SET_METHOD, arity: Fixed(1), out: 0, required_scope: None },
        "check_status" => WordSig { host: host::CHECK_STATUS, arity: Fixed(1), out: 1, required_scope: None },

        // Output / strings / JSON
        "print" => WordSig { host: host::PRINT, arity: Variadic { min: 0, max: 16 }, out: 0, required_scope: None },
        "parse_json" => WordSig { host: host::PARSE_JSON, arity: Fixed(1), out: 1, required_scope: None },
        "parse_json_key" => WordSig { host: host::PARSE_JSON_KEY, arity: Fixed(2), out: 1, required_scope: None },
        "parse_and_get" => WordSig { host: host::PARSE_AND_GET, arity: Fixed(2), out: 1, required_scope: None },
        "get_field" => WordSig { host: host::GET_FIELD, arity: Fixed(2), out: 1, required_scope: None },
        "format_string" => WordSig { host: host::FORMAT_STRING, arity: Fixed(2), out: 1, required_scope: None },
        "is_empty" => WordSig { host: host::IS_EMPTY, arity: Fixed(1), out: 1, required_scope: None },

        // General built-ins
        "len" => WordSig { host: host::LEN, arity: Fixed(1), out: 1, required_scope: None },
        "range" => WordSig { host: host::RANGE, arity: Variadic { min: 1, max: 2 }, out: 1, required_scope: None },
        "list" => WordSig { host: host::LIST, arity: Fixed(1), out: 1, required_scope: None },
        "sum" => WordSig { host: host::SUM, arity: Fixed(1), out: 1, required_scope: None },
        "max" => WordSig { host: host::MAX, arity: Fixed(1), out: 1, required_scope: None },
        "min" => WordSig { host: host::MIN, arity: Fixed(1), out: 1, required_scope: None },
        "map" => WordSig { host: host::MAP, arity: Fixed(2), out: 1, required_scope: None },
        "filter" => WordSig { host: host::FILTER, arity: Fixed(2), out: 1, required_scope: None },
        "abs" => WordSig { host: host::ABS, arity: Fixed(1), out: 1, required_scope: None },
        "bool" => WordSig { host: host::BOOL, arity: Fixed(1), out: 1, required_scope: None },
        "int" => WordSig { host: host::INT, arity: Fixed(1), out: 1, required_scope: None },
        "str" => WordSig { host: host::STR, arity: Fixed(1), out: 1, required_scope: None },
        "float" => WordSig { host: host::FLOAT, arity: Fixed(1), out: 1, required_scope: None },
        "pow" => WordSig { host: host::POW, arity: Fixed(2), out: 1, required_scope: None },
        "all" => WordSig { host: host::ALL, arity: Fixed(1), out: 1, required_scope: None },
        "any" => WordSig { host: host::ANY, arity: Fixed(1), out: 1, required_scope: None },
        "divmod" => WordSig { host: host::DIVMOD, arity: Fixed(2), out: 1, required_scope: None },
        "round" => WordSig { host: host::ROUND, arity: Fixed(1), out: 1, required_scope: None },
        "bin" => WordSig { host: host::BIN, arity: Fixed(1), out: 1, required_scope: None },
        "oct" => WordSig { host: host::OCT, arity: Fixed(1), out: 1, required_scope: None },
        "hex" => WordSig { host: host::HEX, arity: Fixed(1), out: 1, required_scope: None },
        "chr" => WordSig { host: host::CHR, arity: Fixed(1), out: 1, required_scope: None },
        "ord" => WordSig { host: host::ORD, arity: Fixed(1), out: 1, required_scope: None },
        "dict" => WordSig { host: host::DICT, arity: Fixed(0), out: 1, required_scope: None },
        "tuple" => WordSig { host: host::TUPLE, arity: Fixed(1), out: 1, required_scope: None },
        "set" => WordSig { host: host::SET, arity: Fixed(1), out: 1, required_scope: None },
        "reversed" => WordSig { host: host::REVERSED, arity: Fixed(1), out: 1, required_scope: None },
        "sorted" => WordSig { host: host::SORTED, arity: Fixed(1), out: 1, required_scope: None },
        "zip" => WordSig { host: host::ZIP, arity: Fixed(2), out: 1, required_scope: None },
        "enumerate" => WordSig { host: host::ENUMERATE, arity: Fixed(1), out: 1, required_scope: None },
        "repr" => WordSig { host: host::REPR, arity: Fixed(1), out: 1, required_scope: None },
        "ascii" => WordSig { host: host::ASCII, arity: Fixed(1), out: 1, required_scope: None },
        "hash" => WordSig { host: host::HASH, arity: Fixed(1), out: 1, required_scope: None },
        "id" => WordSig { host: host::ID, arity: Fixed(1), out: 1, required_scope: None },
        "type" => WordSig { host: host::TYPE, arity: Fixed(1), out: 1, required_scope: None },
        "callable" => WordSig { host: host::CALLABLE, arity: Fixed(1), out: 1, required_scope: None },
        "iter" => WordSig { host: host::ITER, arity: Fixed(1), out: 1, required_scope: None },
        "next" => WordSig { host: host::NEXT, arity: Fixed(1), out: 1, required_scope: None },
        "locals" => WordSig { host: host::LOCALS, arity: Fixed(0), out: 1, required_scope: None },
        "globals" => WordSig { host: host::GLOBALS, arity: Fixed(0), out: 1, required_scope: None },
        "slice" => WordSig { host: host::SLICE, arity: Fixed(4), out: 1, required_scope: None },
        "bytes" => WordSig { host: host::BYTES, arity: Fixed(1), out: 1, required_scope: None },
        "bytearray" => WordSig { host: host::BYTEARRAY, arity: Fixed(1), out: 1, required_scope: None },
        "isinstance" => WordSig { host: host::IS_INSTANCE, arity: Fixed(2), out: 1, required_scope: None },
        _ => return None,
    };
    Some(sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gated_words_carry_their_scope() {
        assert_eq!(signature("fetch").unwrap().required_scope, Some(HTTP_SCOPE));
        assert_eq!(
            signature("write_file").unwrap().required_scope,
            Some(FS_SCOPE)
        );
        assert_eq!(
            signature("send_request").unwrap().required_scope,
            Some(HTTP_SCOPE)
        );
        assert_eq!(signature("print").unwrap().required_scope, None);
    }

    #[test]
    fn host_indices_match_the_frozen_abi() {
        assert_eq!(signature("write_file").unwrap().host, 0);
        assert_eq!(signature("fetch").unwrap().host, 1);
        assert_eq!(signature("print").unwrap().host, 2);
        assert_eq!(signature("len").unwrap().host, 14);
        assert_eq!(signature("isinstance").unwrap().host, 63);
        assert_eq!(signature("read_file").unwrap().host, 64);
    }

    #[test]
    fn unknown_word_has_no_signature() {
        assert!(signature("frobnicate").is_none());
    }
}
