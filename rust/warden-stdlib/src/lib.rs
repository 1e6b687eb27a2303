//! General built-in host functions (registry indices 14 and up, plus the
//! ungated reserved slots: print, JSON and string helpers).
//!
//! The sandboxed slots — filesystem (0, 64) and HTTP (1, 5, 6, 11..13) —
//! are installed by the provider crates; `install` leaves placeholders in
//! them.

pub mod builtins;
pub mod json;
pub mod string;

use warden_vm::bytecode::host;
use warden_vm::Machine;

/// Install every general host function at its frozen registry index.
pub fn install(m: &mut Machine) {
    m.set_host(host::PRINT, "print", None, builtins::print);
    m.set_host(host::PARSE_JSON, "parse_json", None, json::parse_json);
    m.set_host(host::GET_FIELD, "get_field", None, json::get_field);
    m.set_host(host::PARSE_JSON_KEY, "parse_json_key", None, json::parse_json_key);
    m.set_host(host::PARSE_AND_GET, "parse_and_get", None, json::parse_json_key);
    m.set_host(host::FORMAT_STRING, "format_string", None, string::format_string);
    m.set_host(host::IS_EMPTY, "is_empty", None, string::is_empty);

    m.set_host(host::LEN, "len", None, builtins::len);
    m.set_host(host::RANGE, "range", None, builtins::range);
    m.set_host(host::LIST, "list", None, builtins::list);
    m.set_host(host::SUM, "sum", None, builtins::sum);
    m.set_host(host::MAX, "max", None, builtins::max);
    m.set_host(host::MIN, "min", None, builtins::min);
    m.set_host(host::MAP, "map", None, builtins::map);
    m.set_host(host::ABS, "abs", None, builtins::abs);
    m.set_host(host::BOOL, "bool", None, builtins::bool_);
    m.set_host(host::INT, "int", None, builtins::int);
    m.set_host(host::STR, "str", None, builtins::str_);
    m.set_host(host::FILTER, "filter", None, builtins::filter);
    m.set_host(host::POW, "pow", None, builtins::pow);
    m.set_host(host::ALL, "all", None, builtins::all);
    m.set_host(host::ANY, "any", None, builtins::any);
    m.set_host(host::MAKE_LIST, "make_list", None, builtins::make_list);
    m.set_host(host::GET_ITEM, "get_item", None, builtins::get_item);
    m.set_host(host::SET_ITEM, "set_item", None, builtins::set_item);
    m.set_host(host::DIVMOD, "divmod", None, builtins::divmod);
    m.set_host(host::ROUND, "round", None, builtins::round);
    m.set_host(host::FLOAT, "float", None, builtins::float);
    m.set_host(host::BIN, "bin", None, builtins::bin);
    m.set_host(host::OCT, "oct", None, builtins::oct);
    m.set_host(host::HEX, "hex", None, builtins::hex);
    m.set_host(host::CHR, "chr", None, builtins::chr);
    m.set_host(host::ORD, "ord", None, builtins::ord);
    m.set_host(host::DICT, "dict", None, builtins::dict);
    m.set_host(host::TUPLE, "tuple", None, builtins::tuple);
    m.set_host(host::SET, "set", None, builtins::set_);
    m.set_host(host::REVERSED, "reversed", None, builtins::reversed);
    m.set_host(host::SORTED, "sorted", None, builtins::sorted);
    m.set_host(host::ZIP, "zip", None, builtins::zip);
    m.set_host(host::ENUMERATE, "enumerate", None, builtins::enumerate);
    m.set_host(host::REPR, "repr", None, builtins::repr);
    m.set_host(host::ASCII, "ascii", None, builtins::repr);
    m.set_host(host::HASH, "hash", None, builtins::hash);
    m.set_host(host::ID, "id", None, builtins::hash);
    m.set_host(host::TYPE, "type", None, builtins::type_);
    m.set_host(host::CALLABLE, "callable", None, builtins::callable);
    m.set_host(host::ITER, "iter", None, builtins::iter);
    m.set_host(host::NEXT, "next", None, builtins::next);
    m.set_host(host::LOCALS, "locals", None, builtins::locals);
    m.set_host(host::GLOBALS, "globals", None, builtins::locals);
    m.set_host(host::SLICE, "slice", None, builtins::slice);
    m.set_host(host::BYTES, "bytes", None, builtins::bytes);
    m.set_host(host::BYTEARRAY, "bytearray", None, builtins::bytes);
    m.set_host(host::HAS_NEXT, "has_next", None, builtins::has_next);
    m.set_host(host::MAKE_TUPLE, "make_tuple", None, builtins::make_tuple);
    m.set_host(host::METHOD_CALL, "method_call", None, builtins::method_call);
    m.set_host(host::IS_INSTANCE, "isinstance", None, builtins::is_instance);
}
