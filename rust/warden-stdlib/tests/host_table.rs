//! The compiler's word table and the installed host registry describe the
//! same ABI. Host indices are baked into emitted bytecode, so a mismatch
//! here means compiled programs dispatch to the wrong host function.

use warden_compiler::words::signature;
use warden_vm::Machine;

const SURFACE_WORDS: &[&str] = &[
    "write_file",
    "read_file",
    "fetch",
    "send_request",
    "with_client",
    "set_url",
    "set_method",
    "check_status",
    "print",
    "parse_json",
    "parse_json_key",
    "parse_and_get",
    "get_field",
    "format_string",
    "is_empty",
    "len",
    "range",
    "list",
    "sum",
    "max",
    "min",
    "map",
    "filter",
    "abs",
    "bool",
    "int",
    "str",
    "float",
    "pow",
    "all",
    "any",
    "divmod",
    "round",
    "bin",
    "oct",
    "hex",
    "chr",
    "ord",
    "dict",
    "tuple",
    "set",
    "reversed",
    "sorted",
    "zip",
    "enumerate",
    "repr",
    "ascii",
    "hash",
    "id",
    "type",
    "callable",
    "iter",
    "next",
    "locals",
    "globals",
    "slice",
    "bytes",
    "bytearray",
    "isinstance",
];

#[test]
fn every_word_dispatches_to_a_host_of_the_same_name() {
    let mut m = Machine::new();
    warden_stdlib::install(&mut m);

    // Sandbox slots are installed by the provider crates; everything else
    // must already carry a matching name at the word's frozen index.
    let provider_words = [
        "write_file",
        "read_file",
        "fetch",
        "send_request",
        "with_client",
        "set_url",
        "set_method",
        "check_status",
    ];

    for word in SURFACE_WORDS {
        let sig = signature(word).unwrap_or_else(|| panic!("'{}' has no signature", word));
        if provider_words.contains(word) {
            continue;
        }
        let installed = m
            .host_name(sig.host)
            .unwrap_or_else(|| panic!("no host installed at index {} for '{}'", sig.host, word));
        assert_eq!(installed, *word, "word '{}' at index {}", word, sig.host);
    }
}

#[test]
fn words_and_registry_agree_on_gating() {
    use warden_vm::bytecode::scopes;
    assert_eq!(
        signature("fetch").unwrap().required_scope,
        Some(scopes::HTTP_ENV)
    );
    assert_eq!(
        signature("write_file").unwrap().required_scope,
        Some(scopes::FS_ENV)
    );
    assert_eq!(
        signature("read_file").unwrap().required_scope,
        Some(scopes::FS_ENV)
    );
    assert_eq!(
        signature("send_request").unwrap().required_scope,
        Some(scopes::HTTP_ENV)
    );
    // Builder setters carry no authority; only sending does.
    assert_eq!(signature("with_client").unwrap().required_scope, None);
    assert_eq!(signature("set_url").unwrap().required_scope, None);
    assert_eq!(signature("check_status").unwrap().required_scope, None);
}
