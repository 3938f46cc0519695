//! Reference codec against normalized registries.

mod common;

use common::*;
use tpmgen::dump::value_to_dump;
use tpmgen::{Codec, CodecError, Registry, Value};

fn hash_scheme(type_name: &str, hash_alg: u16) -> Value {
    Value::Union {
        type_name: type_name.to_string(),
        value: Box::new(Value::record([("hashAlg", Value::U16(hash_alg))])),
    }
}

fn combined(digest: Vec<u8>, scheme: Value) -> Value {
    Value::record([
        ("pcrSelect", Value::Bytes(vec![0x01, 0x02, 0x03])),
        ("digest", Value::Bytes(digest)),
        (
            "inner",
            Value::record([("inner", Value::record([("flags", Value::U32(7)), ("level", Value::U8(2))]))]),
        ),
        ("scheme", scheme),
    ])
}

fn registry() -> Registry {
    registry_from(&codec_tables())
}

#[test]
fn test_combined_structure_roundtrip() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let value = combined(vec![0xAA; 32], hash_scheme("TPMS_SCHEME_HASH_HMAC", 0x000B));
    let bytes = codec.encode("TPMS_COMBINED", &value).expect("encode");

    let mut expected = vec![0xFF, 0x54, 0x43, 0x47, 0x01, 0x02, 0x03, 0x00, 0x20];
    expected.extend([0xAA; 32]);
    expected.extend([0x00, 0x05, 0x00, 0x00, 0x00, 0x07, 0x02]);
    expected.extend([0x00, 0x05, 0x00, 0x0B]);
    assert_eq!(bytes, expected);

    let decoded = codec.decode("TPMS_COMBINED", &bytes).expect("decode");
    assert_eq!(decoded, value, "decoded:\n{}", value_to_dump(&decoded, 0));
}

#[test]
fn test_encoded_length_within_wire_size() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let max = registry.wire_size("TPMS_COMBINED").expect("wire size");
    assert_eq!(max, 84);

    for len in [0usize, 20, 64] {
        let value = combined(vec![0x11; len], hash_scheme("TPMS_SCHEME_HASH_RSASSA", 0x0004));
        let bytes = codec.encode("TPMS_COMBINED", &value).expect("encode");
        assert!(bytes.len() <= max);
        if len == 64 {
            assert_eq!(bytes.len(), max);
        }
    }

    let inner = Value::record([("flags", Value::U32(0)), ("level", Value::U8(0))]);
    let bytes = codec.encode("TPMS_INNER", &inner).expect("encode");
    assert_eq!(bytes.len(), registry.wire_size("TPMS_INNER").unwrap());
}

#[test]
fn test_shared_member_type_decodes_to_derived_type() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let value = combined(Vec::new(), hash_scheme("TPMS_SCHEME_HASH_RSASSA", 0x000C));
    let bytes = codec.encode("TPMS_COMBINED", &value).expect("encode");
    assert_eq!(&bytes[bytes.len() - 4..], &[0x00, 0x14, 0x00, 0x0C]);

    match codec.decode("TPMS_COMBINED", &bytes).expect("decode") {
        Value::Struct(fields) => match &fields["scheme"] {
            Value::Union { type_name, .. } => assert_eq!(type_name, "TPMS_SCHEME_HASH_RSASSA"),
            other => panic!("expected a union value, got {:?}", other),
        },
        other => panic!("expected a structure, got {:?}", other),
    }
}

#[test]
fn test_null_union_member_has_no_body() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let value = combined(vec![0x01], Value::Null);
    let bytes = codec.encode("TPMS_COMBINED", &value).expect("encode");
    assert_eq!(&bytes[bytes.len() - 2..], &[0x00, 0x10]);
    assert_eq!(codec.decode("TPMS_COMBINED", &bytes).expect("decode"), value);
}

#[test]
fn test_null_algorithm_structure_stops_after_selector() {
    let registry = registry();
    let codec = Codec::new(&registry);

    let null = Value::record([("algorithm", Value::U16(0x0010))]);
    let bytes = codec.encode("TPMT_SYM_DEF", &null).expect("encode null");
    assert_eq!(bytes, vec![0x00, 0x10]);
    assert_eq!(codec.decode("TPMT_SYM_DEF", &bytes).expect("decode null"), null);

    let aes = Value::record([
        ("algorithm", Value::U16(0x0006)),
        ("keyBits", Value::U16(128)),
        ("mode", Value::U16(0x0043)),
    ]);
    let bytes = codec.encode("TPMT_SYM_DEF", &aes).expect("encode aes");
    assert_eq!(bytes, vec![0x00, 0x06, 0x00, 0x80, 0x00, 0x43]);
    assert_eq!(codec.decode("TPMT_SYM_DEF", &bytes).expect("decode aes"), aes);
}

#[test]
fn test_constraint_violations() {
    let registry = registry();
    let codec = Codec::new(&registry);

    let too_long = combined(vec![0; 65], Value::Null);
    assert!(matches!(codec.encode("TPMS_COMBINED", &too_long), Err(CodecError::Validation(_))));

    let mut short_select = combined(Vec::new(), Value::Null);
    if let Value::Struct(fields) = &mut short_select {
        fields.insert("pcrSelect".to_string(), Value::Bytes(vec![1, 2]));
    }
    assert!(matches!(codec.encode("TPMS_COMBINED", &short_select), Err(CodecError::LengthMismatch(_))));

    let missing = Value::record([("flags", Value::U32(1))]);
    assert!(matches!(codec.encode("TPMS_INNER", &missing), Err(CodecError::MissingField(_))));

    let overflow = Value::record([("flags", Value::U32(1)), ("level", Value::U16(256))]);
    assert!(matches!(codec.encode("TPMS_INNER", &overflow), Err(CodecError::Validation(_))));
}

#[test]
fn test_malformed_input_is_rejected() {
    let registry = registry();
    let codec = Codec::new(&registry);
    let good = codec
        .encode("TPMS_COMBINED", &combined(vec![0xAB; 4], Value::Null))
        .expect("encode");

    let mut bad_magic = good.clone();
    bad_magic[0] = 0x00;
    assert!(matches!(codec.decode("TPMS_COMBINED", &bad_magic), Err(CodecError::Validation(_))));

    let mut trailing = good.clone();
    trailing.push(0);
    assert!(matches!(codec.decode("TPMS_COMBINED", &trailing), Err(CodecError::LengthMismatch(_))));

    let (consumed, value) = codec.decode_with_extent("TPMS_COMBINED", &trailing);
    assert_eq!(consumed, good.len());
    assert!(value.is_ok());

    assert!(codec.decode("TPMS_COMBINED", &good[..good.len() - 1]).is_err());

    let mut bad_size = good.clone();
    // size of the TPM2B_INNER body, after magic, pcrSelect, digestSize and 4 digest bytes
    bad_size[14] = 0x04;
    assert!(codec.decode("TPMS_COMBINED", &bad_size).is_err());

    assert!(matches!(
        codec.decode("TPMS_MISSING", &good),
        Err(CodecError::Registry(_) | CodecError::UnknownType(_))
    ));
}

#[test]
fn test_struct_typedefs_roundtrip() {
    let registry = registry_from(&typedef_tables());
    let codec = Codec::new(&registry);
    let hash = |alg: u16| Value::record([("hashAlg", Value::U16(alg))]);
    let value = Value::record([
        ("nonce", Value::Bytes(vec![0x11, 0x22])),
        ("kdf", hash(0x0004)),
        ("signing", hash(0x000B)),
        (
            "scheme",
            Value::Union { type_name: "TPMS_SIG_SCHEME_HMAC".to_string(), value: Box::new(hash(0x000C)) },
        ),
    ]);
    let bytes = codec.encode("TPMS_USER", &value).expect("encode");
    assert_eq!(
        bytes,
        vec![0x00, 0x02, 0x11, 0x22, 0x00, 0x04, 0x00, 0x0B, 0x00, 0x05, 0x00, 0x0C]
    );
    assert_eq!(codec.decode("TPMS_USER", &bytes).expect("decode"), value);

    let alias = codec.encode("TPMS_KDF_SCHEME_KDF2", &hash(0x000B)).expect("encode through typedef");
    assert_eq!(alias, vec![0x00, 0x0B]);
}
