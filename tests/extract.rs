//! Extraction diagnostics and row handling.

mod common;

use common::*;
use tpmgen::extract::{Diagnostic, SkipReason};
use tpmgen::raw::{load_tables, save_tables};
use tpmgen::{extract, GenError, GeneratorConfig, RawTable};

#[test]
fn test_unrecognized_and_unclassified_tables_are_skipped() {
    let tables = vec![
        alg_table(),
        RawTable::new("Command Modifiers", &[&["x", "y", "z"]]),
        RawTable::new("Definition of TPMS_!ALG.Z_PARMS Structure", &[&["value", "UINT16", ""]]),
        digest_table(),
    ];
    let (registry, report) = extract(&tables, &GeneratorConfig::default()).expect("extract");
    assert_eq!(
        report.skipped,
        vec![
            Diagnostic { caption: "Command Modifiers".to_string(), reason: SkipReason::UnrecognizedCaption },
            Diagnostic {
                caption: "Definition of TPMS_!ALG.Z_PARMS Structure".to_string(),
                reason: SkipReason::UnclassifiedAlgorithm { classes: "Z".to_string() },
            },
        ]
    );
    assert_eq!(report.processed, 2);
    assert!(registry.contains("TPM2B_DIGEST"));
}

#[test]
fn test_malformed_row_is_located() {
    let tables = vec![RawTable::new(
        "Definition of TPMS_BAD Structure",
        &[&["count", "UINT16", ""], &["1st value", "UINT16", ""]],
    )];
    match extract(&tables, &GeneratorConfig::default()) {
        Err(GenError::UnmatchedRow { caption, row, cells, .. }) => {
            assert_eq!(caption, "Definition of TPMS_BAD Structure");
            assert_eq!(row, 1);
            assert_eq!(cells[0], "1st value");
        }
        other => panic!("expected an unmatched row, got {:?}", other.map(|(_, r)| r)),
    }
}

#[test]
fn test_unknown_field_type_is_fatal() {
    let tables = vec![RawTable::new("Definition of TPMS_X Structure", &[&["value", "TPM_MISSING", ""]])];
    let err = extract(&tables, &GeneratorConfig::default()).unwrap_err();
    assert!(matches!(err, GenError::UnknownType { ref name, .. } if name == "TPM_MISSING"));
}

#[test]
fn test_reserved_duplicates_follow_the_rule() {
    let handles = |comment: &str| {
        RawTable::new(
            "Definition of (UINT32) TPM_RH Constants",
            &[&["TPM_RH_OWNER", "0x40000001", ""], &["TPM_RH_OWNER", "0x40000002", comment]],
        )
    };
    let config = GeneratorConfig::default();
    let (registry, _) = extract(&[handles("reserved")], &config).expect("reserved duplicate dropped");
    assert_eq!(registry.constant_value("TPM_RH_OWNER").unwrap(), 0x40000001);

    let err = extract(&[handles("")], &config).unwrap_err();
    assert!(matches!(err, GenError::DuplicateConstant(ref n) if n == "TPM_RH_OWNER"));
}

#[test]
fn test_bitfield_constants() {
    let tables = vec![RawTable::new(
        "Definition of (UINT8) TPMA_SESSION Bits <IN/OUT>",
        &[
            &["0", "continueSession", "keep the session open"],
            &["4:1", "Reserved", ""],
            &["7:5", "mode", "a three-bit field"],
        ],
    )];
    let (registry, _) = extract(&tables, &GeneratorConfig::default()).expect("extract");
    let bits = registry.lookup("TPMA_SESSION").and_then(|t| t.as_bitfield()).expect("bitfield");
    assert_eq!(bits.members.len(), 2);
    assert_eq!(registry.constant_value("TPMA_SESSION_continueSession").unwrap(), 1);
    assert_eq!(registry.constant_value("TPMA_SESSION_mode_BIT_MASK").unwrap(), 0xE0);
    assert_eq!(registry.constant_value("TPMA_SESSION_mode_BIT_OFFSET").unwrap(), 5);
    assert_eq!(registry.constant_value("TPMA_SESSION_mode_BIT_LENGTH").unwrap(), 3);
}

#[test]
fn test_command_handles_and_auth() {
    let mut tables = vec![
        RawTable::new("Definition of Types for Handles", &[&["UINT32", "TPM_HANDLE", ""]]),
        RawTable::new(
            "Definition of (UINT32) TPM_CC Constants",
            &[&["TPM_CC_ObjectChangeAuth", "0x00000150", ""]],
        ),
    ];
    tables.push(
        RawTable::new(
            "Table 3 — TPM2_ObjectChangeAuth Command",
            &[
                &["TPMI_ST_COMMAND_TAG", "tag", ""],
                &["UINT32", "commandSize", ""],
                &["TPM_CC", "commandCode", "TPM_CC_ObjectChangeAuth"],
                &["TPM_HANDLE", "@objectHandle", "handle of the object"],
                &["TPM_HANDLE", "parentHandle", "handle of the parent"],
                &["UINT16", "newAuth", "new authorization value"],
            ],
        )
        .with_handles(2),
    );
    let (registry, _) = extract(&tables, &GeneratorConfig::default()).expect("extract");
    let s = registry
        .lookup("TPM2_ObjectChangeAuth_REQUEST")
        .and_then(|t| t.as_struct())
        .expect("request");
    assert_eq!(s.num_handles, 2);
    assert_eq!(s.num_auth_handles, 1);
    let handles: Vec<&str> = s.handles().map(|f| f.name.as_str()).collect();
    assert_eq!(handles, vec!["objectHandle", "parentHandle"]);
    assert!(s.fields[0].requires_auth);
    assert!(!s.fields[2].is_handle);
}

#[test]
fn test_tables_survive_the_cache() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(".cache").join("raw_tables.json");
    let tables = command_tables();
    save_tables(&path, &tables).expect("save");
    let loaded = load_tables(&path).expect("load");
    assert_eq!(loaded, tables);

    let config = GeneratorConfig::default();
    let (a, _) = extract(&tables, &config).expect("extract");
    let (b, _) = extract(&loaded, &config).expect("extract cached");
    assert_eq!(a.names_in_order(), b.names_in_order());
}
