//! Table fixtures shared by the integration tests.

#![allow(dead_code)]

use tpmgen::{extract, normalize, GeneratorConfig, RawTable, Registry};

pub fn alg_table() -> RawTable {
    RawTable::new(
        "Table 9 — Definition of (UINT16) TPM_ALG_ID Constants",
        &[
            &["TPM_ALG_SHA1", "0x0004", "H", "", ""],
            &["TPM_ALG_HMAC", "0x0005", "H X", "", ""],
            &["TPM_ALG_AES", "0x0006", "S", "", ""],
            &["TPM_ALG_SHA256", "0x000B", "H", "", ""],
            &["TPM_ALG_SHA384", "0x000C", "H", "", ""],
            &["TPM_ALG_NULL", "0x0010", "", "", ""],
            &["TPM_ALG_RSASSA", "0x0014", "A X", "", ""],
        ],
    )
}

pub fn digest_table() -> RawTable {
    RawTable::new(
        "Definition of TPM2B_DIGEST Structure",
        &[
            &["size", "UINT16", "size in octets of the buffer field"],
            &["buffer[size]{:64}", "BYTE", "the buffer area that can be no larger than a digest"],
        ],
    )
}

/// Algorithm table, a sized buffer and a union with a null member.
pub fn scheme_tables() -> Vec<RawTable> {
    vec![
        alg_table(),
        digest_table(),
        RawTable::new(
            "Definition of TPMU_SCHEME Union",
            &[
                &["sha256", "TPM2B_DIGEST", "TPM_ALG_SHA256", ""],
                &["null", "", "TPM_ALG_NULL", ""],
            ],
        ),
    ]
}

/// Structures covering constants, fixed and counted arrays, sized structures, tagged unions
/// with a shared member type, and a null-algorithm structure.
pub fn codec_tables() -> Vec<RawTable> {
    vec![
        alg_table(),
        RawTable::new(
            "Definition of (UINT32) TPM_GENERATED Constants",
            &[&["TPM_GENERATED_VALUE", "0xff544347", "0xff ‘TCG’ (FF 54 43 47₁₆)"]],
        ),
        RawTable::new(
            "Definition of (UINT32) TPM_LIMIT Constants",
            &[&["TPM_LIMIT_FIRST", "TPM_LIMIT_MAX", ""], &["TPM_LIMIT_MAX", "0x40", ""]],
        ),
        digest_table(),
        RawTable::new("Definition of TPMS_SCHEME_HASH Structure", &[&["hashAlg", "UINT16", "the hash algorithm"]]),
        RawTable::new(
            "Definition of TPMU_SIG_SCHEME Union",
            &[
                &["rsassa", "TPMS_SCHEME_HASH", "TPM_ALG_RSASSA", ""],
                &["hmac", "TPMS_SCHEME_HASH", "TPM_ALG_HMAC", ""],
                &["null", "", "TPM_ALG_NULL", ""],
            ],
        ),
        RawTable::new(
            "Definition of TPMT_SIG_SCHEME Structure",
            &[
                &["scheme", "UINT16", "scheme selector"],
                &["[scheme]details", "TPMU_SIG_SCHEME", "scheme parameters"],
            ],
        ),
        RawTable::new(
            "Definition of TPMS_INNER Structure",
            &[&["flags", "UINT32", ""], &["level", "UINT8", ""]],
        ),
        RawTable::new(
            "Definition of TPM2B_INNER Structure",
            &[&["size=", "UINT16", ""], &["inner", "TPMS_INNER", ""]],
        ),
        RawTable::new(
            "Definition of TPMS_COMBINED Structure",
            &[
                &["magic=TPM_GENERATED_VALUE", "UINT32", ""],
                &["pcrSelect[3]", "BYTE", ""],
                &["digest", "TPM2B_DIGEST", ""],
                &["inner", "TPM2B_INNER", ""],
                &["scheme", "TPMT_SIG_SCHEME", ""],
            ],
        ),
        RawTable::new(
            "Definition of TPMU_SYM_KEY_BITS Union",
            &[&["aes", "UINT16", "TPM_ALG_AES", ""], &["null", "", "TPM_ALG_NULL", ""]],
        ),
        RawTable::new(
            "Definition of TPMU_SYM_MODE Union",
            &[&["aes", "UINT16", "TPM_ALG_AES", ""], &["null", "", "TPM_ALG_NULL", ""]],
        ),
        RawTable::new(
            "Definition of TPMT_SYM_DEF Structure",
            &[
                &["algorithm", "UINT16", "symmetric algorithm"],
                &["[algorithm]keyBits", "TPMU_SYM_KEY_BITS", "key size"],
                &["[algorithm]mode", "TPMU_SYM_MODE", "mode"],
            ],
        ),
    ]
}

/// [`codec_tables`] plus two commands and their codes.
pub fn command_tables() -> Vec<RawTable> {
    let mut tables = codec_tables();
    tables.extend([
        RawTable::new("Definition of Types for Handles", &[&["UINT32", "TPM_HANDLE", ""]]),
        RawTable::new(
            "Definition of (UINT32) TPM_CC Constants",
            &[
                &["TPM_CC_FlushContext", "0x00000165", ""],
                &["TPM_CC_GetRandom", "0x0000017B", ""],
            ],
        ),
        RawTable::new(
            "TPM2_GetRandom Command",
            &[
                &["TPMI_ST_COMMAND_TAG", "tag", ""],
                &["UINT32", "commandSize", ""],
                &["TPM_CC", "commandCode", "TPM_CC_GetRandom"],
                &["UINT16", "bytesRequested", "number of octets to return"],
            ],
        ),
        RawTable::new(
            "TPM2_GetRandom Response",
            &[
                &["TPM_ST", "tag", ""],
                &["UINT32", "responseSize", ""],
                &["TPM_RC", "responseCode", ""],
                &["TPM2B_DIGEST", "randomBytes", "the random octets"],
            ],
        ),
        RawTable::new(
            "TPM2_FlushContext Command",
            &[
                &["TPMI_ST_COMMAND_TAG", "tag", ""],
                &["UINT32", "commandSize", ""],
                &["TPM_CC", "commandCode", ""],
                &["TPM_HANDLE", "flushHandle", "the handle of the item to flush"],
            ],
        ),
        RawTable::new(
            "TPM2_FlushContext Response",
            &[&["TPM_ST", "tag", ""], &["UINT32", "responseSize", ""], &["TPM_RC", "responseCode", ""]],
        ),
    ]);
    tables
}

/// Structure typedefs used as union members and as field types, a typedef'd sized buffer,
/// and a null member sharing its type with another member.
pub fn typedef_tables() -> Vec<RawTable> {
    vec![
        alg_table(),
        digest_table(),
        RawTable::new(
            "Definition of Types for Scheme Aliases",
            &[
                &["TPMS_SCHEME_HASH", "TPMS_SIG_SCHEME_RSASSA", ""],
                &["TPMS_SCHEME_HASH", "TPMS_SIG_SCHEME_HMAC", ""],
                &["TPMS_SCHEME_HASH", "TPMS_KDF_SCHEME_KDF2", ""],
                &["TPM2B_DIGEST", "TPM2B_NONCE", ""],
                &["#TPM_RC_SCHEME"],
            ],
        ),
        RawTable::new("Definition of TPMS_SCHEME_HASH Structure", &[&["hashAlg", "UINT16", "the hash algorithm"]]),
        RawTable::new(
            "Definition of TPMU_SIG_SCHEME Union",
            &[
                &["rsassa", "TPMS_SIG_SCHEME_RSASSA", "TPM_ALG_RSASSA", ""],
                &["hmac", "TPMS_SIG_SCHEME_HMAC", "TPM_ALG_HMAC", ""],
                &["null", "", "TPM_ALG_NULL", ""],
                &["#TPM_RC_SELECTOR"],
            ],
        ),
        RawTable::new(
            "Definition of TPMT_SIG_SCHEME Structure",
            &[
                &["scheme", "UINT16", "scheme selector"],
                &["[scheme]details", "TPMU_SIG_SCHEME", "scheme parameters"],
            ],
        ),
        RawTable::new(
            "Definition of TPMU_KDF_SCHEME Union",
            &[
                &["sha1", "TPMS_SCHEME_HASH", "TPM_ALG_SHA1", ""],
                &["null", "TPMS_SCHEME_HASH", "TPM_ALG_NULL", ""],
            ],
        ),
        RawTable::new(
            "Definition of TPMS_USER Structure",
            &[
                &["nonce", "TPM2B_NONCE", ""],
                &["kdf", "TPMS_KDF_SCHEME_KDF2", ""],
                &["signing", "TPMS_SIG_SCHEME_RSASSA", ""],
                &["scheme", "TPMT_SIG_SCHEME", ""],
            ],
        ),
    ]
}

/// Extract and normalize with the default configuration.
pub fn registry_from(tables: &[RawTable]) -> Registry {
    let config = GeneratorConfig::default();
    let (mut registry, _) = extract(tables, &config).expect("extract");
    normalize(&mut registry, &config).expect("normalize");
    registry
}
