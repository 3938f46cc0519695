//! Generated TypeScript and Python sources for a small command set.

mod common;

use common::*;
use tpmgen::backend::{backend_for, generate, PythonBackend, TypeScriptBackend};
use tpmgen::{adapt, GenError, Lang};

#[test]
fn test_typescript_types() {
    let registry = registry_from(&command_tables());
    let node = adapt(&registry, Lang::Node).expect("adapt");
    let files = generate(&node, &TypeScriptBackend).expect("generate");
    assert_eq!(files.len(), 2);
    let types = files.get("TpmTypes.ts").expect("TpmTypes.ts");

    assert!(types.contains("export enum TPM_ALG_ID // UINT16"));
    assert!(types.contains("    SHA256 = 0x000B,\n"));
    assert!(types.contains("    FIRST = 64 /*TPM_LIMIT_MAX*/,\n"));

    assert!(types.contains("export interface TPMU_SIG_SCHEME extends TpmUnion {}"));
    assert!(types.contains("export function create_TPMU_SIG_SCHEME(selector: TPM_ALG_ID): TPMU_SIG_SCHEME"));
    assert!(types.contains("        case TPM_ALG_ID.RSASSA: return new TPMS_SCHEME_HASH_RSASSA();\n"));
    assert!(types.contains(
        "export class TPMS_SCHEME_HASH_RSASSA extends TPMS_SCHEME_HASH implements TPMU_SIG_SCHEME"
    ));
    assert!(types.contains("    GetUnionSelector(): TPM_ALG_ID { return TPM_ALG_ID.RSASSA; }"));

    for line in [
        "buf.writeNum(0xFF544347, 4);",
        "buf.writeByteBuf(this.pcrSelect);",
        "buf.writeNum(this.digest?.length ?? 0, 2);",
        "buf.writeSizedObj(this.inner, 2);",
        "buf.writeNum(this.scheme.GetUnionSelector(), 2);",
        "this.scheme.toTpm(buf);",
        "buf.expectNum(0xFF544347, 4);",
        "this.pcrSelect = buf.readByteBuf(3);",
        "const _digestSize = buf.readNum(2);",
        "this.digest = buf.readByteBuf(_digestSize);",
        "this.inner = buf.createSizedObj(TPMS_INNER, 2);",
        "const _schemeScheme = buf.readNum(2);",
        "this.scheme = create_TPMU_SIG_SCHEME(_schemeScheme);",
        "this.scheme?.initFromTpm(buf);",
    ] {
        assert!(types.contains(line), "missing `{}`", line);
    }

    assert!(types.contains("toTpm(buf: TpmBuffer): void { customMarshalers.TPMT_SYM_DEF.toTpm(this, buf); }"));
    assert!(types.contains("export const customMarshalers = {\n    TPMT_SYM_DEF: {"));
    assert!(types.contains("if (obj.algorithm == TPM_ALG_ID.NULL) return;"));
}

#[test]
fn test_typescript_commands() {
    let registry = registry_from(&command_tables());
    let node = adapt(&registry, Lang::Node).expect("adapt");
    let files = generate(&node, &TypeScriptBackend).expect("generate");
    let tpm = files.get("Tpm.ts").expect("Tpm.ts");

    assert!(tpm.contains("export class Tpm extends TpmBase"));
    assert!(tpm.contains("async GetRandom(bytesRequested: number): Promise<Buffer>"));
    assert!(tpm.contains("const req = new GetRandom_REQUEST(bytesRequested);"));
    assert!(tpm.contains("const res = await this.dispatchCommand(TPM_CC.GetRandom, req, 0, 0, GetRandom_RESPONSE);"));
    assert!(tpm.contains("return res.randomBytes;"));
    assert!(tpm.contains("async FlushContext(flushHandle: number): Promise<void>"));
    assert!(tpm.contains("await this.dispatchCommand(TPM_CC.FlushContext, req, 0, 0, null);"));
    assert!(tpm.contains("    GetRandom_REQUEST,\n"));
}

#[test]
fn test_python_sources() {
    let registry = registry_from(&command_tables());
    let py = adapt(&registry, Lang::Py).expect("adapt");
    let files = generate(&py, &PythonBackend).expect("generate");
    let types = files.get("TpmTypes.py").expect("TpmTypes.py");
    let tpm = files.get("Tpm.py").expect("Tpm.py");

    assert!(types.contains("class TPM_ALG_ID(TpmEnum): # UINT16"));
    assert!(types.contains("    SHA256 = 0x000B\n"));
    assert!(types.contains("    FIRST = 64  # TPM_LIMIT_MAX\n"));
    assert!(types.contains("    ALG_RSASSA = RSASSA\n"));

    let union = types.find("class TPMU_SIG_SCHEME(TpmUnion):").expect("union class");
    let member = types
        .find("class TPMS_SCHEME_HASH_RSASSA(TPMS_SCHEME_HASH, TPMU_SIG_SCHEME):")
        .expect("derived member class");
    assert!(union < member);

    assert!(types.contains("    def __init__(self, pcrSelect = None, digest = None, inner = None, scheme = None):"));
    assert!(types.contains("        buf.writeNum(len(self.digest) if self.digest is not None else 0, 2)\n"));
    assert!(types.contains("        _schemeScheme = buf.readNum(2)\n"));
    assert!(types.contains("        self.scheme = create_TPMU_SIG_SCHEME(_schemeScheme)\n"));
    assert!(types.contains("    if obj.algorithm == TPM_ALG_ID.NULL: return\n"));
    assert!(types.contains("    'TPMT_SYM_DEF': (_TPMT_SYM_DEF_toTpm, _TPMT_SYM_DEF_initFromTpm),\n"));

    assert!(tpm.contains("class Tpm(TpmBase):"));
    assert!(tpm.contains("    def GetRandom(self, bytesRequested):\n"));
    assert!(tpm.contains("res = self.dispatchCommand(TPM_CC.GetRandom, req, 0, 0, GetRandom_RESPONSE)"));
    assert!(tpm.contains("self.dispatchCommand(TPM_CC.FlushContext, req, 0, 0, None)"));
}

#[test]
fn test_generate_requires_matching_adaptation() {
    let registry = registry_from(&codec_tables());
    let err = generate(&registry, &TypeScriptBackend).unwrap_err();
    assert!(matches!(err, GenError::NotAdapted { expected: Lang::Node, .. }));

    let py = adapt(&registry, Lang::Py).expect("adapt");
    let err = generate(&py, &TypeScriptBackend).unwrap_err();
    assert!(matches!(err, GenError::NotAdapted { expected: Lang::Node, ref found } if found == "py"));
    assert!(generate(&py, &PythonBackend).is_ok());
}

#[test]
fn test_files_written_per_language() {
    let registry = registry_from(&command_tables());
    let out = tempfile::tempdir().expect("tempdir");
    for lang in [Lang::Node, Lang::Py] {
        let backend = backend_for(lang).expect("backend");
        let adapted = adapt(&registry, lang).expect("adapt");
        let files = generate(&adapted, backend.as_ref()).expect("generate");
        let dir = out.path().join(lang.as_str());
        files.write_to(&dir).expect("write");
        for (path, contents) in files.iter() {
            let written = std::fs::read_to_string(dir.join(path)).expect("read back");
            assert_eq!(written, contents);
        }
    }
    assert!(out.path().join("node").join("TpmTypes.ts").is_file());
    assert!(out.path().join("py").join("Tpm.py").is_file());
    assert!(backend_for(Lang::Java).is_none());
}

#[test]
fn test_struct_typedefs_in_generated_sources() {
    let registry = registry_from(&typedef_tables());

    let node = adapt(&registry, Lang::Node).expect("adapt");
    let files = generate(&node, &TypeScriptBackend).expect("generate");
    let types = files.get("TpmTypes.ts").expect("TpmTypes.ts");
    assert!(types.contains("        case TPM_ALG_ID.RSASSA: return new TPMS_SIG_SCHEME_RSASSA();\n"));
    assert!(types.contains("        case TPM_ALG_ID.HMAC: return new TPMS_SIG_SCHEME_HMAC();\n"));
    assert!(types.contains(
        "export class TPMS_SIG_SCHEME_HMAC extends TPMS_SCHEME_HASH implements TPMU_SIG_SCHEME"
    ));
    assert!(types.contains("    GetUnionSelector(): TPM_ALG_ID { return TPM_ALG_ID.HMAC; }"));
    assert!(types.contains("        public kdf: TPMS_SCHEME_HASH = null"));
    assert!(types.contains("this.kdf = buf.createObj(TPMS_SCHEME_HASH);"));
    assert!(types.contains("this.signing = buf.createObj(TPMS_SIG_SCHEME_RSASSA);"));

    let py = adapt(&registry, Lang::Py).expect("adapt");
    let files = generate(&py, &PythonBackend).expect("generate");
    let types = files.get("TpmTypes.py").expect("TpmTypes.py");
    assert!(types.contains("class TPMS_SIG_SCHEME_RSASSA(TPMS_SCHEME_HASH, TPMU_SIG_SCHEME):"));
    assert!(types.contains("if selector == TPM_ALG_ID.HMAC: return TPMS_SIG_SCHEME_HMAC()"));
    assert!(types.contains("self.kdf = buf.createObj(TPMS_SCHEME_HASH)"));
}
