//! Table-cell fuzz target: feed arbitrary text to the row classifier, the expression
//! evaluator and the domain parser. None of them may panic; malformed input is an error.
//! Build with: cargo fuzz run table_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    let cells: Vec<String> = s.split('|').map(str::to_string).collect();
    for caption in [
        "Definition of TPMS_FUZZ Structure",
        "Definition of TPMU_FUZZ Union",
        "TPM2_Fuzz Command",
        "Definition of (UINT8) TPMA_FUZZ Bits",
    ] {
        if let Some(kind) = tpmgen::classify::classify_table(caption) {
            let _ = tpmgen::classify::parse_row(&kind, &cells);
        }
    }
    let registry = tpmgen::Registry::new();
    let _ = registry.evaluate(s);
    let _ = tpmgen::parser::parse_domain(s);
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run table_fuzz");
}
