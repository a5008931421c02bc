#![no_main]

use ledger_rpc::FilterExpr;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let value = String::from_utf8_lossy(data);
    let filter = FilterExpr::eq("Email", value.as_ref()).expect("field name is valid");
    let literal = filter
        .as_str()
        .strip_prefix("Email eq '")
        .and_then(|rest| rest.strip_suffix('\''))
        .expect("literal stays quoted");
    // Every quote inside the literal must be doubled.
    assert_eq!(literal.replace("''", ""), value.replace('\'', ""));
});
