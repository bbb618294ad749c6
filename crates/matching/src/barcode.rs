/// Values suppliers put in the barcode field when there is no barcode.
const PLACEHOLDERS: [&str; 6] = ["SEM GTIN", "SEM EAN", "0000000000000", "0", "NULL", ""];

/// The trimmed barcode when it can identify a product, `None` for
/// placeholders.
pub fn usable_barcode(raw: Option<&str>) -> Option<&str> {
    let code = raw?.trim();
    if PLACEHOLDERS.iter().any(|p| code.eq_ignore_ascii_case(p)) {
        return None;
    }
    Some(code)
}
