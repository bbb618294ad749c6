use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

const CNPJ_WEIGHTS_1: [u32; 12] = [5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];
const CNPJ_WEIGHTS_2: [u32; 13] = [6, 5, 4, 3, 2, 9, 8, 7, 6, 5, 4, 3, 2];

/// Supplier tax identifier, stored as digits only.
///
/// `"11.222.333/0001-81"` and `"11222333000181"` are the same `TaxId`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxId(String);

impl TaxId {
    /// Keep digits only; reject input with none.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Err(DomainError::validation(format!("tax id {raw:?} has no digits")));
        }
        Ok(Self(digits))
    }

    /// Like `parse`, but also require a 14-digit CNPJ with valid check digits.
    pub fn parse_strict(raw: &str) -> DomainResult<Self> {
        let id = Self::parse(raw)?;
        if !id.has_valid_check_digits() {
            return Err(DomainError::validation(format!("tax id {raw:?} is not a valid CNPJ")));
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cnpj(&self) -> bool {
        self.0.len() == 14
    }

    /// Mod-11 check digits of a CNPJ. Repeated-digit sequences are rejected.
    pub fn has_valid_check_digits(&self) -> bool {
        if !self.is_cnpj() {
            return false;
        }
        let digits: Vec<u32> = self.0.chars().filter_map(|c| c.to_digit(10)).collect();
        if digits.iter().all(|&d| d == digits[0]) {
            return false;
        }
        let check = |weights: &[u32]| {
            let sum: u32 = digits.iter().zip(weights).map(|(d, w)| d * w).sum();
            let rem = sum % 11;
            if rem < 2 { 0 } else { 11 - rem }
        };
        check(&CNPJ_WEIGHTS_1) == digits[12] && check(&CNPJ_WEIGHTS_2) == digits[13]
    }

    /// `XX.XXX.XXX/XXXX-XX` for CNPJs, bare digits otherwise.
    pub fn formatted(&self) -> String {
        if !self.is_cnpj() {
            return self.0.clone();
        }
        let d = &self.0;
        format!("{}.{}.{}/{}-{}", &d[0..2], &d[2..5], &d[5..8], &d[8..12], &d[12..14])
    }
}

impl core::fmt::Display for TaxId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
