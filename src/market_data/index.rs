//! The fixed set of indices this relay tracks and their Kite instrument tokens.
//!
//! Tokens are vendor-assigned configuration constants, not looked up at runtime.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum IndexName {
    #[serde(rename = "NIFTY50")]
    Nifty50,
    #[serde(rename = "BANKNIFTY")]
    BankNifty,
    #[serde(rename = "SENSEX")]
    Sensex,
}

impl IndexName {
    pub const ALL: [IndexName; 3] = [IndexName::Nifty50, IndexName::BankNifty, IndexName::Sensex];

    pub const fn as_str(self) -> &'static str {
        match self {
            IndexName::Nifty50 => "NIFTY50",
            IndexName::BankNifty => "BANKNIFTY",
            IndexName::Sensex => "SENSEX",
        }
    }

    /// Kite instrument token for this index.
    pub const fn token(self) -> u32 {
        match self {
            IndexName::Nifty50 => 256265,
            IndexName::BankNifty => 260105,
            IndexName::Sensex => 265, // BSE
        }
    }

    pub fn from_token(token: u32) -> Option<IndexName> {
        IndexName::ALL.into_iter().find(|index| index.token() == token)
    }

    /// Tokens in subscription order.
    pub fn tokens() -> Vec<u32> {
        IndexName::ALL.iter().map(|index| index.token()).collect()
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_table() {
        assert_eq!(IndexName::from_token(256265), Some(IndexName::Nifty50));
        assert_eq!(IndexName::from_token(260105), Some(IndexName::BankNifty));
        assert_eq!(IndexName::from_token(265), Some(IndexName::Sensex));
        assert_eq!(IndexName::from_token(408065), None);
        assert_eq!(IndexName::tokens(), vec![256265, 260105, 265]);
    }

    #[test]
    fn test_serialized_names() {
        let names = serde_json::to_string(&IndexName::ALL).unwrap();
        assert_eq!(names, r#"["NIFTY50","BANKNIFTY","SENSEX"]"#);
        assert_eq!(IndexName::BankNifty.to_string(), "BANKNIFTY");
    }
}
