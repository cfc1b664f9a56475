//! Conversion between the server encoding and UTF-8.

use std::fmt;

use encoding_rs::Encoding;

use crate::error::BridgeError;

/// The host's configured text encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerEncoding {
    #[default]
    Utf8,
    /// Bytes are passed through; they must still be valid UTF-8 to enter
    /// the engine.
    SqlAscii,
    Other(&'static Encoding),
}

impl ServerEncoding {
    /// Look up an encoding by host name (`UTF8`, `SQL_ASCII`, `LATIN1`) or
    /// WHATWG label.
    pub fn from_name(name: &str) -> Result<Self, BridgeError> {
        let normalized = name.trim().to_ascii_uppercase().replace('-', "");
        match normalized.as_str() {
            "UTF8" | "UNICODE" => return Ok(ServerEncoding::Utf8),
            "SQL_ASCII" => return Ok(ServerEncoding::SqlAscii),
            _ => {}
        }
        let label = match normalized.as_str() {
            "LATIN1" => "iso-8859-1",
            "LATIN2" => "iso-8859-2",
            "WIN1252" => "windows-1252",
            "WIN1251" => "windows-1251",
            "EUC_JP" => "euc-jp",
            "SJIS" => "shift_jis",
            _ => name.trim(),
        };
        match Encoding::for_label(label.as_bytes()) {
            Some(encoding) if encoding == encoding_rs::UTF_8 => Ok(ServerEncoding::Utf8),
            // UTF-16 cannot be written back by encoding_rs
            Some(encoding) if encoding.output_encoding() == encoding => {
                Ok(ServerEncoding::Other(encoding))
            }
            _ => Err(BridgeError::Config(format!("unsupported server encoding {name}"))),
        }
    }

    /// Host bytes to UTF-8.
    pub fn decode(&self, bytes: &[u8]) -> Result<String, BridgeError> {
        match self {
            ServerEncoding::Utf8 | ServerEncoding::SqlAscii => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|_| BridgeError::Encoding(self.to_string())),
            ServerEncoding::Other(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
                .ok_or_else(|| BridgeError::Encoding(self.to_string())),
        }
    }

    /// UTF-8 to host bytes.
    pub fn encode(&self, text: &str) -> Result<Vec<u8>, BridgeError> {
        match self {
            ServerEncoding::Utf8 | ServerEncoding::SqlAscii => Ok(text.as_bytes().to_vec()),
            ServerEncoding::Other(encoding) => {
                let (bytes, _, unmappable) = encoding.encode(text);
                if unmappable {
                    return Err(BridgeError::Encoding(self.to_string()));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl fmt::Display for ServerEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEncoding::Utf8 => f.write_str("UTF8"),
            ServerEncoding::SqlAscii => f.write_str("SQL_ASCII"),
            ServerEncoding::Other(encoding) => f.write_str(encoding.name()),
        }
    }
}
