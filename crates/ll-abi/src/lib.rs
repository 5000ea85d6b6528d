//! Minimal Solidity ABI codec for the LifeLine contract surface.
//!
//! Only the shapes the contract actually uses are supported: `address`,
//! `uint<N>` (values up to 128 bits), `bool`, `bytes32`, `bytes`, `string`
//! and dynamic arrays of those.

use sha3::{Digest, Keccak256};

const WORD: usize = 32;

pub const ERROR_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];
pub const PANIC_SELECTOR: [u8; 4] = [0x4e, 0x48, 0x7b, 0x71];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbiError {
    #[error("abi data truncated at byte {0}")]
    Truncated(usize),
    #[error("abi value out of range: {0}")]
    OutOfRange(&'static str),
    #[error("abi string is not valid utf-8")]
    InvalidUtf8,
    #[error("expected {expected} token, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: &'static str,
    },
    #[error("missing {0} token")]
    MissingToken(&'static str),
    #[error("calldata shorter than a selector")]
    NoSelector,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    Address,
    Uint,
    Bool,
    FixedBytes32,
    Bytes,
    String,
    Array(Box<ParamType>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Uint(u128),
    Bool(bool),
    FixedBytes32([u8; 32]),
    Bytes(Vec<u8>),
    String(String),
    Array(Vec<Token>),
}

impl Token {
    fn kind(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint(_) => "uint",
            Self::Bool(_) => "bool",
            Self::FixedBytes32(_) => "bytes32",
            Self::Bytes(_) => "bytes",
            Self::String(_) => "string",
            Self::Array(_) => "array",
        }
    }
}

/// First four bytes of `keccak256(signature)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let digest = Keccak256::digest(signature.as_bytes());
    [digest[0], digest[1], digest[2], digest[3]]
}

pub fn encode_call(signature: &str, tokens: &[Token]) -> Vec<u8> {
    let mut out = selector(signature).to_vec();
    out.extend(encode(tokens));
    out
}

/// Splits calldata into selector and argument bytes.
pub fn split_call(data: &[u8]) -> Result<([u8; 4], &[u8]), AbiError> {
    if data.len() < 4 {
        return Err(AbiError::NoSelector);
    }
    let (head, rest) = data.split_at(4);
    Ok(([head[0], head[1], head[2], head[3]], rest))
}

/// Head/tail encoding of a tuple.
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len = tokens.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        match encode_tail(token) {
            Some(encoded) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                tail.extend(encoded);
            }
            None => head.extend_from_slice(&static_word(token)),
        }
    }

    head.extend(tail);
    head
}

fn static_word(token: &Token) -> [u8; WORD] {
    match token {
        Token::Address(bytes) => {
            let mut word = [0_u8; WORD];
            word[12..].copy_from_slice(bytes);
            word
        }
        Token::Uint(value) => uint_word(*value),
        Token::Bool(flag) => uint_word(u128::from(*flag)),
        Token::FixedBytes32(bytes) => *bytes,
        Token::Bytes(_) | Token::String(_) | Token::Array(_) => [0_u8; WORD],
    }
}

fn encode_tail(token: &Token) -> Option<Vec<u8>> {
    match token {
        Token::Bytes(bytes) => Some(length_prefixed(bytes)),
        Token::String(text) => Some(length_prefixed(text.as_bytes())),
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            Some(out)
        }
        Token::Address(_) | Token::Uint(_) | Token::Bool(_) | Token::FixedBytes32(_) => None,
    }
}

fn length_prefixed(bytes: &[u8]) -> Vec<u8> {
    let padded = bytes.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(WORD + padded);
    out.extend_from_slice(&uint_word(bytes.len() as u128));
    out.extend_from_slice(bytes);
    out.resize(WORD + padded, 0);
    out
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0_u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    decode_tuple(types, data, 0)
}

fn decode_tuple(types: &[ParamType], data: &[u8], base: usize) -> Result<Vec<Token>, AbiError> {
    types
        .iter()
        .enumerate()
        .map(|(index, ty)| decode_param(ty, data, base + index * WORD, base))
        .collect()
}

fn decode_param(ty: &ParamType, data: &[u8], head: usize, base: usize) -> Result<Token, AbiError> {
    match ty {
        ParamType::Address => {
            let word = read_word(data, head)?;
            if word[..12].iter().any(|b| *b != 0) {
                return Err(AbiError::OutOfRange("address"));
            }
            let mut bytes = [0_u8; 20];
            bytes.copy_from_slice(&word[12..]);
            Ok(Token::Address(bytes))
        }
        ParamType::Uint => read_u128(data, head).map(Token::Uint),
        ParamType::Bool => match read_u128(data, head)? {
            0 => Ok(Token::Bool(false)),
            1 => Ok(Token::Bool(true)),
            _ => Err(AbiError::OutOfRange("bool")),
        },
        ParamType::FixedBytes32 => read_word(data, head).map(Token::FixedBytes32),
        ParamType::Bytes | ParamType::String | ParamType::Array(_) => {
            let offset = read_usize(data, head)?;
            let at = base.checked_add(offset).ok_or(AbiError::OutOfRange("offset"))?;
            decode_dynamic(ty, data, at)
        }
    }
}

fn decode_dynamic(ty: &ParamType, data: &[u8], at: usize) -> Result<Token, AbiError> {
    let len = read_usize(data, at)?;
    let start = at + WORD;
    match ty {
        ParamType::Bytes => read_slice(data, start, len).map(|raw| Token::Bytes(raw.to_vec())),
        ParamType::String => {
            let raw = read_slice(data, start, len)?;
            String::from_utf8(raw.to_vec())
                .map(Token::String)
                .map_err(|_| AbiError::InvalidUtf8)
        }
        ParamType::Array(inner) => {
            // Every element needs at least one head word.
            if len > data.len().saturating_sub(start) / WORD {
                return Err(AbiError::Truncated(data.len()));
            }
            let types = vec![(**inner).clone(); len];
            decode_tuple(&types, data, start).map(Token::Array)
        }
        ParamType::Address | ParamType::Uint | ParamType::Bool | ParamType::FixedBytes32 => {
            Err(AbiError::OutOfRange("static type in dynamic position"))
        }
    }
}

fn read_word(data: &[u8], at: usize) -> Result<[u8; WORD], AbiError> {
    let raw = read_slice(data, at, WORD)?;
    let mut word = [0_u8; WORD];
    word.copy_from_slice(raw);
    Ok(word)
}

fn read_slice(data: &[u8], at: usize, len: usize) -> Result<&[u8], AbiError> {
    let end = at.checked_add(len).ok_or(AbiError::Truncated(data.len()))?;
    data.get(at..end).ok_or(AbiError::Truncated(data.len()))
}

fn read_u128(data: &[u8], at: usize) -> Result<u128, AbiError> {
    let word = read_word(data, at)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(AbiError::OutOfRange("uint wider than 128 bits"));
    }
    let mut low = [0_u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn read_usize(data: &[u8], at: usize) -> Result<usize, AbiError> {
    let value = read_u128(data, at)?;
    usize::try_from(value).map_err(|_| AbiError::OutOfRange("offset"))
}

/// Sequential typed access to decoded tokens.
pub struct TokenReader {
    tokens: std::vec::IntoIter<Token>,
}

impl TokenReader {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into_iter(),
        }
    }

    fn next(&mut self, expected: &'static str) -> Result<Token, AbiError> {
        self.tokens.next().ok_or(AbiError::MissingToken(expected))
    }

    pub fn address(&mut self) -> Result<[u8; 20], AbiError> {
        match self.next("address")? {
            Token::Address(bytes) => Ok(bytes),
            other => Err(mismatch("address", &other)),
        }
    }

    pub fn uint(&mut self) -> Result<u128, AbiError> {
        match self.next("uint")? {
            Token::Uint(value) => Ok(value),
            other => Err(mismatch("uint", &other)),
        }
    }

    pub fn u64(&mut self) -> Result<u64, AbiError> {
        u64::try_from(self.uint()?).map_err(|_| AbiError::OutOfRange("uint64"))
    }

    pub fn u8(&mut self) -> Result<u8, AbiError> {
        u8::try_from(self.uint()?).map_err(|_| AbiError::OutOfRange("uint8"))
    }

    pub fn bool(&mut self) -> Result<bool, AbiError> {
        match self.next("bool")? {
            Token::Bool(flag) => Ok(flag),
            other => Err(mismatch("bool", &other)),
        }
    }

    pub fn bytes32(&mut self) -> Result<[u8; 32], AbiError> {
        match self.next("bytes32")? {
            Token::FixedBytes32(bytes) => Ok(bytes),
            other => Err(mismatch("bytes32", &other)),
        }
    }

    pub fn string(&mut self) -> Result<String, AbiError> {
        match self.next("string")? {
            Token::String(text) => Ok(text),
            other => Err(mismatch("string", &other)),
        }
    }

    pub fn array(&mut self) -> Result<Vec<Token>, AbiError> {
        match self.next("array")? {
            Token::Array(items) => Ok(items),
            other => Err(mismatch("array", &other)),
        }
    }
}

fn mismatch(expected: &'static str, found: &Token) -> AbiError {
    AbiError::UnexpectedToken {
        expected,
        found: found.kind(),
    }
}

pub fn encode_revert_reason(reason: &str) -> Vec<u8> {
    let mut out = ERROR_SELECTOR.to_vec();
    out.extend(encode(&[Token::String(reason.to_owned())]));
    out
}

/// Human-readable reason from `Error(string)` or `Panic(uint256)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let (selector, args) = split_call(data).ok()?;
    if selector == ERROR_SELECTOR {
        let mut reader = TokenReader::new(decode(&[ParamType::String], args).ok()?);
        return reader.string().ok();
    }
    if selector == PANIC_SELECTOR {
        let code = read_u128(args, 0).ok()?;
        return Some(format!("panic code {code:#04x}"));
    }
    None
}

pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex_prefixed(raw: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_match_known_values() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(selector("balanceOf(address)"), [0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(selector("Error(string)"), ERROR_SELECTOR);
        assert_eq!(selector("Panic(uint256)"), PANIC_SELECTOR);
    }

    #[test]
    fn static_arguments_occupy_one_word_each() {
        let mut address = [0_u8; 20];
        address[19] = 0xaa;
        let encoded = encode(&[Token::Uint(7), Token::Address(address), Token::Bool(true)]);
        assert_eq!(encoded.len(), 3 * WORD);
        assert_eq!(encoded[31], 7);
        assert_eq!(encoded[63], 0xaa);
        assert_eq!(encoded[95], 1);
    }

    #[test]
    fn dynamic_string_layout_matches_solidity() {
        // abi.encode("abc")
        let encoded = encode(&[Token::String("abc".to_owned())]);
        let expected = concat!(
            "0000000000000000000000000000000000000000000000000000000000000020",
            "0000000000000000000000000000000000000000000000000000000000000003",
            "6162630000000000000000000000000000000000000000000000000000000000",
        );
        assert_eq!(hex::encode(&encoded), expected);
    }

    #[test]
    fn mixed_tuple_decodes_back() {
        let tokens = vec![
            Token::Uint(2),
            Token::String("Lagos, NG".to_owned()),
            Token::FixedBytes32([9_u8; 32]),
            Token::Array(vec![Token::Address([1_u8; 20]), Token::Address([2_u8; 20])]),
            Token::Array(vec![Token::Bytes(vec![0xde, 0xad]), Token::Bytes(vec![0xbe; 40])]),
        ];
        let types = [
            ParamType::Uint,
            ParamType::String,
            ParamType::FixedBytes32,
            ParamType::Array(Box::new(ParamType::Address)),
            ParamType::Array(Box::new(ParamType::Bytes)),
        ];
        let decoded = decode(&types, &encode(&tokens)).unwrap();
        assert_eq!(decoded, tokens);
    }

    #[test]
    fn rejects_truncated_and_oversized_values() {
        assert!(matches!(decode(&[ParamType::Uint], &[0_u8; 16]), Err(AbiError::Truncated(_))));

        let mut wide = [0_u8; WORD];
        wide[0] = 1;
        assert!(matches!(decode(&[ParamType::Uint], &wide), Err(AbiError::OutOfRange(_))));

        let mut bogus_bool = [0_u8; WORD];
        bogus_bool[31] = 2;
        assert!(decode(&[ParamType::Bool], &bogus_bool).is_err());

        // Array claiming a huge length must not allocate.
        let mut huge = uint_word(WORD as u128).to_vec();
        huge.extend_from_slice(&uint_word(u64::MAX as u128));
        assert!(decode(&[ParamType::Array(Box::new(ParamType::Uint))], &huge).is_err());
    }

    #[test]
    fn revert_reasons_decode() {
        let data = encode_revert_reason("identity already registered");
        assert_eq!(
            decode_revert_reason(&data).as_deref(),
            Some("identity already registered")
        );

        let mut panic = PANIC_SELECTOR.to_vec();
        panic.extend_from_slice(&uint_word(0x11));
        assert_eq!(decode_revert_reason(&panic).as_deref(), Some("panic code 0x11"));

        assert_eq!(decode_revert_reason(&[0x01, 0x02]), None);
    }

    #[test]
    fn token_reader_reports_mismatches() {
        let mut reader = TokenReader::new(vec![Token::Uint(300), Token::Bool(true)]);
        assert!(matches!(reader.u8(), Err(AbiError::OutOfRange("uint8"))));
        assert!(matches!(
            reader.string(),
            Err(AbiError::UnexpectedToken { expected: "string", found: "bool" })
        ));
        assert!(matches!(reader.bool(), Err(AbiError::MissingToken("bool"))));
    }
}
