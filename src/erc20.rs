use thiserror::Error;

/// 4-byte selector of `transfer(address,uint256)`.
pub const TRANSFER_SELECTOR: &str = "a9059cbb";

/// Hex length of the two 32-byte argument words.
const TRANSFER_PAYLOAD_LEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("input is not a transfer call")]
    NotTransfer,
    #[error("transfer payload is not two 32-byte words")]
    BadPayload,
}

/// Decode the recipient of an ERC-20 `transfer(address,uint256)` call.
///
/// `code` is the raw transaction input as hex, with or without a `0x`
/// prefix. The recipient is the low-order 20 bytes of the first argument
/// word, returned as a 0x-prefixed lower-case address.
pub fn transfer_recipient(code: &str) -> Result<String, DecodeError> {
    let code = code.strip_prefix("0x").unwrap_or(code).to_ascii_lowercase();

    let payload = code
        .strip_prefix(TRANSFER_SELECTOR)
        .ok_or(DecodeError::NotTransfer)?;

    if payload.len() != TRANSFER_PAYLOAD_LEN {
        return Err(DecodeError::BadPayload);
    }

    Ok(format!("0x{}", &payload[24..64]))
}
