use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("insufficient funds: {available} sat available, {required} sat required")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unsupported QR format: {0}")]
    UnsupportedQrFormat(String),

    #[error("incompatible PSBT: {0}")]
    IncompatiblePsbt(String),

    #[error("not enough signatures: have {have}, need {need}")]
    NotEnoughSignatures { have: u32, need: u32 },

    #[error("network timeout during {0}")]
    NetworkTimeout(&'static str),

    #[error("broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("transaction build error: {0}")]
    Build(String),

    #[error("PSBT error: {0}")]
    Psbt(#[from] bitcoin::psbt::Error),

    #[error("address error: {0}")]
    Address(#[from] bitcoin::address::Error),

    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("hex error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("CBOR framing error: {0}")]
    Cbor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
