use crate::{job_worker::StartError, ledger_worker::LedgerError};
use actix_web::{HttpResponse, ResponseError, http::StatusCode, web};
use airdrop_lib::SignatureError;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Machine readable error class, rendered in every error body.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Auth,
    NotEligible,
    AmountMismatch,
    AlreadyClaimed,
    Storage,
    Forbidden,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Auth | ErrorKind::AmountMismatch => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::NotEligible | ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyClaimed | ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Storage | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorBody {
    pub error: String,
    pub kind: ErrorKind,
}

impl ErrorBody {
    pub fn build<E: ResponseError>(e: &E, kind: ErrorKind) -> HttpResponse {
        HttpResponse::build(e.status_code()).json(ErrorBody {
            error: e.to_string(),
            kind,
        })
    }
}

/// Rejections of the eligibility and claim protocols.
#[derive(ThisError, Debug)]
pub enum ClaimError {
    #[error("invalid wallet address")]
    InvalidWallet,
    #[error("invalid proof")]
    InvalidProof,
    #[error("message and signature are required")]
    MissingSignatureData,
    #[error("{0}")]
    InvalidEncoding(SignatureError),
    #[error("signature verification failed")]
    SignatureMismatch,
    #[error("wallet is not eligible")]
    NotEligible,
    #[error("amount does not match allocation")]
    AmountMismatch,
    #[error("wallet has already claimed")]
    AlreadyClaimed,
    #[error("failed to record claim: {0}")]
    Storage(#[source] LedgerError),
}

impl From<SignatureError> for ClaimError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::InvalidAddressEncoding | SignatureError::InvalidSignatureEncoding => {
                ClaimError::InvalidEncoding(e)
            }
            SignatureError::SignatureMismatch => ClaimError::SignatureMismatch,
        }
    }
}

impl From<LedgerError> for ClaimError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AlreadyClaimed => ClaimError::AlreadyClaimed,
            e => ClaimError::Storage(e),
        }
    }
}

impl ClaimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClaimError::InvalidWallet
            | ClaimError::MissingSignatureData
            | ClaimError::InvalidEncoding(_) => ErrorKind::Validation,
            ClaimError::InvalidProof | ClaimError::SignatureMismatch => ErrorKind::Auth,
            ClaimError::NotEligible => ErrorKind::NotEligible,
            ClaimError::AmountMismatch => ErrorKind::AmountMismatch,
            ClaimError::AlreadyClaimed => ErrorKind::AlreadyClaimed,
            ClaimError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl ResponseError for ClaimError {
    fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    fn error_response(&self) -> HttpResponse {
        ErrorBody::build(self, self.kind())
    }
}

#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Claim(#[from] ClaimError),
    #[error("{0}")]
    Validation(String),
    #[error("forbidden")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Db(#[from] db::Error),
    #[error(transparent)]
    Transfer(#[from] StartError),
    #[error(transparent)]
    Mailbox(#[from] actix::MailboxError),
    #[error("{0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Claim(e) => e.kind(),
            Error::Validation(_) => ErrorKind::Validation,
            Error::Forbidden => ErrorKind::Forbidden,
            Error::NotFound => ErrorKind::NotFound,
            Error::Ledger(_) | Error::Db(_) => ErrorKind::Storage,
            Error::Transfer(_) => ErrorKind::Conflict,
            Error::Mailbox(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        self.kind().status_code()
    }

    fn error_response(&self) -> HttpResponse {
        ErrorBody::build(self, self.kind())
    }
}

/// JSON body extractor whose failures render as validation errors.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|error, _| Error::Validation(format!("invalid request body: {error}")).into())
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default()
        .error_handler(|error, _| Error::Validation(format!("invalid query: {error}")).into())
}
