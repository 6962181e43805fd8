use thiserror::Error;

use super::types::Year;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TaxError {
    #[error("negative taxable amount: {0}")]
    NegativeAmount(f64),
    #[error("non-finite taxable amount")]
    NonFinite,
    #[error("invalid tax schedule: {0}")]
    InvalidSchedule(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SimulationError {
    #[error("insufficient cash in {year}: {missing:.2} could not be sourced")]
    InsufficientCash { year: Year, missing: f64 },
    #[error("unsupported ownership of '{asset}' at the death of {decedent}: {reason}")]
    InvalidOwnershipTopology {
        asset: String,
        decedent: String,
        reason: String,
    },
    #[error("'{name}' is not a member of the household")]
    MissingFamilyReference { name: String },
    #[error(transparent)]
    Tax(#[from] TaxError),
}
