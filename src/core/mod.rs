mod assets;
mod engine;
mod error;
mod ledger;
mod net_cash_flow;
mod ownership;
mod succession;
mod tax;
mod types;

pub use assets::{
    Asset, AssetCategory, AssetKind, Debt, FreeInvestment, InvestmentType, Liability,
    LiabilityCategory, LiabilityKind, Loan, Patrimony, PeriodicInvestment, RealEstate, Rental,
    Scpi,
};
pub use engine::{
    BalanceSheetYear, CashFlowYear, Kpis, RevenueCategory, Scenario, SimulationResult,
    TaxCategory, Termination, run_simulation,
};
pub use error::{SimulationError, TaxError};
pub use ledger::{NamedValue, NamedValueTable, ValuedLedger};
pub use net_cash_flow::{CashMovement, MovementKind, NetCashFlowAction, NetCashFlowManager};
pub use ownership::{BeneficiaryClause, EvaluationMethod, Owner, Ownership};
pub use succession::{
    Inheritance, OwnershipTransfer, SpouseOption, Succession, SuccessionEngine, SuccessionKind,
};
pub use tax::{FiscalModel, IncomeTax, corporate_tax, income_tax, wealth_tax};
pub use types::{Household, IncomeKind, IncomeStream, LifeExpense, Person, Year};
