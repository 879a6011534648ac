pub mod calc;
pub mod clinic;
pub mod fields;
pub mod mapping;
pub mod money;
pub mod period;
pub mod record;
pub mod validate;

pub use calc::{compute_totals, drift, recompute, Drift, TotalsOverflow, EPSILON};
pub use clinic::{Clinic, ClinicId};
pub use fields::{DerivedField, Field, FieldCategory, FieldGroup};
pub use mapping::{LineItemMapping, Lookup, MappingRole, MappingTable, LINE_ITEM_MAPPINGS};
pub use money::Money;
pub use period::{Period, RecordKey};
pub use record::{CandidateRecord, FinancialRecord, RecordSnapshot, Totals};
pub use validate::{FieldError, RecordValidator, ValidationErrors, MIN_YEAR};
