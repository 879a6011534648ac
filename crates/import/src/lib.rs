pub mod amount;
pub mod csv;
pub mod mapper;
pub mod sheet;

pub use amount::{parse_amount, AmountError};
pub use mapper::{LineItemMapper, MapError, MappedRow, MappingWarning};
pub use sheet::{
    parse_sheet, ParsedSheet, RawLine, RawRow, RejectedLine, SheetError, SheetFormat,
};
