pub mod choices;
pub mod history;
pub mod receipts;

pub use choices::{ChoiceRecord, ChoiceWriter};
pub use history::CaptionHistory;
pub use receipts::{
    write_receipt, AttemptReceipt, InvocationReceipt, TierReceipt, RECEIPT_SCHEMA_VERSION,
};
