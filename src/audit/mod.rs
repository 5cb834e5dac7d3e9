pub mod alerts;
pub mod compliance_checks;
pub mod compliance_log;

pub use alerts::*;
pub use compliance_checks::*;
pub use compliance_log::*;
