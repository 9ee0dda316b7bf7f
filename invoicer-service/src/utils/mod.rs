pub mod password;
pub mod validation;

pub use password::{hash_password, verify_password, Password};
pub use validation::{check_price, check_vat_rate, non_blank, reject_blank, ValidatedJson};
